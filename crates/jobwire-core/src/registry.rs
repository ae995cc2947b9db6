//! Maps connection-type tags to handler constructors.

use crate::backend::{
    BackendContext, BackendHandler, BackendKind, FunctionHandler, ShellHandler, SqlHandler,
    WarehouseHandler,
};
use crate::errors::ConfigError;
use crate::model::JobPayload;
use std::collections::HashMap;

/// Builds a fresh handler for one job.
pub type HandlerConstructor = fn(&BackendContext) -> Result<Box<dyn BackendHandler>, ConfigError>;

/// Explicit registration table. Nothing self-registers at load time; callers
/// use [`HandlerRegistry::with_defaults`] or [`HandlerRegistry::register`].
pub struct HandlerRegistry {
    context: BackendContext,
    constructors: HashMap<BackendKind, HandlerConstructor>,
}

impl HandlerRegistry {
    pub fn new(context: BackendContext) -> Self {
        Self {
            context,
            constructors: HashMap::new(),
        }
    }

    /// Registry with every bundled backend registered.
    pub fn with_defaults(context: BackendContext) -> Result<Self, ConfigError> {
        let mut registry = Self::new(context);
        registry.register_all()?;
        Ok(registry)
    }

    pub fn register_all(&mut self) -> Result<(), ConfigError> {
        self.register(BackendKind::Sql, SqlHandler::from_context)?;
        self.register(BackendKind::Warehouse, WarehouseHandler::from_context)?;
        self.register(BackendKind::Function, FunctionHandler::from_context)?;
        self.register(BackendKind::Shell, ShellHandler::from_context)?;
        Ok(())
    }

    pub fn register(
        &mut self,
        kind: BackendKind,
        constructor: HandlerConstructor,
    ) -> Result<(), ConfigError> {
        if self.constructors.contains_key(&kind) {
            return Err(ConfigError::DuplicateHandler {
                tag: kind.tag().to_string(),
            });
        }
        self.constructors.insert(kind, constructor);
        Ok(())
    }

    /// Looks up `payload.connection_type` and constructs a new handler.
    pub fn create(&self, payload: &JobPayload) -> Result<Box<dyn BackendHandler>, ConfigError> {
        self.create_for_tag(&payload.connection_type)
    }

    pub fn create_for_tag(&self, tag: &str) -> Result<Box<dyn BackendHandler>, ConfigError> {
        let constructor = BackendKind::from_tag(tag)
            .and_then(|kind| self.constructors.get(&kind))
            .ok_or_else(|| ConfigError::UnsupportedConnectionType {
                tag: tag.to_string(),
            })?;
        constructor(&self.context)
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        BackendKind::from_tag(tag).is_some_and(|kind| self.constructors.contains_key(&kind))
    }

    /// Registered tags in a stable order.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut kinds: Vec<BackendKind> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds.into_iter().map(BackendKind::tag).collect()
    }

    pub fn context(&self) -> &BackendContext {
        &self.context
    }
}
