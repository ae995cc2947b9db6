pub mod dispatch;
pub mod kinds;
pub mod payload;
pub mod run;

pub use dispatch::dispatch;

use jobwire_core::config::ProcessEnv;
use jobwire_core::{BackendContext, ConfigError, HandlerRegistry};
use std::sync::Arc;

/// Registry with every bundled backend, configured from the process env.
pub(crate) fn build_registry() -> Result<HandlerRegistry, ConfigError> {
    HandlerRegistry::with_defaults(BackendContext::new(Arc::new(ProcessEnv)))
}
