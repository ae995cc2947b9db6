use super::{check_cancelled, settle, BackendContext, BackendHandler, BackendKind};
use crate::config::ShellConfig;
use crate::errors::ConfigError;
use crate::model::ResultEnvelope;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const SHELL_DONE_MESSAGE: &str = "Hello Shell Is Done";

/// Remote shell backend. The transport is not wired up: the script is logged
/// against the target server and reported done.
pub struct ShellHandler {
    config: ShellConfig,
}

impl ShellHandler {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    pub fn from_context(ctx: &BackendContext) -> Result<Box<dyn BackendHandler>, ConfigError> {
        Ok(Box::new(Self::new(ShellConfig::from_source(ctx.config())?)))
    }
}

#[async_trait]
impl BackendHandler for ShellHandler {
    fn kind(&self) -> BackendKind {
        BackendKind::Shell
    }

    async fn execute(&self, script: &str, cancel: &CancellationToken) -> ResultEnvelope {
        let outcome = check_cancelled(cancel, "cancelled before execute").map(|()| {
            info!(server = %self.config.server_name, script, "executing shell script");
            ResultEnvelope::success(SHELL_DONE_MESSAGE, None)
        });
        settle(self.kind(), outcome)
    }
}
