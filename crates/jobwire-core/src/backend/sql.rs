use super::{
    check_cancelled, run_in_session, settle, BackendContext, BackendHandler, BackendKind,
    ConnectRequest, Connector, MAX_ROW_SIZE, PROBE_SQL,
};
use crate::config::SqlServerConfig;
use crate::errors::{BackendError, ConfigError};
use crate::model::ResultEnvelope;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Relational backend. The whole script goes to the driver as one batch.
pub struct SqlHandler {
    config: SqlServerConfig,
    connector: Arc<dyn Connector>,
    row_limit: usize,
}

impl SqlHandler {
    pub fn new(config: SqlServerConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            row_limit: MAX_ROW_SIZE,
        })
    }

    pub fn from_context(ctx: &BackendContext) -> Result<Box<dyn BackendHandler>, ConfigError> {
        let config = SqlServerConfig::from_source(ctx.config())?;
        Ok(Box::new(Self::new(config, ctx.sql_connector())?))
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    pub fn config(&self) -> &SqlServerConfig {
        &self.config
    }

    fn request(&self, timeout: Duration) -> ConnectRequest {
        ConnectRequest {
            kind: BackendKind::Sql,
            connection_string: self.config.connection_string(),
            redacted: self.config.redacted_connection_string(),
            params: self.config.params(),
            timeout,
        }
    }

    async fn run_script(
        &self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, BackendError> {
        check_cancelled(cancel, "cancelled before connect")?;
        let request = self.request(EXECUTE_TIMEOUT);
        info!(connection = %request.redacted, "starting SQL Server script execution");
        let sets = run_in_session(
            self.connector.as_ref(),
            &request,
            &[script.to_string()],
            self.row_limit,
            Some(cancel),
        )
        .await?;
        info!(result_sets = sets.len(), "SQL Server script executed");
        Ok(ResultEnvelope::with_result_sets(
            "SQL Server script executed successfully",
            sets,
        ))
    }
}

#[async_trait]
impl BackendHandler for SqlHandler {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let request = self.request(PROBE_TIMEOUT);
        info!(connection = %request.redacted, "starting SQL Server connection test");
        run_in_session(
            self.connector.as_ref(),
            &request,
            &[PROBE_SQL.to_string()],
            1,
            None,
        )
        .await
        .map_err(|e| BackendError::Connect {
            message: format!("SQL Server connection test failed: {e}"),
        })?;
        info!("SQL Server connection test succeeded");
        Ok(())
    }

    async fn execute(&self, script: &str, cancel: &CancellationToken) -> ResultEnvelope {
        settle(self.kind(), self.run_script(script, cancel).await)
    }
}
