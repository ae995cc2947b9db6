use super::split::split_statements;
use super::{
    check_cancelled, run_in_session, settle, BackendContext, BackendHandler, BackendKind,
    ConnectRequest, Connector, MAX_ROW_SIZE, PROBE_SQL,
};
use crate::config::WarehouseConfig;
use crate::errors::{BackendError, ConfigError};
use crate::model::ResultEnvelope;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloud warehouse backend. Scripts are split client-side and each statement
/// is submitted on its own.
pub struct WarehouseHandler {
    config: WarehouseConfig,
    connector: Arc<dyn Connector>,
    row_limit: usize,
}

impl WarehouseHandler {
    pub fn new(config: WarehouseConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            row_limit: MAX_ROW_SIZE,
        }
    }

    pub fn from_context(ctx: &BackendContext) -> Result<Box<dyn BackendHandler>, ConfigError> {
        let config = WarehouseConfig::from_source(ctx.config())?;
        Ok(Box::new(Self::new(config, ctx.warehouse_connector())))
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    fn request(&self) -> ConnectRequest {
        ConnectRequest {
            kind: BackendKind::Warehouse,
            connection_string: self.config.connection_string(),
            redacted: self.config.redacted_connection_string(),
            params: self.config.params(),
            timeout: CONNECT_TIMEOUT,
        }
    }

    async fn run_script(
        &self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, BackendError> {
        check_cancelled(cancel, "cancelled before connect")?;
        let request = self.request();
        let statements = split_statements(script);
        info!(
            connection = %request.redacted,
            statements = statements.len(),
            "starting Snowflake script execution"
        );
        let sets = run_in_session(
            self.connector.as_ref(),
            &request,
            &statements,
            self.row_limit,
            Some(cancel),
        )
        .await?;
        Ok(ResultEnvelope::with_result_sets(
            "Snowflake script executed successfully",
            sets,
        ))
    }
}

#[async_trait]
impl BackendHandler for WarehouseHandler {
    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let request = self.request();
        info!(connection = %request.redacted, "starting Snowflake connection test");
        run_in_session(
            self.connector.as_ref(),
            &request,
            &[PROBE_SQL.to_string()],
            1,
            None,
        )
        .await?;
        info!("Snowflake connection test succeeded");
        Ok(())
    }

    async fn execute(&self, script: &str, cancel: &CancellationToken) -> ResultEnvelope {
        settle(self.kind(), self.run_script(script, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{Script, StubConnector};
    use crate::backend::SqliteConnector;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn config() -> WarehouseConfig {
        WarehouseConfig::new("svc", "secret", "acme")
    }

    #[tokio::test]
    async fn each_statement_is_submitted_separately() {
        let stub = StubConnector::new(Script::Rows(Vec::new()));
        let counters = stub.counters.clone();
        let handler = WarehouseHandler::new(config(), Arc::new(stub));
        let env = handler
            .execute("USE WAREHOUSE wh; SELECT 'a;b'", &CancellationToken::new())
            .await;
        assert!(env.is_success());
        let sent = counters.statements.lock().unwrap().clone();
        assert_eq!(sent, vec!["USE WAREHOUSE wh", "SELECT 'a;b'"]);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multi_statement_script_yields_one_set_per_query() {
        let handler = WarehouseHandler::new(config(), Arc::new(SqliteConnector));
        let env = handler
            .execute(
                "CREATE TABLE t(a INT); INSERT INTO t VALUES (7); SELECT a FROM t; SELECT 2 AS b",
                &CancellationToken::new(),
            )
            .await;
        let sets = env.result_sets().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].rows, vec![vec![json!(7)]]);
        assert_eq!(sets[1].columns, vec!["b"]);
    }

    #[tokio::test]
    async fn row_limit_caps_every_statement() {
        let handler = WarehouseHandler::new(config(), Arc::new(SqliteConnector)).with_row_limit(3);
        let env = handler
            .execute(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 10) SELECT x FROM n;
                 WITH RECURSIVE m(y) AS (SELECT 1 UNION ALL SELECT y + 1 FROM m WHERE y < 250) SELECT y FROM m",
                &CancellationToken::new(),
            )
            .await;
        let sets = env.result_sets().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].rows.len(), 3);
        assert_eq!(sets[1].rows.len(), 3);
        assert_eq!(sets[1].rows[2], vec![json!(3)]);

        let env = WarehouseHandler::new(config(), Arc::new(SqliteConnector))
            .execute(
                "WITH RECURSIVE m(y) AS (SELECT 1 UNION ALL SELECT y + 1 FROM m WHERE y < 250) SELECT y FROM m",
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(env.result_sets().unwrap()[0].rows.len(), MAX_ROW_SIZE);
    }

    #[tokio::test]
    async fn refused_connection_becomes_failure_envelope() {
        let handler = WarehouseHandler::new(config(), Arc::new(StubConnector::new(Script::Refuse)));
        let env = handler.execute("SELECT 1", &CancellationToken::new()).await;
        assert!(!env.is_success());
        assert!(env.error_text().unwrap().contains("ConnectionRefused"));
    }

    #[tokio::test]
    async fn probe_propagates_connect_error_unchanged() {
        let handler = WarehouseHandler::new(config(), Arc::new(StubConnector::new(Script::Refuse)));
        let err = handler.probe().await.unwrap_err();
        assert_eq!(err.to_string(), "ConnectionRefused: connection refused");
    }
}
