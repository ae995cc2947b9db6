//! Backend handlers and the collaborator ports they drive.

pub mod function;
pub mod shell;
pub mod split;
pub mod sql;
pub mod sqlite;
pub mod warehouse;

use crate::config::{ConfigSource, ProcessEnv};
use crate::errors::{BackendError, JobError};
use crate::model::{ResultEnvelope, ResultSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use function::{FunctionHandler, FunctionInvoker, HttpInvoker};
pub use shell::ShellHandler;
pub use sql::SqlHandler;
pub use sqlite::SqliteConnector;
pub use warehouse::WarehouseHandler;

/// Default cap on rows kept per result set.
pub const MAX_ROW_SIZE: usize = 100;

/// Statement used by the SQL-style pre-flight probes.
pub const PROBE_SQL: &str = "SELECT 1 AS T";

/// Backend family. The wire tag is the `connection_type` string of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "sql_server")]
    Sql,
    #[serde(rename = "snowflake")]
    Warehouse,
    #[serde(rename = "lambda")]
    Function,
    #[serde(rename = "shell")]
    Shell,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Sql,
        BackendKind::Warehouse,
        BackendKind::Function,
        BackendKind::Shell,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            BackendKind::Sql => "sql_server",
            BackendKind::Warehouse => "snowflake",
            BackendKind::Function => "lambda",
            BackendKind::Shell => "shell",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::Sql => "SQL Server",
            BackendKind::Warehouse => "Snowflake",
            BackendKind::Function => "Lambda",
            BackendKind::Shell => "Shell",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Terminal value of a job as seen by the runner.
pub type JobHandle = Result<ResultEnvelope, JobError>;

/// Invoked exactly once when a job reaches a terminal state.
pub type CompletionCallback = Box<dyn FnOnce(&JobHandle) -> Option<ResultEnvelope> + Send>;

/// Callback shared by every bundled handler: log, hand back the envelope, and
/// swallow the error of a failed job after logging it.
pub fn default_callback(kind: BackendKind) -> CompletionCallback {
    Box::new(move |handle: &JobHandle| {
        info!(kind = %kind, "completion callback invoked");
        match handle {
            Ok(envelope) => Some(envelope.clone()),
            Err(e) => {
                error!(kind = %kind, error = %e, "job raised in completion callback");
                None
            }
        }
    })
}

/// One connection family. `execute` never fails: every error is folded into a
/// failure envelope before it returns.
#[async_trait]
pub trait BackendHandler: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap reachability check run before `execute` when pre-flight is on.
    async fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn execute(&self, script: &str, cancel: &CancellationToken) -> ResultEnvelope;

    fn callback(&self) -> CompletionCallback {
        default_callback(self.kind())
    }
}

/// Folds a handler result into an envelope, logging the failure.
pub(crate) fn settle(kind: BackendKind, outcome: Result<ResultEnvelope, BackendError>) -> ResultEnvelope {
    match outcome {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(kind = %kind, error = %e, "error executing {} script", kind.display_name());
            ResultEnvelope::failure(e.to_string())
        }
    }
}

pub(crate) fn check_cancelled(
    cancel: &CancellationToken,
    reason: &'static str,
) -> Result<(), BackendError> {
    if cancel.is_cancelled() {
        Err(BackendError::Cancelled(reason))
    } else {
        Ok(())
    }
}

/// What a driver needs to open one session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub kind: BackendKind,
    pub connection_string: String,
    /// Loggable form of `connection_string`.
    pub redacted: String,
    pub params: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ConnectRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows(ResultSet),
    NoResultSet,
}

/// Open database session. Must be closed on every path.
#[async_trait]
pub trait Session: Send {
    async fn run(&mut self, sql: &str, row_limit: usize) -> Result<Vec<StatementResult>, BackendError>;

    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Driver seam for the SQL-style and warehouse handlers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>, BackendError>;
}

/// Opens a session, runs each statement in order and always closes it.
///
/// A close failure is logged and never replaces the run outcome.
pub(crate) async fn run_in_session(
    connector: &dyn Connector,
    request: &ConnectRequest,
    statements: &[String],
    row_limit: usize,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<ResultSet>, BackendError> {
    let mut session = connector.connect(request).await?;
    info!(kind = %request.kind, connection = %request.redacted, "connection established");

    let outcome = match cancel.map(|c| check_cancelled(c, "cancelled before execute")) {
        Some(Err(e)) => Err(e),
        _ => collect_result_sets(session.as_mut(), statements, row_limit).await,
    };

    match session.close().await {
        Ok(()) => info!(kind = %request.kind, "connection closed"),
        Err(e) => warn!(kind = %request.kind, error = %e, "failed to close connection"),
    }
    outcome
}

async fn collect_result_sets(
    session: &mut dyn Session,
    statements: &[String],
    row_limit: usize,
) -> Result<Vec<ResultSet>, BackendError> {
    let mut sets = Vec::new();
    for sql in statements {
        for result in session.run(sql, row_limit).await? {
            if let StatementResult::Rows(mut set) = result {
                if set.truncate(row_limit) {
                    debug!(row_limit, "result set truncated");
                }
                sets.push(set);
            }
        }
    }
    Ok(sets)
}

/// Everything handler constructors draw from: the config source and the
/// driver collaborators.
#[derive(Clone)]
pub struct BackendContext {
    config: Arc<dyn ConfigSource>,
    sql_connector: Arc<dyn Connector>,
    warehouse_connector: Arc<dyn Connector>,
    function_invoker: Option<Arc<dyn FunctionInvoker>>,
}

impl Default for BackendContext {
    fn default() -> Self {
        Self::new(Arc::new(ProcessEnv))
    }
}

impl BackendContext {
    /// Bundled SQLite driver for both SQL-style kinds, HTTP invoker for functions.
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            sql_connector: Arc::new(SqliteConnector),
            warehouse_connector: Arc::new(SqliteConnector),
            function_invoker: None,
        }
    }

    pub fn with_sql_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.sql_connector = connector;
        self
    }

    pub fn with_warehouse_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.warehouse_connector = connector;
        self
    }

    pub fn with_function_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.function_invoker = Some(invoker);
        self
    }

    pub fn config(&self) -> &dyn ConfigSource {
        self.config.as_ref()
    }

    pub fn sql_connector(&self) -> Arc<dyn Connector> {
        self.sql_connector.clone()
    }

    pub fn warehouse_connector(&self) -> Arc<dyn Connector> {
        self.warehouse_connector.clone()
    }

    pub fn function_invoker(&self) -> Option<Arc<dyn FunctionInvoker>> {
        self.function_invoker.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted connector used by handler tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Counters {
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub statements: Mutex<Vec<String>>,
    }

    pub enum Script {
        Refuse,
        FailRun(String),
        Rows(Vec<StatementResult>),
    }

    pub struct StubConnector {
        pub script: Script,
        pub fail_close: bool,
        pub counters: Arc<Counters>,
    }

    impl StubConnector {
        pub fn new(script: Script) -> Self {
            Self {
                script,
                fail_close: false,
                counters: Arc::new(Counters::default()),
            }
        }
    }

    struct StubSession {
        results: Result<Vec<StatementResult>, String>,
        fail_close: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn connect(&self, _request: &ConnectRequest) -> Result<Box<dyn Session>, BackendError> {
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            let results = match &self.script {
                Script::Refuse => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    )
                    .into())
                }
                Script::FailRun(msg) => Err(msg.clone()),
                Script::Rows(rows) => Ok(rows.clone()),
            };
            Ok(Box::new(StubSession {
                results,
                fail_close: self.fail_close,
                counters: self.counters.clone(),
            }))
        }
    }

    #[async_trait]
    impl Session for StubSession {
        async fn run(&mut self, sql: &str, _row_limit: usize) -> Result<Vec<StatementResult>, BackendError> {
            self.counters.statements.lock().unwrap().push(sql.to_string());
            self.results
                .clone()
                .map_err(|message| BackendError::Script { message })
        }

        async fn close(&mut self) -> Result<(), BackendError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(BackendError::Release {
                    message: "socket already gone".into(),
                })
            } else {
                Ok(())
            }
        }
    }
}
