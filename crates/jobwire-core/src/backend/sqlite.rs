//! Bundled SQLite driver behind the [`Connector`] seam.

use super::{ConnectRequest, Connector, Session, StatementResult};
use crate::errors::BackendError;
use crate::model::ResultSet;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, InterruptHandle};
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::warn;

pub const MEMORY_DATABASE: &str = ":memory:";

/// Request parameter naming the SQLite file to open.
pub const SQLITE_PATH_PARAM: &str = "sqlite_path";

/// Opens the `sqlite_path` request parameter. Without it the session runs
/// against a private in-memory database, whatever server the config names.
///
/// Every driver call runs on the blocking pool so a job deadline can drop the
/// session mid-statement; the dropped statement is interrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>, BackendError> {
        let path = match request.param(SQLITE_PATH_PARAM) {
            Some(path) => path.to_string(),
            None => {
                warn!(
                    kind = %request.kind,
                    connection = %request.redacted,
                    "no sqlite_path configured; bundled SQLite driver is using an in-memory database"
                );
                MEMORY_DATABASE.to_string()
            }
        };
        let busy_timeout = request.timeout;
        let conn = tokio::task::spawn_blocking(move || {
            let conn = if path == MEMORY_DATABASE {
                Connection::open_in_memory()
            } else {
                Connection::open(&path)
            }
            .map_err(|e| BackendError::Connect {
                message: format!("{path}: {e}"),
            })?;
            conn.busy_timeout(busy_timeout)
                .map_err(|e| BackendError::Connect {
                    message: e.to_string(),
                })?;
            Ok::<_, BackendError>(conn)
        })
        .await
        .map_err(|e| BackendError::Connect {
            message: format!("driver task failed: {e}"),
        })??;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            interrupt,
        }))
    }
}

struct SqliteSession {
    conn: Option<Connection>,
    interrupt: Arc<InterruptHandle>,
}

/// Interrupts the running statement unless disarmed before drop.
struct InterruptOnDrop(Option<Arc<InterruptHandle>>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            warn!("statement abandoned before completion; interrupting");
            handle.interrupt();
        }
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn run(&mut self, sql: &str, row_limit: usize) -> Result<Vec<StatementResult>, BackendError> {
        let conn = self.conn.take().ok_or_else(|| BackendError::Script {
            message: "session already closed".into(),
        })?;
        let sql = sql.to_string();
        let guard = InterruptOnDrop(Some(self.interrupt.clone()));
        let (conn, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = run_batch(&conn, &sql, row_limit);
            (conn, outcome)
        })
        .await
        .map_err(|e| BackendError::Script {
            message: format!("driver task failed: {e}"),
        })?;
        guard.disarm();
        self.conn = Some(conn);
        Ok(outcome?)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || conn.close())
            .await
            .map_err(|e| BackendError::Release {
                message: format!("driver task failed: {e}"),
            })?
            .map_err(|(_, e)| BackendError::Release {
                message: e.to_string(),
            })
    }
}

fn run_batch(
    conn: &Connection,
    sql: &str,
    row_limit: usize,
) -> Result<Vec<StatementResult>, rusqlite::Error> {
    let mut results = Vec::new();
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            results.push(StatementResult::NoResultSet);
            continue;
        }
        let mut set = ResultSet::new(stmt.column_names().into_iter().map(String::from).collect());
        let width = set.columns.len();
        let mut rows = stmt.raw_query();
        while set.rows.len() < row_limit {
            let Some(row) = rows.next()? else {
                break;
            };
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(to_json(row.get_ref(idx)?));
            }
            set.rows.push(cells);
        }
        results.push(StatementResult::Rows(set));
    }
    Ok(results)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn request(sqlite_path: Option<&str>) -> ConnectRequest {
        let mut params = BTreeMap::new();
        if let Some(path) = sqlite_path {
            params.insert(SQLITE_PATH_PARAM.to_string(), path.to_string());
        }
        ConnectRequest {
            kind: BackendKind::Sql,
            connection_string: String::new(),
            redacted: String::new(),
            params,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn batch_keeps_only_result_producing_statements() {
        let mut session = SqliteConnector.connect(&request(None)).await.unwrap();
        let results = session
            .run(
                "CREATE TABLE t(id INTEGER, name TEXT, raw BLOB, score REAL);
                 INSERT INTO t VALUES (1, 'a', x'0aff', 1.5), (2, NULL, NULL, NULL);
                 SELECT id, name, raw, score FROM t ORDER BY id;",
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], StatementResult::NoResultSet);
        let StatementResult::Rows(set) = &results[2] else {
            panic!("expected rows");
        };
        assert_eq!(set.columns, vec!["id", "name", "raw", "score"]);
        assert_eq!(set.rows[0], vec![json!(1), json!("a"), json!("0aff"), json!(1.5)]);
        assert_eq!(set.rows[1], vec![json!(2), Value::Null, Value::Null, Value::Null]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn row_limit_caps_fetch() {
        let mut session = SqliteConnector.connect(&request(None)).await.unwrap();
        let results = session
            .run(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 250)
                 SELECT x FROM n",
                100,
            )
            .await
            .unwrap();
        let StatementResult::Rows(set) = &results[0] else {
            panic!("expected rows");
        };
        assert_eq!(set.rows.len(), 100);
    }

    #[tokio::test]
    async fn empty_select_still_has_a_result_set() {
        let mut session = SqliteConnector.connect(&request(Some(":memory:"))).await.unwrap();
        let results = session.run("SELECT 1 AS T WHERE 0", 10).await.unwrap();
        assert_eq!(
            results,
            vec![StatementResult::Rows(ResultSet::new(vec!["T".into()]))]
        );
    }

    #[tokio::test]
    async fn file_database_persists_between_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let req = request(path.to_str());

        let mut first = SqliteConnector.connect(&req).await.unwrap();
        first
            .run("CREATE TABLE kv(k TEXT); INSERT INTO kv VALUES ('x')", 10)
            .await
            .unwrap();
        first.close().await.unwrap();

        let mut second = SqliteConnector.connect(&req).await.unwrap();
        let results = second.run("SELECT k FROM kv", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn database_name_alone_never_opens_a_file() {
        let mut req = request(None);
        req.params.insert("server".into(), "db.internal".into());
        req.params.insert("database".into(), "jobwire-unopened-db".into());

        let mut first = SqliteConnector.connect(&req).await.unwrap();
        first.run("CREATE TABLE kv(k TEXT)", 10).await.unwrap();
        first.close().await.unwrap();

        let mut second = SqliteConnector.connect(&req).await.unwrap();
        let err = second.run("SELECT k FROM kv", 10).await.unwrap_err();
        assert!(err.to_string().contains("no such table"), "{err}");
        second.close().await.unwrap();
        assert!(!std::path::Path::new("jobwire-unopened-db").exists());
    }

    #[tokio::test]
    async fn deadline_can_abandon_a_running_statement() {
        let mut session = SqliteConnector.connect(&request(None)).await.unwrap();
        let started = std::time::Instant::now();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            session.run(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 50000000)
                 SELECT count(*) FROM n",
                10,
            ),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn syntax_error_is_script_error() {
        let mut session = SqliteConnector.connect(&request(None)).await.unwrap();
        let err = session.run("SELEC 1", 10).await.unwrap_err();
        assert!(matches!(err, BackendError::Script { .. }));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn unopenable_path_is_connect_error() {
        let err = SqliteConnector
            .connect(&request(Some("/nonexistent-dir/sub/db.sqlite")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Connect { .. }));
    }
}
