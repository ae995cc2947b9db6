//! Backend configuration objects.
//!
//! Every config is a plain struct built either field by field (`new` plus
//! `with_*`) or from a [`ConfigSource`]. Handlers only ever see the finished,
//! validated object.

use crate::backend::sqlite::SQLITE_PATH_PARAM;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Key/value lookup that configuration is read from.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed key/value map, for tests and embedders that do not use env vars.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Blank values count as absent.
fn optional(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(source: &dyn ConfigSource, key: &str) -> Result<String, ConfigError> {
    optional(source, key).ok_or_else(|| ConfigError::Missing {
        key: key.to_string(),
    })
}

fn parsed<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(source, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn flag(source: &dyn ConfigSource, key: &str) -> bool {
    optional(source, key).is_some_and(|v| {
        let v = v.to_ascii_lowercase();
        v == "1" || v == "yes" || v == "true"
    })
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

pub const DEFAULT_SQL_SERVER_PORT: u16 = 1433;
pub const DEFAULT_SQL_SERVER_DRIVER: &str = "ODBC Driver 17 for SQL Server";

fn default_port() -> u16 {
    DEFAULT_SQL_SERVER_PORT
}

fn default_driver() -> String {
    DEFAULT_SQL_SERVER_DRIVER.to_string()
}

/// Relational (SQL Server style) backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlServerConfig {
    pub server: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub trusted_connection: bool,
    /// Local SQLite file for the bundled driver.
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

impl SqlServerConfig {
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            user: None,
            password: None,
            port: DEFAULT_SQL_SERVER_PORT,
            driver: default_driver(),
            trusted_connection: false,
            sqlite_path: None,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_trusted_connection(mut self, trusted: bool) -> Self {
        self.trusted_connection = trusted;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_sqlite_path(mut self, path: impl Into<String>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let cfg = Self {
            server: required(source, "SQL_SERVER_SERVER")?,
            database: required(source, "SQL_SERVER_DATABASE")?,
            user: optional(source, "SQL_SERVER_USER"),
            password: optional(source, "SQL_SERVER_PASSWORD"),
            port: parsed(source, "SQL_SERVER_PORT", DEFAULT_SQL_SERVER_PORT)?,
            driver: optional(source, "SQL_SERVER_DRIVER").unwrap_or_else(default_driver),
            trusted_connection: flag(source, "SQL_SERVER_TRUSTED_CONNECTION"),
            sqlite_path: optional(source, "SQL_SERVER_SQLITE_PATH"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Trusted connections carry no credentials; all others carry both.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let no_user = is_blank(self.user.as_ref());
        let no_password = is_blank(self.password.as_ref());
        if self.trusted_connection {
            if !no_user || !no_password {
                return Err(ConfigError::InvalidAuth {
                    message: "user and password must be empty when trusted_connection is set"
                        .into(),
                });
            }
        } else if no_user || no_password {
            return Err(ConfigError::InvalidAuth {
                message: "user and password are required unless trusted_connection is set".into(),
            });
        }
        Ok(())
    }

    fn server_part(&self) -> String {
        if self.port == DEFAULT_SQL_SERVER_PORT {
            self.server.clone()
        } else {
            format!("{},{}", self.server, self.port)
        }
    }

    fn render(&self, password: &str) -> String {
        let base = format!(
            "DRIVER={{{}}};SERVER={};DATABASE={};",
            self.driver,
            self.server_part(),
            self.database
        );
        if self.trusted_connection {
            format!("{base}Trusted_Connection=yes;")
        } else {
            format!(
                "{base}UID={};PWD={};",
                self.user.as_deref().unwrap_or_default(),
                password
            )
        }
    }

    pub fn connection_string(&self) -> String {
        self.render(self.password.as_deref().unwrap_or_default())
    }

    pub fn redacted_connection_string(&self) -> String {
        self.render("***")
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("server".into(), self.server.clone());
        params.insert("database".into(), self.database.clone());
        params.insert("port".into(), self.port.to_string());
        params.insert("driver".into(), self.driver.clone());
        if let Some(user) = &self.user {
            params.insert("user".into(), user.clone());
        }
        if let Some(path) = &self.sqlite_path {
            params.insert(SQLITE_PATH_PARAM.into(), path.clone());
        }
        params
    }
}

/// Cloud warehouse (Snowflake style) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub user: String,
    pub password: String,
    pub account: String,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Local SQLite file for the bundled driver.
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

impl WarehouseConfig {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            account: account.into(),
            warehouse: None,
            database: None,
            schema: None,
            role: None,
            sqlite_path: None,
        }
    }

    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_sqlite_path(mut self, path: impl Into<String>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            user: required(source, "SNOWFLAKE_USER")?,
            password: required(source, "SNOWFLAKE_PASSWORD")?,
            account: required(source, "SNOWFLAKE_ACCOUNT")?,
            warehouse: optional(source, "SNOWFLAKE_WAREHOUSE"),
            database: optional(source, "SNOWFLAKE_DATABASE"),
            schema: optional(source, "SNOWFLAKE_SCHEMA"),
            role: optional(source, "SNOWFLAKE_ROLE"),
            sqlite_path: optional(source, "SNOWFLAKE_SQLITE_PATH"),
        })
    }

    fn render(&self, password: &str) -> String {
        let mut out = format!(
            "account={};user={};password={};",
            self.account, self.user, password
        );
        for (key, value) in [
            ("warehouse", &self.warehouse),
            ("database", &self.database),
            ("schema", &self.schema),
            ("role", &self.role),
        ] {
            if let Some(value) = value {
                out.push_str(&format!("{key}={value};"));
            }
        }
        out
    }

    pub fn connection_string(&self) -> String {
        self.render(&self.password)
    }

    pub fn redacted_connection_string(&self) -> String {
        self.render("***")
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("account".into(), self.account.clone());
        params.insert("user".into(), self.user.clone());
        for (key, value) in [
            ("warehouse", &self.warehouse),
            ("database", &self.database),
            ("schema", &self.schema),
            ("role", &self.role),
            (SQLITE_PATH_PARAM, &self.sqlite_path),
        ] {
            if let Some(value) = value {
                params.insert(key.into(), value.clone());
            }
        }
        params
    }
}

pub const DEFAULT_FUNCTION_REGION: &str = "us-east-1";
pub const DEFAULT_INVOCATION_TYPE: &str = "RequestResponse";
pub const DEFAULT_FUNCTION_TIMEOUT_SECS: u64 = 30;

/// Serverless function (Lambda style) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub region: String,
    pub function_name: String,
    pub invocation_type: String,
    #[serde(default)]
    pub qualifier: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl FunctionConfig {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            region: DEFAULT_FUNCTION_REGION.to_string(),
            function_name: function_name.into(),
            invocation_type: DEFAULT_INVOCATION_TYPE.to_string(),
            qualifier: None,
            endpoint: default_endpoint(DEFAULT_FUNCTION_REGION),
            access_token: None,
            timeout_secs: DEFAULT_FUNCTION_TIMEOUT_SECS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_invocation_type(mut self, invocation_type: impl Into<String>) -> Self {
        self.invocation_type = invocation_type.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let region =
            optional(source, "AWS_REGION").unwrap_or_else(|| DEFAULT_FUNCTION_REGION.to_string());
        let endpoint = optional(source, "LAMBDA_ENDPOINT")
            .unwrap_or_else(|| default_endpoint(&region))
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            function_name: required(source, "LAMBDA_FUNCTION_NAME")?,
            invocation_type: optional(source, "LAMBDA_INVOCATION_TYPE")
                .unwrap_or_else(|| DEFAULT_INVOCATION_TYPE.to_string()),
            qualifier: optional(source, "LAMBDA_QUALIFIER"),
            access_token: optional(source, "LAMBDA_ACCESS_TOKEN"),
            timeout_secs: parsed(source, "LAMBDA_TIMEOUT_SECS", DEFAULT_FUNCTION_TIMEOUT_SECS)?,
            region,
            endpoint,
        })
    }

    pub fn invoke_url(&self) -> String {
        format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.endpoint.trim_end_matches('/'),
            self.function_name
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_endpoint(region: &str) -> String {
    format!("https://lambda.{region}.amazonaws.com")
}

pub const DEFAULT_SHELL_SERVER: &str = "localhost";

/// Remote shell target settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    pub server_name: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_SHELL_SERVER.to_string(),
        }
    }
}

impl ShellConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            server_name: optional(source, "SHELL_SERVER_NAME")
                .unwrap_or_else(|| DEFAULT_SHELL_SERVER.to_string()),
        })
    }
}
