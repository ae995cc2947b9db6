//! Serverless function backend.

use super::{check_cancelled, settle, BackendContext, BackendHandler, BackendKind};
use crate::config::FunctionConfig;
use crate::errors::{BackendError, ConfigError};
use crate::model::ResultEnvelope;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const JOBWIRE_USER_AGENT: &str = concat!("jobwire/", env!("CARGO_PKG_VERSION"));
pub const INVOCATION_TYPE_HEADER: &str = "X-Amz-Invocation-Type";

/// Invokes one function with a JSON payload and returns its JSON response.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError>;
}

/// HTTP invoker speaking the function service's invoke endpoint.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    url: String,
    invocation_type: String,
    qualifier: Option<String>,
    access_token: Option<String>,
}

impl HttpInvoker {
    pub fn new(config: &FunctionConfig) -> Result<Self, ConfigError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(JOBWIRE_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(default_headers)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "LAMBDA_ENDPOINT".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: config.invoke_url(),
            invocation_type: config.invocation_type.clone(),
            qualifier: config.qualifier.clone(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl FunctionInvoker for HttpInvoker {
    async fn invoke(&self, payload: &Value) -> Result<Value, BackendError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(INVOCATION_TYPE_HEADER, &self.invocation_type)
            .json(payload);
        if let Some(qualifier) = &self.qualifier {
            request = request.query(&[("Qualifier", qualifier)]);
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "function responded");

        if !status.is_success() {
            return Err(BackendError::Invocation {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Script {
            message: format!("function returned invalid JSON: {e}"),
        })
    }
}

/// JSON scripts are sent as-is; anything else is wrapped under `script`.
pub fn invocation_payload(script: &str) -> Value {
    serde_json::from_str(script).unwrap_or_else(|_| json!({ "script": script }))
}

pub struct FunctionHandler {
    config: FunctionConfig,
    invoker: Arc<dyn FunctionInvoker>,
}

impl FunctionHandler {
    pub fn new(config: FunctionConfig, invoker: Arc<dyn FunctionInvoker>) -> Self {
        Self { config, invoker }
    }

    /// Uses the context's invoker when one is set, otherwise HTTP.
    pub fn from_context(ctx: &BackendContext) -> Result<Box<dyn BackendHandler>, ConfigError> {
        let config = FunctionConfig::from_source(ctx.config())?;
        let invoker: Arc<dyn FunctionInvoker> = match ctx.function_invoker() {
            Some(invoker) => invoker,
            None => Arc::new(HttpInvoker::new(&config)?),
        };
        Ok(Box::new(Self::new(config, invoker)))
    }

    async fn invoke_script(
        &self,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultEnvelope, BackendError> {
        check_cancelled(cancel, "cancelled before execute")?;
        info!(
            function = %self.config.function_name,
            invocation_type = %self.config.invocation_type,
            "invoking Lambda function"
        );
        let response = self.invoker.invoke(&invocation_payload(script)).await?;
        Ok(ResultEnvelope::success(
            "Lambda executed successfully",
            Some(response),
        ))
    }
}

#[async_trait]
impl BackendHandler for FunctionHandler {
    fn kind(&self) -> BackendKind {
        BackendKind::Function
    }

    async fn probe(&self) -> Result<(), BackendError> {
        info!(function = %self.config.function_name, "starting Lambda connection test");
        self.invoker.invoke(&json!({ "ping": true })).await?;
        info!("Lambda connection test succeeded");
        Ok(())
    }

    async fn execute(&self, script: &str, cancel: &CancellationToken) -> ResultEnvelope {
        settle(self.kind(), self.invoke_script(script, cancel).await)
    }
}
