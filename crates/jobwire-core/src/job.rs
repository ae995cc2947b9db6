use crate::backend::{BackendHandler, BackendKind, CompletionCallback};
use crate::errors::{ConfigError, JobError};
use crate::model::{JobPayload, ResultEnvelope};
use crate::registry::HandlerRegistry;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One unit of work: a script bound to a freshly constructed handler.
pub struct Job {
    name: String,
    created_by: String,
    task_id: Option<String>,
    script: String,
    handler: Box<dyn BackendHandler>,
    preflight: bool,
}

impl Job {
    /// Pre-flight is off for directly constructed jobs.
    pub fn new(
        name: impl Into<String>,
        created_by: impl Into<String>,
        handler: Box<dyn BackendHandler>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            task_id: None,
            script: script.into(),
            handler,
            preflight: false,
        }
    }

    /// Executor-side reconstruction of a queued payload. Pre-flight is on.
    pub fn from_payload(payload: JobPayload, registry: &HandlerRegistry) -> Result<Self, ConfigError> {
        let handler = registry.create(&payload)?;
        let mut job = Self::new(
            payload.job_name,
            payload.created_by,
            handler,
            payload.execution_script,
        )
        .with_preflight(true);
        job.task_id = payload.task_id;
        Ok(job)
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn kind(&self) -> BackendKind {
        self.handler.kind()
    }

    pub fn preflight(&self) -> bool {
        self.preflight
    }

    /// Probe (when enabled) then execute. Only a failed probe surfaces as an
    /// error; execution failures come back as failure envelopes.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ResultEnvelope, JobError> {
        if self.preflight {
            self.handler
                .probe()
                .await
                .map_err(|source| JobError::Probe {
                    kind: self.kind(),
                    source,
                })?;
            info!(job = %self.name, "pre-flight probe passed");
        }
        Ok(self.handler.execute(&self.script, cancel).await)
    }

    pub fn callback(&self) -> CompletionCallback {
        self.handler.callback()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("created_by", &self.created_by)
            .field("task_id", &self.task_id)
            .field("kind", &self.kind())
            .field("preflight", &self.preflight)
            .finish_non_exhaustive()
    }
}
