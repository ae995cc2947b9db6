use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time problems: bad payloads, unknown connection types and
/// incomplete backend configuration. Surfaced immediately, never at run time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported connection type: {tag}")]
    UnsupportedConnectionType { tag: String },

    #[error("handler already registered for connection type: {tag}")]
    DuplicateHandler { tag: String },

    #[error("missing config value: {key}")]
    Missing { key: String },

    #[error("invalid config value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("invalid authentication settings: {message}")]
    InvalidAuth { message: String },

    #[error("invalid job payload: {message}")]
    InvalidPayload { message: String },
}

/// Failure raised while talking to a backend. Handlers fold these into a
/// failure envelope before they leave `execute`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connect failed: {message}")]
    Connect { message: String },

    #[error("script failed: {message}")]
    Script { message: String },

    #[error("invocation failed with status {status}: {body}")]
    Invocation { status: u16, body: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("release failed: {message}")]
    Release { message: String },

    #[error("{0}")]
    Cancelled(&'static str),

    #[error("{kind:?}: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Script {
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            BackendError::Connect {
                message: e.to_string(),
            }
        } else if e.is_timeout() {
            BackendError::Io {
                kind: std::io::ErrorKind::TimedOut,
                message: e.to_string(),
            }
        } else {
            BackendError::Transport {
                message: e.to_string(),
            }
        }
    }
}

/// Failures observed by the runner rather than inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("pre-flight probe failed for {kind}: {source}")]
    Probe {
        kind: BackendKind,
        #[source]
        source: BackendError,
    },

    #[error("job timed out after {}s", elapsed.as_secs_f64())]
    TimedOut { elapsed: Duration },

    #[error("job ended without a result: {detail}")]
    Lost { detail: String },
}

/// Coarse failure category recorded in batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    Connect,
    Script,
    Invocation,
    Probe,
    Timeout,
    Cancelled,
    Lost,
    Other,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Config => "config",
            FailureKind::Connect => "connect",
            FailureKind::Script => "script",
            FailureKind::Invocation => "invocation",
            FailureKind::Probe => "probe",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Lost => "lost",
            FailureKind::Other => "other",
        }
    }

    /// Best-effort classification of a failure envelope's error text.
    ///
    /// Messages rendered from [`BackendError`] are classified by their
    /// prefix, so driver text quoted after it never changes the category.
    pub fn classify_message(message: &str) -> Self {
        if let Some((_, kind)) = TYPED_PREFIXES
            .iter()
            .find(|(prefix, _)| message.starts_with(*prefix))
        {
            return *kind;
        }
        let lower = message.to_lowercase();
        if lower.contains("cancelled") {
            FailureKind::Cancelled
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FailureKind::Timeout
        } else if lower.contains("invocation failed") {
            FailureKind::Invocation
        } else if lower.contains("connect")
            || lower.contains("refused")
            || lower.contains("unable to open")
            || lower.contains("dns")
        {
            FailureKind::Connect
        } else if lower.contains("script failed") || lower.contains("syntax") {
            FailureKind::Script
        } else if lower.contains("unsupported connection type") || lower.contains("config") {
            FailureKind::Config
        } else {
            FailureKind::Other
        }
    }
}

const TYPED_PREFIXES: [(&str, FailureKind); 9] = [
    ("script failed:", FailureKind::Script),
    ("connect failed:", FailureKind::Connect),
    ("invocation failed with status", FailureKind::Invocation),
    ("transport error:", FailureKind::Connect),
    ("release failed:", FailureKind::Connect),
    ("cancelled ", FailureKind::Cancelled),
    ("TimedOut:", FailureKind::Timeout),
    ("job timed out", FailureKind::Timeout),
    ("Unsupported connection type", FailureKind::Config),
];

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BackendError> for FailureKind {
    fn from(e: &BackendError) -> Self {
        match e {
            BackendError::Connect { .. } | BackendError::Release { .. } => FailureKind::Connect,
            BackendError::Script { .. } => FailureKind::Script,
            BackendError::Invocation { .. } => FailureKind::Invocation,
            BackendError::Cancelled(_) => FailureKind::Cancelled,
            BackendError::Io { kind, .. } if *kind == std::io::ErrorKind::TimedOut => {
                FailureKind::Timeout
            }
            BackendError::Io { .. } | BackendError::Transport { .. } => FailureKind::Connect,
        }
    }
}

impl From<&JobError> for FailureKind {
    fn from(e: &JobError) -> Self {
        match e {
            JobError::Probe { .. } => FailureKind::Probe,
            JobError::TimedOut { .. } => FailureKind::Timeout,
            JobError::Lost { .. } => FailureKind::Lost,
        }
    }
}
