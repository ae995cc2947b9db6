use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire status of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "pass")]
    Success,
    #[serde(rename = "fail")]
    Failure,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "pass",
            Status::Failure => "fail",
        }
    }
}

/// Uniform outcome of executing one job against a backend.
///
/// Success and failure are separate variants, so an envelope can never carry
/// both a success message and an error. On the wire it is the flat
/// `{status, success_text, error_text, data}` record; contradictory records are
/// rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeWire", into = "EnvelopeWire")]
pub enum ResultEnvelope {
    Success { message: String, data: Option<Value> },
    Failure { error: String },
}

impl ResultEnvelope {
    /// Null data is treated as absent.
    pub fn success(message: impl Into<String>, data: Option<Value>) -> Self {
        ResultEnvelope::Success {
            message: message.into(),
            data: data.filter(|v| !v.is_null()),
        }
    }

    /// Success carrying the result sets of a script, in statement order.
    pub fn with_result_sets(message: impl Into<String>, sets: Vec<ResultSet>) -> Self {
        Self::success(message, serde_json::to_value(sets).ok())
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error
        };
        ResultEnvelope::Failure { error }
    }

    pub fn status(&self) -> Status {
        match self {
            ResultEnvelope::Success { .. } => Status::Success,
            ResultEnvelope::Failure { .. } => Status::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success { .. })
    }

    pub fn success_text(&self) -> Option<&str> {
        match self {
            ResultEnvelope::Success { message, .. } => Some(message),
            ResultEnvelope::Failure { .. } => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match self {
            ResultEnvelope::Success { .. } => None,
            ResultEnvelope::Failure { error } => Some(error),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ResultEnvelope::Success { data, .. } => data.as_ref(),
            ResultEnvelope::Failure { .. } => None,
        }
    }

    /// Decodes `data` back into result sets when it has the tabular shape.
    pub fn result_sets(&self) -> Option<Vec<ResultSet>> {
        serde_json::from_value(self.data()?.clone()).ok()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Flat wire shape of [`ResultEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeWire {
    pub status: Status,
    #[serde(default)]
    pub success_text: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed result envelope: {0}")]
pub struct EnvelopeError(String);

fn present(text: Option<&String>) -> bool {
    text.is_some_and(|t| !t.is_empty())
}

impl TryFrom<EnvelopeWire> for ResultEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: EnvelopeWire) -> Result<Self, Self::Error> {
        match wire.status {
            Status::Success => {
                if present(wire.error_text.as_ref()) {
                    return Err(EnvelopeError(
                        "pass envelope must not carry error_text".into(),
                    ));
                }
                Ok(ResultEnvelope::success(
                    wire.success_text.unwrap_or_default(),
                    wire.data,
                ))
            }
            Status::Failure => {
                if present(wire.success_text.as_ref()) {
                    return Err(EnvelopeError(
                        "fail envelope must not carry success_text".into(),
                    ));
                }
                if wire.data.as_ref().is_some_and(|d| !d.is_null()) {
                    return Err(EnvelopeError("fail envelope must not carry data".into()));
                }
                match wire.error_text {
                    Some(error) if !error.is_empty() => Ok(ResultEnvelope::Failure { error }),
                    _ => Err(EnvelopeError("fail envelope requires error_text".into())),
                }
            }
        }
    }
}

impl From<ResultEnvelope> for EnvelopeWire {
    fn from(envelope: ResultEnvelope) -> Self {
        match envelope {
            ResultEnvelope::Success { message, data } => EnvelopeWire {
                status: Status::Success,
                success_text: Some(message),
                error_text: None,
                data,
            },
            ResultEnvelope::Failure { error } => EnvelopeWire {
                status: Status::Failure,
                success_text: None,
                error_text: Some(error),
                data: None,
            },
        }
    }
}

/// One tabular result: column names plus rows of JSON cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Drops rows past `limit`. Returns true when anything was dropped.
    pub fn truncate(&mut self, limit: usize) -> bool {
        if self.rows.len() > limit {
            self.rows.truncate(limit);
            true
        } else {
            false
        }
    }
}

/// Job description as submitted by producers and task queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub connection_type: String,
    pub execution_script: String,
    pub created_by: String,
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl JobPayload {
    pub fn new(
        connection_type: impl Into<String>,
        job_name: impl Into<String>,
        created_by: impl Into<String>,
        execution_script: impl Into<String>,
    ) -> Self {
        Self {
            connection_type: connection_type.into(),
            execution_script: execution_script.into(),
            created_by: created_by.into(),
            job_name: job_name.into(),
            task_id: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidPayload {
            message: e.to_string(),
        })
    }
}
