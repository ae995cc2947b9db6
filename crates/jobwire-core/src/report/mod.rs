pub mod progress;

pub use progress::{ProgressEvent, ProgressSink};

use crate::backend::BackendKind;
use crate::errors::{FailureKind, JobError};
use crate::model::ResultEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a job inside a batch. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Final record for one job of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Submission position within the batch.
    pub index: usize,
    pub job_name: String,
    pub created_by: String,
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<ResultEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub duration_ms: u64,
}

/// Identity of a job, captured before it is handed to a worker.
#[derive(Debug, Clone)]
pub(crate) struct JobMeta {
    pub name: String,
    pub created_by: String,
    pub kind: BackendKind,
    pub task_id: Option<String>,
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl JobOutcome {
    pub(crate) fn from_envelope(
        index: usize,
        meta: JobMeta,
        envelope: ResultEnvelope,
        elapsed: Duration,
    ) -> Self {
        let (state, error, failure_kind) = match envelope.error_text() {
            None => (JobState::Completed, None, None),
            Some(text) => (
                JobState::Failed,
                Some(text.to_string()),
                Some(FailureKind::classify_message(text)),
            ),
        };
        Self {
            index,
            job_name: meta.name,
            created_by: meta.created_by,
            kind: meta.kind,
            task_id: meta.task_id,
            state,
            envelope: Some(envelope),
            error,
            failure_kind,
            duration_ms: millis(elapsed),
        }
    }

    pub(crate) fn from_error(index: usize, meta: JobMeta, err: &JobError, elapsed: Duration) -> Self {
        Self {
            index,
            job_name: meta.name,
            created_by: meta.created_by,
            kind: meta.kind,
            task_id: meta.task_id,
            state: JobState::Failed,
            envelope: None,
            error: Some(err.to_string()),
            failure_kind: Some(FailureKind::from(err)),
            duration_ms: millis(elapsed),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Result of one batch: every submitted job has exactly one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Sorted by submission index.
    pub outcomes: Vec<JobOutcome>,
    /// Submission indices in the order jobs finished.
    pub completion_order: Vec<usize>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, index: usize) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|o| o.index == index)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> JobMeta {
        JobMeta {
            name: "j".into(),
            created_by: "ops".into(),
            kind: BackendKind::Warehouse,
            task_id: Some("t-9".into()),
        }
    }

    #[test]
    fn failure_envelope_is_classified() {
        let outcome = JobOutcome::from_envelope(
            0,
            meta(),
            ResultEnvelope::failure("ConnectionRefused: connection refused"),
            Duration::from_millis(12),
        );
        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Connect));
        assert_eq!(outcome.duration_ms, 12);
    }

    #[test]
    fn report_counts_and_serializes() {
        let ok = JobOutcome::from_envelope(
            0,
            meta(),
            ResultEnvelope::success("done", None),
            Duration::ZERO,
        );
        let lost = JobOutcome::from_error(
            1,
            meta(),
            &JobError::Lost {
                detail: "aborted".into(),
            },
            Duration::ZERO,
        );
        let now = Utc::now();
        let report = BatchReport {
            started_at: now,
            finished_at: now,
            outcomes: vec![ok, lost],
            completion_order: vec![1, 0],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.outcome(1).unwrap().failure_kind, Some(FailureKind::Lost));

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["outcomes"][0]["state"], "completed");
        assert_eq!(json["outcomes"][0]["kind"], "snowflake");
        assert_eq!(json["outcomes"][0]["envelope"]["status"], "pass");
        assert_eq!(json["outcomes"][1]["failure_kind"], "lost");
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
