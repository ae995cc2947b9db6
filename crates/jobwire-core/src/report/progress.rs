//! Progress reporting for batch runs. The runner emits one event per finished
//! job in completion order; the CLI renders them.

use super::JobState;
use std::sync::Arc;

/// One progress update: how many jobs are done, and which one just finished.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub index: usize,
    pub job_name: String,
    pub state: JobState,
}

/// Sink for progress events. Runner calls this each time a job completes.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
