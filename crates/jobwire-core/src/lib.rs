//! Jobwire core: run heterogeneous scripts against pluggable backends and
//! report a uniform pass/fail envelope per job.

pub mod backend;
pub mod config;
pub mod errors;
pub mod job;
pub mod model;
pub mod registry;
pub mod report;
pub mod runner;

pub use backend::{BackendContext, BackendHandler, BackendKind, CompletionCallback, JobHandle};
pub use errors::{BackendError, ConfigError, FailureKind, JobError};
pub use job::Job;
pub use model::{JobPayload, ResultEnvelope, ResultSet, Status};
pub use registry::HandlerRegistry;
pub use report::{BatchReport, JobOutcome, JobState};
pub use runner::{ConcurrentRunner, RunnerPolicy};
pub use tokio_util::sync::CancellationToken;
