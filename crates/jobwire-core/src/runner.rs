use crate::backend::{CompletionCallback, JobHandle};
use crate::errors::JobError;
use crate::job::Job;
use crate::model::ResultEnvelope;
use crate::report::progress::{ProgressEvent, ProgressSink};
use crate::report::{BatchReport, JobMeta, JobOutcome, JobState};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

#[derive(Debug, Clone, Default)]
pub struct RunnerPolicy {
    /// Worker pool size. `None` gives every job its own worker.
    pub max_parallel: Option<usize>,
    /// Per-job deadline. `None` waits for the backend indefinitely.
    pub job_timeout: Option<Duration>,
}

impl RunnerPolicy {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = Some(job_timeout);
        self
    }
}

struct Slot {
    meta: JobMeta,
    callback: Option<CompletionCallback>,
    outcome: Option<JobOutcome>,
}

/// Runs a batch of jobs concurrently and waits for all of them.
pub struct ConcurrentRunner {
    policy: RunnerPolicy,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
}

impl Default for ConcurrentRunner {
    fn default() -> Self {
        Self::new(RunnerPolicy::default())
    }
}

impl ConcurrentRunner {
    pub fn new(policy: RunnerPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Jobs still waiting for a worker, or not yet connected or executing,
    /// finish as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Submits every job, then blocks until each reaches a terminal state.
    ///
    /// Each job's completion callback fires exactly once. A failing job never
    /// prevents the others from finishing. Outcomes are returned in submission
    /// order; `completion_order` records the order they finished in.
    pub async fn run_batch(&self, jobs: Vec<Job>) -> BatchReport {
        let started_at = chrono::Utc::now();
        let total = jobs.len();
        let parallel = self.policy.max_parallel.unwrap_or(total).max(1);
        let sem = Arc::new(Semaphore::new(parallel));
        let mut join_set = JoinSet::new();
        let mut slots = Vec::with_capacity(total);

        info!(jobs = total, parallel, "submitting batch");
        for (index, job) in jobs.into_iter().enumerate() {
            slots.push(Slot {
                meta: JobMeta {
                    name: job.name().to_string(),
                    created_by: job.created_by().to_string(),
                    kind: job.kind(),
                    task_id: job.task_id().map(str::to_string),
                },
                callback: Some(job.callback()),
                outcome: None,
            });
            let span = info_span!(
                "job",
                job = %job.name(),
                kind = %job.kind(),
                task_id = job.task_id().unwrap_or("-")
            );
            let sem = sem.clone();
            let cancel = self.cancel.clone();
            let deadline = self.policy.job_timeout;
            join_set.spawn(
                async move {
                    debug!(state = ?JobState::Submitted, "queued");
                    let started = Instant::now();
                    let permit = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        permit = sem.acquire_owned() => Some(permit),
                    };
                    let handle = match permit {
                        Some(Ok(_permit)) => {
                            debug!(state = ?JobState::Running, "picked up by worker");
                            run_with_deadline(&job, &cancel, deadline).await
                        }
                        Some(Err(e)) => Err(JobError::Lost {
                            detail: format!("worker pool closed: {e}"),
                        }),
                        None => Ok(ResultEnvelope::failure(CANCELLED_WHILE_QUEUED)),
                    };
                    (index, handle, started.elapsed())
                }
                .instrument(span),
            );
        }

        let mut completion_order = Vec::with_capacity(total);
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, handle, elapsed)) => {
                    self.complete(index, &mut slots[index], handle, elapsed);
                    completion_order.push(index);
                    self.emit(completion_order.len(), total, index, &slots[index]);
                }
                // Submission index is unknown here; the slot is settled below.
                Err(e) => error!(job = "unknown", error = %e, "worker task failed to join"),
            }
        }

        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.outcome.is_none() {
                let handle = Err(JobError::Lost {
                    detail: "worker task ended without reporting".into(),
                });
                self.complete(index, slot, handle, Duration::ZERO);
                completion_order.push(index);
                self.emit(completion_order.len(), total, index, slot);
            }
        }

        let outcomes: Vec<JobOutcome> = slots.into_iter().filter_map(|s| s.outcome).collect();
        let report = BatchReport {
            started_at,
            finished_at: chrono::Utc::now(),
            outcomes,
            completion_order,
        };
        info!(
            jobs = total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }

    /// Fires the callback, then records the terminal value separately. A
    /// panicking callback is logged and the value is still recorded.
    fn complete(&self, index: usize, slot: &mut Slot, handle: JobHandle, elapsed: Duration) {
        if let Some(callback) = slot.callback.take() {
            match catch_unwind(AssertUnwindSafe(|| callback(&handle))) {
                Ok(returned) => {
                    debug!(job = %slot.meta.name, returned = returned.is_some(), "completion callback done");
                }
                Err(panic) => error!(
                    job = %slot.meta.name,
                    panic = panic_message(panic.as_ref()),
                    "completion callback panicked"
                ),
            }
        }

        let meta = slot.meta.clone();
        let outcome = match handle {
            Ok(envelope) => {
                if envelope.is_success() {
                    info!(job = %meta.name, kind = %meta.kind, "job completed");
                } else {
                    error!(
                        job = %meta.name,
                        kind = %meta.kind,
                        error = envelope.error_text().unwrap_or_default(),
                        "job failed"
                    );
                }
                JobOutcome::from_envelope(index, meta, envelope, elapsed)
            }
            Err(e) => {
                error!(job = %meta.name, kind = %meta.kind, error = %e, "error executing job");
                JobOutcome::from_error(index, meta, &e, elapsed)
            }
        };
        slot.outcome = Some(outcome);
    }

    fn emit(&self, done: usize, total: usize, index: usize, slot: &Slot) {
        if let (Some(sink), Some(outcome)) = (&self.progress, &slot.outcome) {
            sink(ProgressEvent {
                done,
                total,
                index,
                job_name: outcome.job_name.clone(),
                state: outcome.state,
            });
        }
    }
}

const CANCELLED_WHILE_QUEUED: &str = "cancelled while waiting for a worker";

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

async fn run_with_deadline(
    job: &Job,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> JobHandle {
    match deadline {
        Some(limit) => match timeout(limit, job.run(cancel)).await {
            Ok(handle) => handle,
            Err(_) => Err(JobError::TimedOut { elapsed: limit }),
        },
        None => job.run(cancel).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_callback, BackendHandler, BackendKind, ShellHandler};
    use crate::config::ShellConfig;
    use crate::errors::{BackendError, FailureKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sleeps, then succeeds or fails; counts its callback invocations.
    struct Scripted {
        delay: Duration,
        fail: bool,
        probe_fails: bool,
        callback_panics: bool,
        callbacks: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn job(name: &str, delay_ms: u64, fail: bool, callbacks: &Arc<AtomicUsize>) -> Job {
            Job::new(
                name,
                "test",
                Box::new(Scripted {
                    delay: Duration::from_millis(delay_ms),
                    fail,
                    probe_fails: false,
                    callback_panics: false,
                    callbacks: callbacks.clone(),
                }),
                "noop",
            )
        }
    }

    #[async_trait]
    impl BackendHandler for Scripted {
        fn kind(&self) -> BackendKind {
            BackendKind::Shell
        }

        async fn probe(&self) -> Result<(), BackendError> {
            if self.probe_fails {
                return Err(BackendError::Connect {
                    message: "unreachable".into(),
                });
            }
            Ok(())
        }

        async fn execute(&self, _script: &str, cancel: &CancellationToken) -> ResultEnvelope {
            if cancel.is_cancelled() {
                return ResultEnvelope::failure("cancelled before execute");
            }
            tokio::time::sleep(self.delay).await;
            if self.fail {
                ResultEnvelope::failure("script failed: boom")
            } else {
                ResultEnvelope::success("ok", None)
            }
        }

        fn callback(&self) -> CompletionCallback {
            let counter = self.callbacks.clone();
            let panics = self.callback_panics;
            let inner = default_callback(self.kind());
            Box::new(move |handle: &JobHandle| {
                counter.fetch_add(1, Ordering::SeqCst);
                if panics {
                    panic!("callback exploded");
                }
                inner(handle)
            })
        }
    }

    #[tokio::test]
    async fn every_job_finishes_even_when_some_fail() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            Scripted::job("a", 30, false, &callbacks),
            Scripted::job("b", 5, true, &callbacks),
            Scripted::job("c", 15, false, &callbacks),
            Scripted::job("d", 1, true, &callbacks),
        ];
        let report = ConcurrentRunner::default().run_batch(jobs).await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.failed(), 2);
        assert_eq!(callbacks.load(Ordering::SeqCst), 4);
        let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(report.outcomes.iter().all(|o| o.state.is_terminal()));
        assert_eq!(report.outcome(1).unwrap().failure_kind, Some(FailureKind::Script));

        let mut order = report.completion_order.clone();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn completion_order_follows_finish_time() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            Scripted::job("slow", 200, false, &callbacks),
            Scripted::job("fast", 1, false, &callbacks),
        ];
        let report = ConcurrentRunner::default().run_batch(jobs).await;
        assert_eq!(report.completion_order, vec![1, 0]);
    }

    #[tokio::test]
    async fn progress_reports_each_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ProgressSink = Arc::new(move |ev: ProgressEvent| {
            sink_seen.lock().unwrap().push((ev.done, ev.total, ev.state));
        });
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            Scripted::job("a", 1, false, &callbacks),
            Scripted::job("b", 1, true, &callbacks),
        ];
        ConcurrentRunner::default()
            .with_progress(sink)
            .run_batch(jobs)
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[1].0, 2);
        assert!(seen.iter().all(|(_, total, _)| *total == 2));
    }

    #[tokio::test]
    async fn bounded_pool_still_runs_everything() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = (0..6)
            .map(|i| Scripted::job(&format!("j{i}"), 5, false, &callbacks))
            .collect();
        let runner = ConcurrentRunner::new(RunnerPolicy::default().with_max_parallel(2));
        let report = runner.run_batch(jobs).await;
        assert!(report.all_succeeded());
        assert_eq!(callbacks.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn deadline_turns_overrun_into_timeout() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            Scripted::job("stuck", 5_000, false, &callbacks),
            Scripted::job("quick", 1, false, &callbacks),
        ];
        let runner = ConcurrentRunner::new(
            RunnerPolicy::default().with_job_timeout(Duration::from_millis(50)),
        );
        let report = runner.run_batch(jobs).await;
        let stuck = report.outcome(0).unwrap();
        assert_eq!(stuck.state, JobState::Failed);
        assert_eq!(stuck.failure_kind, Some(FailureKind::Timeout));
        assert!(stuck.envelope.is_none());
        assert!(report.outcome(1).unwrap().succeeded());
        assert_eq!(callbacks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn probe_failure_is_recorded_as_failed() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let job = Job::new(
            "probe",
            "test",
            Box::new(Scripted {
                delay: Duration::ZERO,
                fail: false,
                probe_fails: true,
                callback_panics: false,
                callbacks: callbacks.clone(),
            }),
            "noop",
        )
        .with_preflight(true);
        let report = ConcurrentRunner::default().run_batch(vec![job]).await;
        let outcome = report.outcome(0).unwrap();
        assert_eq!(outcome.failure_kind, Some(FailureKind::Probe));
        assert!(outcome.error.as_deref().unwrap().contains("unreachable"));
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_runner_fails_pending_jobs() {
        let runner = ConcurrentRunner::default();
        runner.cancel();
        let jobs = vec![
            Job::new("s1", "t", Box::new(ShellHandler::new(ShellConfig::default())), "ls"),
            Job::new("s2", "t", Box::new(ShellHandler::new(ShellConfig::default())), "ls"),
        ];
        let report = runner.run_batch(jobs).await;
        assert_eq!(report.failed(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.failure_kind == Some(FailureKind::Cancelled)));
    }

    #[tokio::test]
    async fn panicking_callback_does_not_abort_the_batch() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let exploding = Job::new(
            "exploding",
            "test",
            Box::new(Scripted {
                delay: Duration::ZERO,
                fail: false,
                probe_fails: false,
                callback_panics: true,
                callbacks: callbacks.clone(),
            }),
            "noop",
        );
        let shell = Job::new("s1", "t", Box::new(ShellHandler::new(ShellConfig::default())), "ls");

        let report = tokio::spawn(async move {
            ConcurrentRunner::default()
                .run_batch(vec![exploding, shell])
                .await
        })
        .await
        .expect("batch survives a panicking callback");

        assert_eq!(report.total(), 2);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
        assert!(report.outcome(0).unwrap().succeeded());
        assert!(report.outcome(1).unwrap().succeeded());
        assert_eq!(report.completion_order.len(), 2);
    }

    #[tokio::test]
    async fn cancel_releases_jobs_still_waiting_for_a_worker() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let jobs = vec![
            Scripted::job("running", 300, false, &callbacks),
            Scripted::job("queued", 1, false, &callbacks),
        ];
        let runner = ConcurrentRunner::new(RunnerPolicy::default().with_max_parallel(1));
        let token = runner.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let report = runner.run_batch(jobs).await;

        assert_eq!(report.completion_order, vec![1, 0]);
        let queued = report.outcome(1).unwrap();
        assert_eq!(queued.failure_kind, Some(FailureKind::Cancelled));
        assert_eq!(
            queued.envelope.as_ref().unwrap().error_text(),
            Some(CANCELLED_WHILE_QUEUED)
        );
        assert!(report.outcome(0).unwrap().succeeded());
        assert_eq!(callbacks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_report() {
        let report = ConcurrentRunner::default().run_batch(Vec::new()).await;
        assert_eq!(report.total(), 0);
        assert!(report.all_succeeded());
    }
}
