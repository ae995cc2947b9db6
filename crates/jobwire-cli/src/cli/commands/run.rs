use crate::cli::args::RunArgs;
use crate::exit_codes::{CONFIG_ERROR, EXIT_SUCCESS, JOB_FAILED};
use anyhow::Context;
use jobwire_core::report::{ProgressEvent, ProgressSink};
use jobwire_core::{
    BatchReport, ConcurrentRunner, Job, JobOutcome, JobPayload, JobState, RunnerPolicy,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let payloads = match load_payloads(&args.jobs) {
        Ok(payloads) => payloads,
        Err(e) => {
            eprintln!("config error: {e:#}");
            return Ok(CONFIG_ERROR);
        }
    };

    let registry = match super::build_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let mut jobs = Vec::with_capacity(payloads.len());
    for mut payload in payloads {
        if payload.task_id.is_none() {
            payload.task_id = Some(uuid::Uuid::new_v4().to_string());
        }
        let name = payload.job_name.clone();
        match Job::from_payload(payload, &registry) {
            Ok(job) => jobs.push(job.with_preflight(!args.no_preflight)),
            Err(e) => {
                eprintln!("config error in job '{name}': {e}");
                return Ok(CONFIG_ERROR);
            }
        }
    }

    let mut policy = RunnerPolicy::default();
    if let Some(parallel) = args.parallel {
        policy = policy.with_max_parallel(parallel);
    }
    if let Some(secs) = args.timeout_secs {
        policy = policy.with_job_timeout(Duration::from_secs(secs));
    }

    let sink: ProgressSink = Arc::new(|ev: ProgressEvent| {
        eprintln!(
            "[{}/{}] {} {}",
            ev.done,
            ev.total,
            ev.job_name,
            if ev.state == JobState::Completed {
                "done"
            } else {
                "failed"
            }
        );
    });
    let report = ConcurrentRunner::new(policy)
        .with_progress(sink)
        .run_batch(jobs)
        .await;

    for outcome in &report.outcomes {
        println!("{}", summary_line(outcome));
    }
    println!(
        "{} jobs: {} passed, {} failed",
        report.total(),
        report.succeeded(),
        report.failed()
    );

    let mut code = if report.all_succeeded() {
        EXIT_SUCCESS
    } else {
        JOB_FAILED
    };
    // Jobs have already run here; a report write failure counts as a run failure.
    if let Some(out) = &args.out {
        if let Err(e) = write_report(&report, out) {
            eprintln!("error: {e:#}");
            code = JOB_FAILED;
        }
    }
    Ok(code)
}

fn write_report(report: &BatchReport, out: &Path) -> anyhow::Result<()> {
    let json = report.to_json_pretty()?;
    std::fs::write(out, json).with_context(|| format!("failed to write report {}", out.display()))
}

fn load_payloads(path: &Path) -> anyhow::Result<Vec<JobPayload>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let payloads: Vec<JobPayload> = if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid job list in {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid job list in {}", path.display()))?
    };
    Ok(payloads)
}

fn summary_line(outcome: &JobOutcome) -> String {
    let status = if outcome.succeeded() { "pass" } else { "fail" };
    let mut line = format!(
        "[{status}] {} ({}) {}ms",
        outcome.job_name, outcome.kind, outcome.duration_ms
    );
    if let Some(error) = &outcome.error {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}
