//! `jobwire dispatch`: the executor side of the queue boundary.

use crate::cli::args::DispatchArgs;
use crate::exit_codes::{CONFIG_ERROR, EXIT_SUCCESS, JOB_FAILED};
use anyhow::Context;
use jobwire_core::{CancellationToken, Job, JobPayload, ResultEnvelope};
use tracing::error;

pub async fn run(args: DispatchArgs) -> anyhow::Result<i32> {
    let raw = match (&args.payload, &args.payload_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read payload file {}", path.display()))?,
        (None, None) => anyhow::bail!("either --payload or --payload-file is required"),
    };

    let job = match JobPayload::from_json(&raw).and_then(|payload| {
        let registry = super::build_registry()?;
        Job::from_payload(payload, &registry)
    }) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };

    let envelope = match job.run(&CancellationToken::new()).await {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(job = %job.name(), kind = %job.kind(), error = %e, "error executing job");
            ResultEnvelope::failure(e.to_string())
        }
    };

    println!("{}", envelope.to_json()?);
    Ok(if envelope.is_success() {
        EXIT_SUCCESS
    } else {
        JOB_FAILED
    })
}
