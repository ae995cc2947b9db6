use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Job list (.yaml, .yml or .json), each entry a job payload
    #[arg(long)]
    pub jobs: PathBuf,

    /// Maximum jobs in flight (default: all at once)
    #[arg(long, env = "JOBWIRE_PARALLEL")]
    pub parallel: Option<usize>,

    /// Per-job deadline in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Skip the backend reachability probe before each job
    #[arg(long)]
    pub no_preflight: bool,

    /// Write the batch report as JSON
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct DispatchArgs {
    /// Payload JSON
    #[arg(long)]
    pub payload: Option<String>,

    /// File containing the payload JSON
    #[arg(long)]
    pub payload_file: Option<PathBuf>,
}
