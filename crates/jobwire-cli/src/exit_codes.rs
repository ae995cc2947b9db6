//! Process exit codes. Part of the CLI contract for schedulers and CI.

pub const EXIT_SUCCESS: i32 = 0;
pub const JOB_FAILED: i32 = 1; // At least one job ended with a fail envelope or error
pub const CONFIG_ERROR: i32 = 2; // Bad payload, unknown connection type or incomplete config
