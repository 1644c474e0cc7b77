//! Stable exit codes for simrun CLI commands.

/// Command succeeded; for `run`, every job succeeded.
pub const OK: i32 = 0;
/// Invalid config, plan or arguments, or another error before any job ran.
pub const INVALID: i32 = 1;
/// `simrun run` completed but at least one job failed.
pub const FAILED: i32 = 2;
/// `simrun run` was aborted by an error line.
pub const ABORTED: i32 = 3;
