//! Bounded-concurrency runner for external simulation jobs.
//!
//! Each job (one subject under one configuration) runs as one invocation of
//! an external tool. At most `max_concurrency` invocations run at once; their
//! combined output is streamed, classified line by line and handed to an
//! [`observer::Observer`]. The first error-classified line from any job
//! aborts the whole run and rolls back partial artifacts.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, outcome
//!   resolution, the run session state machine). No I/O.
//! - **[`io`]**: Side-effecting operations (config and plan files, job files,
//!   process spawning and termination, cleanup).
//!
//! Orchestration modules ([`scheduler`], [`abort`], [`run`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod abort;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod observer;
pub mod run;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
