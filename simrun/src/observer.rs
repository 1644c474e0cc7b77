//! Run observers: where classified output and job outcomes go.
//!
//! The scheduler calls observers from its control loop, in arrival order.
//! Implementations must not block for long; they delay every other event.

use std::io::{self, Write};

use crate::core::session::RunPhase;
use crate::core::types::{Job, JobOutcome, OutputMessage};
use crate::scheduler::RunSummary;

pub trait Observer {
    fn on_job_started(&mut self, _job: &Job) {}

    fn on_output(&mut self, _message: &OutputMessage) {}

    fn on_job_finished(&mut self, _outcome: &JobOutcome) {}

    fn on_run_finished(&mut self, _summary: &RunSummary) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Prints the live output stream and a final summary.
#[derive(Debug)]
pub struct ConsoleObserver<W: Write> {
    out: W,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    // Write errors are ignored.
    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{line}");
    }
}

impl<W: Write> Observer for ConsoleObserver<W> {
    fn on_job_started(&mut self, job: &Job) {
        self.emit(format_args!("[command] {}: started", job.id));
    }

    fn on_output(&mut self, message: &OutputMessage) {
        self.emit(format_args!(
            "[{}] {}: {}",
            message.category, message.job_id, message.text
        ));
    }

    fn on_job_finished(&mut self, outcome: &JobOutcome) {
        if outcome.succeeded() {
            self.emit(format_args!("[success] {}: finished", outcome.job_id));
            return;
        }
        let reason = outcome.diagnostic.as_deref().unwrap_or("failed");
        self.emit(format_args!("[error] {}: {reason}", outcome.job_id));
    }

    fn on_run_finished(&mut self, summary: &RunSummary) {
        match (summary.phase, &summary.abort) {
            (RunPhase::Aborted, Some(cause)) => {
                self.emit(format_args!("aborted due to: {}", cause.line));
            }
            _ => {
                self.emit(format_args!(
                    "succeeded={} failed={}",
                    summary.succeeded, summary.failed
                ));
            }
        }
        let _ = self.out.flush();
    }
}
