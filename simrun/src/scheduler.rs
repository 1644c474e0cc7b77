//! Bounded-concurrency control loop.
//!
//! One thread owns the [`RunSession`] and reacts to supervisor events in
//! arrival order. Starting jobs, applying completions and triggering the
//! abort all happen here, so `active <= max_concurrency` holds without locks.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::abort::AbortController;
use crate::core::session::{AbortCause, RunPhase, RunSession};
use crate::core::types::JobOutcome;
use crate::io::cleanup::CleanupReport;
use crate::io::supervisor::{Launcher, SupervisorEvent};
use crate::observer::Observer;

/// Final tally of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub phase: RunPhase,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs still pending when the run ended (non-zero only after an abort).
    pub not_started: usize,
    pub abort: Option<AbortCause>,
    pub elapsed: Duration,
    /// Present when the run was aborted.
    pub cleanup: Option<CleanupReport>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.phase == RunPhase::Aborted
    }

    pub fn all_succeeded(&self) -> bool {
        self.phase == RunPhase::Completed && self.failed == 0
    }
}

pub struct Scheduler<L: Launcher> {
    launcher: L,
    abort: AbortController,
}

struct Loop<'a, H> {
    session: &'a mut RunSession,
    observer: &'a mut dyn Observer,
    handles: HashMap<usize, H>,
    events: Sender<SupervisorEvent>,
}

impl<L: Launcher> Scheduler<L> {
    pub fn new(launcher: L, abort: AbortController) -> Self {
        Self { launcher, abort }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Drive `session` to a terminal phase.
    ///
    /// Never fails: launch errors, failed jobs and aborts are all resolved to
    /// job states or a run-level abort recorded in the summary.
    #[instrument(skip_all, fields(
        jobs = session.jobs().len(),
        max_concurrency = session.max_concurrency()
    ))]
    pub fn run(&self, session: &mut RunSession, observer: &mut dyn Observer) -> RunSummary {
        let (tx, rx) = mpsc::channel();
        let mut state = Loop {
            session,
            observer,
            handles: HashMap::new(),
            events: tx,
        };
        info!("run started");

        self.refill(&mut state);
        while !state.session.is_drained() {
            let Ok(event) = rx.recv() else {
                error!("event channel closed with jobs still active");
                break;
            };
            match event {
                SupervisorEvent::Output(message) => {
                    state.observer.on_output(&message);
                    if let Some(cause) = self.abort.observe(&message) {
                        self.abort.trigger(state.session, cause, &state.handles);
                    }
                }
                SupervisorEvent::Finished(outcome) => {
                    self.complete(&mut state, &outcome);
                    self.refill(&mut state);
                }
            }
        }

        let cleanup = state
            .session
            .is_aborted()
            .then(|| self.abort.rollback(state.session));
        let phase = state.session.finish().unwrap_or_else(|| {
            error!("session not drained at end of run");
            RunPhase::Aborted
        });
        let session = &*state.session;
        let summary = RunSummary {
            phase,
            succeeded: session.succeeded(),
            failed: session.failed(),
            not_started: session.not_started(),
            abort: session.abort_cause().cloned(),
            elapsed: session.elapsed(),
            cleanup,
        };
        info!(
            phase = ?summary.phase,
            succeeded = summary.succeeded,
            failed = summary.failed,
            not_started = summary.not_started,
            "run finished"
        );
        state.observer.on_run_finished(&summary);
        summary
    }

    /// Start queued jobs until every slot is taken or the queue is frozen.
    fn refill(&self, state: &mut Loop<'_, L::Handle>) {
        while let Some(index) = state.session.next_to_start() {
            let job = state.session.job(index);
            let job_id = job.id.clone();
            match self.launcher.start(job, state.events.clone()) {
                Ok(handle) => {
                    state.session.mark_running(index);
                    state.handles.insert(index, handle);
                    debug!(job_id = %job_id, active = state.session.active_len(), "job started");
                    state.observer.on_job_started(state.session.job(index));
                }
                Err(e) => {
                    warn!(job_id = %job_id, err = %e, "launch failed");
                    state.session.mark_launch_failed(index);
                    state
                        .observer
                        .on_job_finished(&JobOutcome::launch_failed(&job_id, e.to_string()));
                }
            }
        }
    }

    fn complete(&self, state: &mut Loop<'_, L::Handle>, outcome: &JobOutcome) {
        let Some(index) = state.session.position(&outcome.job_id) else {
            warn!(job_id = %outcome.job_id, "completion for unknown job");
            return;
        };
        state.handles.remove(&index);
        if state.session.mark_finished(index, outcome) {
            state.observer.on_job_finished(outcome);
        } else {
            warn!(job_id = %outcome.job_id, "duplicate completion ignored");
        }
    }
}
