//! Fail-fast abort: the first error-classified line stops the whole run.
//!
//! Any job's error aborts every job in the run, including healthy ones. The
//! controller freezes the queue, terminates every active job and, once the
//! scheduler has drained the active set, rolls back partial artifacts.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::session::{AbortCause, RunSession};
use crate::core::types::{Category, Job, OutputMessage};
use crate::io::cleanup::{CleanupManager, CleanupReport};
use crate::io::layout::Layout;
use crate::io::supervisor::JobHandle;

#[derive(Debug, Clone)]
pub struct AbortController {
    layout: Layout,
    escalate_after: Duration,
}

impl AbortController {
    pub fn new(layout: Layout, escalate_after: Duration) -> Self {
        Self {
            layout,
            escalate_after,
        }
    }

    pub fn escalate_after(&self) -> Duration {
        self.escalate_after
    }

    /// Whether `message` should abort the run.
    pub fn observe(&self, message: &OutputMessage) -> Option<AbortCause> {
        (message.category == Category::Error).then(|| AbortCause {
            job_id: message.job_id.clone(),
            line: message.text.clone(),
        })
    }

    /// Latch the abort and stop every active job.
    ///
    /// Returns `false` when the run was already aborted or finished. Jobs are
    /// terminated in parallel, so this returns within one escalation bound
    /// regardless of how many are active.
    #[instrument(skip_all, fields(job_id = %cause.job_id))]
    pub fn trigger<H: JobHandle>(
        &self,
        session: &mut RunSession,
        cause: AbortCause,
        handles: &HashMap<usize, H>,
    ) -> bool {
        let line = cause.line.clone();
        if !session.abort(cause) {
            return false;
        }
        warn!(line = %line, "error output, aborting run");
        let targets: Vec<&H> = session
            .active()
            .filter_map(|index| handles.get(&index))
            .collect();
        info!(active = targets.len(), "terminating active jobs");
        let escalate_after = self.escalate_after;
        thread::scope(|scope| {
            for handle in targets {
                scope.spawn(move || handle.terminate(escalate_after));
            }
        });
        true
    }

    /// Remove partial artifacts of every job caught by the abort.
    pub fn rollback(&self, session: &RunSession) -> CleanupReport {
        let jobs: Vec<&Job> = session.rollback_jobs().collect();
        CleanupManager::new(self.layout.clone(), session.started_at()).cleanup(&jobs)
    }
}
