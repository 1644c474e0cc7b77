//! Per-run bookkeeping: queue, active set, counters and terminal phase.
//!
//! A [`RunSession`] is mutated only by the scheduler's control loop, so the
//! concurrency bound is enforced here without locking. Once the session has
//! reached a terminal phase every mutator is a no-op.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Result, bail};

use crate::core::types::{Job, JobOutcome, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    Completed,
    Aborted,
}

/// The first error line that aborted a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortCause {
    pub job_id: String,
    pub line: String,
}

#[derive(Debug)]
pub struct RunSession {
    jobs: Vec<Job>,
    queue: VecDeque<usize>,
    active: BTreeSet<usize>,
    max_concurrency: usize,
    abort: Option<AbortCause>,
    /// Jobs that were pending or running when the abort fired.
    rollback: Vec<usize>,
    succeeded: usize,
    failed: usize,
    started_at: SystemTime,
    clock: Instant,
    phase: RunPhase,
}

impl RunSession {
    /// Create a session with every job pending, in submission order.
    pub fn new(jobs: Vec<Job>, max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            bail!("max_concurrency must be > 0");
        }
        if let Some(job) = jobs.iter().find(|job| job.state != JobState::Pending) {
            bail!("job {} must start pending (got {:?})", job.id, job.state);
        }
        let mut seen = BTreeSet::new();
        for job in &jobs {
            if !seen.insert(job.id.as_str()) {
                bail!("duplicate job id {}", job.id);
            }
        }
        Ok(Self {
            queue: (0..jobs.len()).collect(),
            jobs,
            active: BTreeSet::new(),
            max_concurrency,
            abort: None,
            rollback: Vec::new(),
            succeeded: 0,
            failed: 0,
            started_at: SystemTime::now(),
            clock: Instant::now(),
            phase: RunPhase::Running,
        })
    }

    /// Pop the next job to launch if a slot is free and the run is not aborted.
    ///
    /// The caller must follow up with [`mark_running`](Self::mark_running) or
    /// [`mark_launch_failed`](Self::mark_launch_failed).
    pub fn next_to_start(&mut self) -> Option<usize> {
        if self.phase != RunPhase::Running
            || self.abort.is_some()
            || self.active.len() >= self.max_concurrency
        {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn mark_running(&mut self, index: usize) {
        if self.phase != RunPhase::Running || self.abort.is_some() {
            return;
        }
        if self.jobs[index].state == JobState::Pending {
            self.jobs[index].state = JobState::Running;
            self.active.insert(index);
        }
    }

    /// Record a launch failure: the job goes straight to `Failed`.
    pub fn mark_launch_failed(&mut self, index: usize) {
        if self.phase != RunPhase::Running {
            return;
        }
        if self.jobs[index].state == JobState::Pending {
            self.jobs[index].state = JobState::Failed;
            self.failed += 1;
        }
    }

    /// Apply a completion notification. Returns `false` for unknown or
    /// already-finished jobs.
    pub fn mark_finished(&mut self, index: usize, outcome: &JobOutcome) -> bool {
        if self.phase != RunPhase::Running || !self.active.remove(&index) {
            return false;
        }
        if outcome.succeeded() {
            self.jobs[index].state = JobState::Succeeded;
            self.succeeded += 1;
        } else {
            self.jobs[index].state = JobState::Failed;
            self.failed += 1;
        }
        true
    }

    /// Latch the abort. Only the first call has any effect.
    pub fn abort(&mut self, cause: AbortCause) -> bool {
        if self.phase != RunPhase::Running || self.abort.is_some() {
            return false;
        }
        self.rollback = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| matches!(job.state, JobState::Pending | JobState::Running))
            .map(|(index, _)| index)
            .collect();
        self.abort = Some(cause);
        true
    }

    /// Whether every started job has reported back and nothing more will start.
    pub fn is_drained(&self) -> bool {
        self.active.is_empty() && (self.queue.is_empty() || self.abort.is_some())
    }

    /// Move to the terminal phase once drained.
    pub fn finish(&mut self) -> Option<RunPhase> {
        if self.phase != RunPhase::Running {
            return Some(self.phase);
        }
        if !self.is_drained() {
            return None;
        }
        self.phase = if self.abort.is_some() {
            RunPhase::Aborted
        } else {
            RunPhase::Completed
        };
        Some(self.phase)
    }

    pub fn position(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == job_id)
    }

    pub fn job(&self, index: usize) -> &Job {
        &self.jobs[index]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.iter().copied()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn abort_cause(&self) -> Option<&AbortCause> {
        self.abort.as_ref()
    }

    /// Jobs to roll back after an abort, in submission order.
    pub fn rollback_jobs(&self) -> impl Iterator<Item = &Job> {
        self.rollback.iter().map(|index| &self.jobs[*index])
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn not_started(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Pending)
            .count()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed_outcome, job, ok_outcome};

    fn session(count: usize, bound: usize) -> RunSession {
        let jobs = (1..=count).map(|n| job("101", &format!("c{n}"))).collect();
        RunSession::new(jobs, bound).expect("session")
    }

    #[test]
    fn empty_session_completes_immediately() {
        let mut s = session(0, 2);
        assert_eq!(s.next_to_start(), None);
        assert_eq!(s.finish(), Some(RunPhase::Completed));
        assert_eq!((s.succeeded(), s.failed()), (0, 0));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = RunSession::new(Vec::new(), 0).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = RunSession::new(vec![job("101", "a"), job("101", "a")], 1).unwrap_err();
        assert!(err.to_string().contains("duplicate job id"));
    }

    #[test]
    fn starts_respect_bound_and_queue_order() {
        let mut s = session(3, 2);
        let first = s.next_to_start().expect("first");
        s.mark_running(first);
        let second = s.next_to_start().expect("second");
        s.mark_running(second);
        assert_eq!((first, second), (0, 1));
        assert_eq!(s.next_to_start(), None);
        assert_eq!(s.active_len(), 2);

        assert!(s.mark_finished(1, &ok_outcome("101_c2")));
        assert_eq!(s.next_to_start(), Some(2));
    }

    #[test]
    fn launch_failure_does_not_consume_a_slot() {
        let mut s = session(2, 1);
        let index = s.next_to_start().expect("index");
        s.mark_launch_failed(index);
        assert_eq!(s.job(index).state, JobState::Failed);
        assert_eq!(s.failed(), 1);
        assert_eq!(s.next_to_start(), Some(1));
    }

    #[test]
    fn finish_is_reported_once() {
        let mut s = session(1, 1);
        let index = s.next_to_start().expect("index");
        s.mark_running(index);
        assert!(s.mark_finished(index, &failed_outcome("101_c1")));
        assert!(!s.mark_finished(index, &failed_outcome("101_c1")));
        assert_eq!(s.failed(), 1);
        assert_eq!(s.finish(), Some(RunPhase::Completed));
    }

    #[test]
    fn abort_freezes_queue_and_records_rollback() {
        let mut s = session(4, 2);
        for _ in 0..2 {
            let index = s.next_to_start().expect("index");
            s.mark_running(index);
        }
        assert!(s.abort(AbortCause {
            job_id: "101_c2".to_string(),
            line: "[ERROR] disk full".to_string(),
        }));
        assert!(!s.abort(AbortCause {
            job_id: "101_c1".to_string(),
            line: "[ERROR] later".to_string(),
        }));
        assert_eq!(s.next_to_start(), None);
        assert_eq!(s.finish(), None);

        let ids: Vec<&str> = s.rollback_jobs().map(|job| job.id.as_str()).collect();
        assert_eq!(ids, vec!["101_c1", "101_c2", "101_c3", "101_c4"]);

        s.mark_finished(0, &failed_outcome("101_c1"));
        s.mark_finished(1, &failed_outcome("101_c2"));
        assert_eq!(s.finish(), Some(RunPhase::Aborted));
        assert_eq!(s.not_started(), 2);
        assert_eq!(s.abort_cause().map(|c| c.line.as_str()), Some("[ERROR] disk full"));
    }

    #[test]
    fn terminal_session_ignores_mutations() {
        let mut s = session(1, 1);
        let index = s.next_to_start().expect("index");
        s.mark_running(index);
        s.mark_finished(index, &ok_outcome("101_c1"));
        assert_eq!(s.finish(), Some(RunPhase::Completed));
        assert!(!s.abort(AbortCause {
            job_id: "101_c1".to_string(),
            line: "[ERROR] too late".to_string(),
        }));
        assert_eq!(s.phase(), RunPhase::Completed);
        assert_eq!(s.succeeded(), 1);
    }
}
