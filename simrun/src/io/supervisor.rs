//! Launching and supervising one simulation process per job.
//!
//! The [`Launcher`] trait decouples the scheduler from process spawning.
//! [`ProcessSupervisor`] is the real backend; tests use scripted launchers
//! that emit predetermined output without spawning anything.

use std::fs::{self, File};
use std::io::{ErrorKind, PipeReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::classifier::classify;
use crate::core::line::sanitize_line;
use crate::core::outcome::{ExitReport, resolve_outcome};
use crate::core::types::{Job, JobOutcome, OutputMessage};
use crate::io::config::ToolConfig;
use crate::io::job_file::{JobSpecFile, read_result, write_job_spec};
use crate::io::layout::{JobPaths, Layout};
use crate::io::process::{ExitLatch, GroupedChild, Stop, signal_tree, spawn_grouped};

/// How long `terminate` waits after the forced kill before giving up.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to keep draining output after the tool itself has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Notifications sent from job workers to the scheduler.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Output(OutputMessage),
    /// Sent exactly once per started job.
    Finished(JobOutcome),
}

/// A job that could not be started. The job never reaches `Running`.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("job {job_id}: failed to prepare working directory: {reason}")]
    Prepare { job_id: String, reason: String },

    #[error("job {job_id}: failed to write job specification: {reason}")]
    SpecWrite { job_id: String, reason: String },

    #[error("job {job_id}: failed to spawn tool: {reason}")]
    Spawn { job_id: String, reason: String },
}

/// Forced kill was sent but the exit was never observed.
#[derive(Debug, thiserror::Error)]
#[error("job {job_id}: process group {pid} not confirmed dead {waited:?} after forced kill")]
pub struct TerminationFailure {
    pub job_id: String,
    pub pid: u32,
    pub waited: Duration,
}

/// Abstraction over job execution backends.
pub trait Launcher {
    type Handle: JobHandle;

    /// Start `job` without blocking on it. Output and the single completion
    /// notification are delivered through `events`.
    fn start(&self, job: &Job, events: Sender<SupervisorEvent>)
    -> Result<Self::Handle, LaunchError>;
}

/// Control handle for a started job.
pub trait JobHandle: Send + Sync {
    fn job_id(&self) -> &str;

    /// Stop the job and everything it spawned.
    ///
    /// Returns within `escalate_after` plus a fixed grace period even when the
    /// forced kill cannot be confirmed.
    fn terminate(&self, escalate_after: Duration);
}

/// Launches the configured tool as an external process.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    tool: ToolConfig,
    layout: Layout,
}

impl ProcessSupervisor {
    pub fn new(tool: ToolConfig, layout: Layout) -> Self {
        Self { tool, layout }
    }

    fn command(&self, paths: &JobPaths) -> Option<Command> {
        let (program, args) = self.tool.command.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&paths.spec_path)
            .arg(&paths.result_path)
            .envs(&self.tool.env);
        Some(cmd)
    }
}

impl Launcher for ProcessSupervisor {
    type Handle = ProcessHandle;

    #[instrument(skip_all, fields(job_id = %job.id))]
    fn start(
        &self,
        job: &Job,
        events: Sender<SupervisorEvent>,
    ) -> Result<ProcessHandle, LaunchError> {
        let paths = self.layout.job_paths(job);
        prepare_work_dir(&paths).map_err(|reason| LaunchError::Prepare {
            job_id: job.id.clone(),
            reason,
        })?;

        let spec = JobSpecFile::for_job(job, &paths.output_dir);
        write_job_spec(&paths.spec_path, &spec).map_err(|e| LaunchError::SpecWrite {
            job_id: job.id.clone(),
            reason: format!("{e:#}"),
        })?;

        let cmd = self.command(&paths).ok_or_else(|| LaunchError::Spawn {
            job_id: job.id.clone(),
            reason: "tool command is empty".to_string(),
        })?;
        let tee = open_stream_log(&paths.log_path);
        let fallback_log = tee.as_ref().map(|_| paths.log_path.clone());

        let GroupedChild { child, output } = spawn_grouped(cmd).map_err(|e| LaunchError::Spawn {
            job_id: job.id.clone(),
            reason: format!("{e:#}"),
        })?;
        let pid = child.id();
        info!(pid, spec = %paths.spec_path.display(), "tool started");

        let shared = Arc::new(Shared::default());
        let (drained_tx, drained_rx) = mpsc::channel();
        let worker = Worker {
            job_id: job.id.clone(),
            pid,
            child,
            result_path: paths.result_path.clone(),
            fallback_log,
            shared: Arc::clone(&shared),
            events: events.clone(),
            drained: drained_rx,
        };
        // The worker thread is started empty and handed the worker afterwards,
        // so a failed spawn leaves the child here to be reaped.
        let spawned = spawn_reader(&job.id, output, tee, events, drained_tx)
            .and_then(|()| spawn_worker(&job.id));
        let handed_off = match spawned {
            Ok(slot) => slot.send(worker).map_err(|mpsc::SendError(worker)| {
                (worker, "worker thread exited before start".to_string())
            }),
            Err(e) => Err((worker, format!("start job threads: {e}"))),
        };
        if let Err((worker, reason)) = handed_off {
            error!(pid, reason = %reason, "failed to start job worker, killing tool");
            worker.abandon();
            return Err(LaunchError::Spawn {
                job_id: job.id.clone(),
                reason,
            });
        }

        Ok(ProcessHandle {
            job_id: job.id.clone(),
            pid,
            started_at: Instant::now(),
            shared,
        })
    }
}

fn prepare_work_dir(paths: &JobPaths) -> Result<(), String> {
    fs::create_dir_all(&paths.work_dir)
        .map_err(|e| format!("create {}: {e}", paths.work_dir.display()))?;
    match fs::remove_file(&paths.result_path) {
        Ok(()) => debug!(path = %paths.result_path.display(), "removed stale result file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(format!("remove stale {}: {e}", paths.result_path.display())),
    }
    Ok(())
}

fn open_stream_log(path: &Path) -> Option<File> {
    let opened = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| File::create(path));
    match opened {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "cannot create stream log; continuing without it");
            None
        }
    }
}

fn spawn_reader(
    job_id: &str,
    output: PipeReader,
    tee: Option<File>,
    events: Sender<SupervisorEvent>,
    drained: Sender<()>,
) -> std::io::Result<()> {
    let source = job_id.to_string();
    thread::Builder::new()
        .name(format!("job-{job_id}-out"))
        .spawn(move || {
            crate::io::process::stream_lines(output, tee, |raw| {
                let Some(text) = sanitize_line(raw) else {
                    return;
                };
                let message = OutputMessage {
                    job_id: source.clone(),
                    category: classify(&text),
                    text,
                    timestamp: Utc::now(),
                };
                let _ = events.send(SupervisorEvent::Output(message));
            });
            let _ = drained.send(());
        })
        .map(|_| ())
}

fn spawn_worker(job_id: &str) -> std::io::Result<Sender<Worker>> {
    let (slot_tx, slot_rx) = mpsc::channel::<Worker>();
    thread::Builder::new()
        .name(format!("job-{job_id}"))
        .spawn(move || {
            if let Ok(worker) = slot_rx.recv() {
                worker.run();
            }
        })
        .map(|_| slot_tx)
}

#[derive(Debug, Default)]
struct Shared {
    latch: ExitLatch,
    terminated: AtomicBool,
}

struct Worker {
    job_id: String,
    pid: u32,
    child: Child,
    result_path: PathBuf,
    fallback_log: Option<PathBuf>,
    shared: Arc<Shared>,
    events: Sender<SupervisorEvent>,
    drained: Receiver<()>,
}

impl Worker {
    fn run(mut self) {
        let exit_code = match self.child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                error!(job_id = %self.job_id, err = %e, "failed to wait for tool");
                None
            }
        };
        self.shared.latch.set(exit_code);
        debug!(job_id = %self.job_id, exit_code = ?exit_code, "tool exited");

        self.drain_output();

        let outcome = resolve_outcome(ExitReport {
            job_id: self.job_id.clone(),
            exit_code,
            result: read_result(&self.result_path),
            terminated: self.shared.terminated.load(Ordering::SeqCst),
            fallback_log: self.fallback_log.clone(),
        });
        info!(
            job_id = %self.job_id,
            state = ?outcome.state,
            failure = ?outcome.failure,
            "job finished"
        );
        let _ = self.events.send(SupervisorEvent::Finished(outcome));
    }

    /// Kill the process group and reap the child without reporting an outcome.
    fn abandon(mut self) {
        if let Err(e) = signal_tree(self.pid, Stop::Force) {
            warn!(job_id = %self.job_id, err = %format!("{e:#}"), "failed to kill orphaned tool");
        }
        match self.child.wait() {
            Ok(status) => debug!(job_id = %self.job_id, exit_code = ?status.code(), "reaped orphaned tool"),
            Err(e) => warn!(job_id = %self.job_id, err = %e, "failed to reap orphaned tool"),
        }
        self.shared.latch.set(None);
    }

    /// Wait for the output pipe to close; stragglers left in the group are killed.
    fn drain_output(&self) {
        if self.drained.recv_timeout(OUTPUT_DRAIN_GRACE).is_ok() {
            return;
        }
        warn!(job_id = %self.job_id, pid = self.pid, "output still open after exit, killing process group");
        if let Err(e) = signal_tree(self.pid, Stop::Force) {
            warn!(job_id = %self.job_id, err = %format!("{e:#}"), "failed to kill leftover processes");
        }
        if self.drained.recv_timeout(OUTPUT_DRAIN_GRACE).is_err() {
            warn!(job_id = %self.job_id, "detaching output reader");
        }
    }
}

/// Runtime identity of a launched tool process.
#[derive(Debug)]
pub struct ProcessHandle {
    job_id: String,
    pid: u32,
    started_at: Instant,
    shared: Arc<Shared>,
}

impl ProcessHandle {
    /// Process id; also the process group id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn has_exited(&self) -> bool {
        self.shared.latch.exited()
    }
}

impl JobHandle for ProcessHandle {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    #[instrument(skip(self), fields(job_id = %self.job_id, pid = self.pid))]
    fn terminate(&self, escalate_after: Duration) {
        if self.shared.latch.exited() {
            debug!("already exited");
            return;
        }
        self.shared.terminated.store(true, Ordering::SeqCst);
        info!("stopping process group");
        if let Err(e) = signal_tree(self.pid, Stop::Graceful) {
            warn!(err = %format!("{e:#}"), "graceful stop failed");
        }
        if self.shared.latch.wait_for(escalate_after) {
            return;
        }

        warn!(escalate_after = ?escalate_after, "still running, forcing kill");
        if let Err(e) = signal_tree(self.pid, Stop::Force) {
            warn!(err = %format!("{e:#}"), "forced kill failed");
        }
        if !self.shared.latch.wait_for(KILL_GRACE) {
            let failure = TerminationFailure {
                job_id: self.job_id.clone(),
                pid: self.pid,
                waited: KILL_GRACE,
            };
            error!(error = %failure, "termination not confirmed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::wait::{WaitPidFlag, waitpid};
    use nix::unistd::Pid;

    #[test]
    fn abandoned_worker_reaps_its_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let GroupedChild { child, output } = spawn_grouped(cmd).expect("spawn");
        let pid = child.id();
        let (events, events_rx) = mpsc::channel();
        let (_drained_tx, drained) = mpsc::channel();
        let shared = Arc::new(Shared::default());
        let worker = Worker {
            job_id: "101_a".to_string(),
            pid,
            child,
            result_path: PathBuf::from("/nonexistent/result.json"),
            fallback_log: None,
            shared: Arc::clone(&shared),
            events,
            drained,
        };

        worker.abandon();
        drop(output);

        let raw = i32::try_from(pid).expect("pid");
        assert_eq!(
            waitpid(Pid::from_raw(raw), Some(WaitPidFlag::WNOHANG)),
            Err(Errno::ECHILD)
        );
        assert!(shared.latch.exited());
        assert!(events_rx.try_recv().is_err());
    }
}
