//! Child process plumbing: grouped spawn, combined output, tree signalling.
//!
//! Every tool invocation is started as the leader of its own process group
//! (a new console process group on Windows) so that stopping it also stops
//! whatever it spawned. Platform differences stay inside this module.

use std::fs::File;
use std::io::{BufRead, BufReader, PipeReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Upper bound for a helper command such as `taskkill`.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(1);

/// A spawned child whose stdout and stderr share one pipe.
#[derive(Debug)]
pub struct GroupedChild {
    pub child: Child,
    pub output: PipeReader,
}

/// Spawn `cmd` in a new process group with stdout and stderr merged.
#[instrument(skip_all)]
pub fn spawn_grouped(mut cmd: Command) -> Result<GroupedChild> {
    let (reader, writer) = std::io::pipe().context("create output pipe")?;
    let writer_clone = writer.try_clone().context("clone output pipe")?;
    cmd.stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_clone);
    new_process_group(&mut cmd);

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    // The write ends live in `cmd`; drop them so EOF arrives when the tree exits.
    drop(cmd);
    Ok(GroupedChild {
        child,
        output: reader,
    })
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn new_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn new_process_group(_cmd: &mut Command) {}

/// Read `output` line by line until EOF, tee-ing raw bytes to `tee`.
///
/// Each line is handed to `on_line` lossily decoded. Read errors end the
/// stream; a failing tee is logged once and then ignored.
pub fn stream_lines<F: FnMut(&str)>(output: PipeReader, mut tee: Option<File>, mut on_line: F) {
    let mut reader = BufReader::new(output);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = match reader.read_until(b'\n', &mut line) {
            Ok(n) => n,
            Err(e) => {
                warn!(err = %e, "failed to read child output");
                break;
            }
        };
        if n == 0 {
            break;
        }
        if let Some(file) = tee.as_mut()
            && let Err(e) = file.write_all(&line).and_then(|()| file.flush())
        {
            warn!(err = %e, "failed to write to stream log");
            tee = None;
        }
        on_line(&String::from_utf8_lossy(&line));
    }
}

/// How hard to stop a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Graceful,
    Force,
}

/// Signal the whole process group led by `pid`.
///
/// A group that no longer exists is not an error.
#[cfg(unix)]
pub fn signal_tree(pid: u32, stop: Stop) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("pid {pid} out of range"))?;
    let signal = match stop {
        Stop::Graceful => Signal::SIGTERM,
        Stop::Force => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno).with_context(|| format!("send {signal:?} to group {pid}")),
    }
}

#[cfg(windows)]
pub fn signal_tree(pid: u32, stop: Stop) -> Result<()> {
    let pid = pid.to_string();
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", pid.as_str(), "/T"]);
    if stop == Stop::Force {
        cmd.arg("/F");
    }
    let status = status_within(cmd, HELPER_TIMEOUT).context("run taskkill")?;
    // taskkill exits 128 when the process is already gone.
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        Err(anyhow!("taskkill for {pid} exited with {status}"))
    }
}

#[cfg(not(any(unix, windows)))]
pub fn signal_tree(pid: u32, _stop: Stop) -> Result<()> {
    Err(anyhow!("cannot signal process {pid} on this platform"))
}

/// Run a short helper command with its output discarded, killing it if it
/// outlives `timeout`.
pub fn status_within(mut cmd: Command, timeout: Duration) -> Result<ExitStatus> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn helper")?;
    match child.wait_timeout(timeout).context("wait for helper")? {
        Some(status) => Ok(status),
        None => {
            warn!(timeout_ms = timeout.as_millis(), "helper timed out, killing");
            child.kill().context("kill helper")?;
            child.wait().context("wait helper after kill")?;
            Err(anyhow!("helper did not finish within {timeout:?}"))
        }
    }
}

/// One-shot latch that records a child's exit and wakes waiters.
#[derive(Debug, Default)]
pub struct ExitLatch {
    exit: Mutex<Option<Option<i32>>>,
    cond: Condvar,
}

impl ExitLatch {
    pub fn set(&self, code: Option<i32>) {
        let mut exit = self.exit.lock().unwrap_or_else(PoisonError::into_inner);
        if exit.is_none() {
            *exit = Some(code);
        }
        self.cond.notify_all();
    }

    pub fn exited(&self) -> bool {
        self.exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Block for at most `timeout`; returns whether the child has exited.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let guard = self.exit.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |exit| exit.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_some()
    }
}
