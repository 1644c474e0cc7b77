//! Rollback of partial artifacts after an aborted run.
//!
//! Working and output directories of rolled-back jobs are deleted. A job's
//! logs (the supervisor's `<job-id>.log` and any log the tool named in its
//! result file) are kept but renamed with an `.errored` marker if they were
//! written during the run. Every step skips paths that are already gone,
//! which makes a repeated cleanup a no-op.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, instrument, warn};

use crate::core::outcome::ResultRead;
use crate::core::types::Job;
use crate::io::job_file::read_result;
use crate::io::layout::{JobPaths, Layout};

pub const ERRORED_MARKER: &str = "errored";

/// File timestamps come from a coarse kernel clock and can trail the
/// run's start time slightly.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// What a cleanup pass changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_dirs: Vec<PathBuf>,
    /// `(from, to)` pairs.
    pub renamed_logs: Vec<(PathBuf, PathBuf)>,
    /// Non-fatal problems; cleanup continues past them.
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed_dirs.is_empty() && self.renamed_logs.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CleanupManager {
    layout: Layout,
    run_started: SystemTime,
}

impl CleanupManager {
    pub fn new(layout: Layout, run_started: SystemTime) -> Self {
        Self {
            layout,
            run_started,
        }
    }

    /// Roll back every job in `jobs`.
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub fn cleanup(&self, jobs: &[&Job]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for job in jobs {
            let paths = self.layout.job_paths(job);
            self.cleanup_job(&paths, &mut report);
        }
        info!(
            removed_dirs = report.removed_dirs.len(),
            renamed_logs = report.renamed_logs.len(),
            errors = report.errors.len(),
            "cleanup finished"
        );
        report
    }

    fn cleanup_job(&self, paths: &JobPaths, report: &mut CleanupReport) {
        debug!(job_id = %paths.job_id, "cleaning job");
        // The result file lives in the work dir; read it before that goes.
        let logs = job_logs(paths);
        remove_dir(&paths.work_dir, report);
        remove_dir(&paths.output_dir, report);
        for log in logs {
            self.mark_log(&log, report);
        }
    }

    fn mark_log(&self, path: &Path, report: &mut CleanupReport) {
        let Some(target) = errored_name(path) else {
            return;
        };
        match self.written_during_run(path) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                report.errors.push(format!("stat {}: {e}", path.display()));
                return;
            }
        }
        match fs::rename(path, &target) {
            Ok(()) => {
                info!(from = %path.display(), to = %target.display(), "marked log as errored");
                report.renamed_logs.push((path.to_path_buf(), target));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), err = %e, "failed to mark log");
                report.errors.push(format!("rename {}: {e}", path.display()));
            }
        }
    }

    fn written_during_run(&self, path: &Path) -> std::io::Result<bool> {
        let modified = fs::metadata(path)?.modified()?;
        Ok(modified + MTIME_SLACK >= self.run_started)
    }
}

fn remove_dir(dir: &Path, report: &mut CleanupReport) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(path = %dir.display(), "removed partial output");
            report.removed_dirs.push(dir.to_path_buf());
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %dir.display(), err = %e, "failed to remove directory");
            report.errors.push(format!("remove {}: {e}", dir.display()));
        }
    }
}

/// Logs owned by exactly this job. Logs inside the job's own directories
/// are removed with them and need no marker.
fn job_logs(paths: &JobPaths) -> Vec<PathBuf> {
    let mut logs = vec![paths.log_path.clone()];
    if let ResultRead::Parsed(result) = read_result(&paths.result_path)
        && let Some(log_file) = result.log_file
        && !log_file.starts_with(&paths.work_dir)
        && !log_file.starts_with(&paths.output_dir)
        && !logs.contains(&log_file)
    {
        logs.push(log_file);
    }
    logs
}

/// `<name>.log` → `<name>.errored.log`; `None` for non-log or already-marked
/// files.
fn errored_name(path: &Path) -> Option<PathBuf> {
    if path.extension() != Some(OsStr::new("log")) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.split('.').any(|part| part == ERRORED_MARKER) {
        return None;
    }
    Some(path.with_file_name(format!("{stem}.{ERRORED_MARKER}.log")))
}
