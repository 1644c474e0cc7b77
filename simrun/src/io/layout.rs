//! Job-root directory conventions.
//!
//! ```text
//! <root>/sub-<subject>/
//!   simulations/<config>/          outputs written by the tool
//!   simulations/tmp/<job-id>/      job.json + result.json
//!   logs/<job-id>.log              supervisor tee of the output stream
//! ```
//!
//! No two jobs share a work or output directory, so supervisors never need to
//! coordinate filesystem access.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::Job;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

/// Every path owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub job_id: String,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub spec_path: PathBuf,
    pub result_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_path: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, subject_id: &str) -> PathBuf {
        self.root.join(format!("sub-{subject_id}"))
    }

    pub fn job_paths(&self, job: &Job) -> JobPaths {
        let subject_dir = self.subject_dir(&job.subject_id);
        let simulations = subject_dir.join("simulations");
        let work_dir = simulations.join("tmp").join(&job.id);
        let log_dir = subject_dir.join("logs");
        JobPaths {
            job_id: job.id.clone(),
            output_dir: simulations.join(&job.config.name),
            spec_path: work_dir.join("job.json"),
            result_path: work_dir.join("result.json"),
            work_dir,
            log_path: log_dir.join(format!("{}.log", job.id)),
            log_dir,
        }
    }
}

/// Validate that an id is safe to use as a single path component.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("{kind} must not be empty"));
    }
    if id == "." || id == ".." || id == "tmp" {
        return Err(anyhow!("{kind} '{id}' is reserved"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("{kind} must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::job;

    #[test]
    fn job_paths_follow_subject_layout() {
        let layout = Layout::new("/data/project");
        let paths = layout.job_paths(&job("101", "L_R"));
        assert_eq!(paths.job_id, "101_L_R");
        assert_eq!(
            paths.output_dir,
            PathBuf::from("/data/project/sub-101/simulations/L_R")
        );
        assert_eq!(
            paths.spec_path,
            PathBuf::from("/data/project/sub-101/simulations/tmp/101_L_R/job.json")
        );
        assert_eq!(
            paths.result_path,
            PathBuf::from("/data/project/sub-101/simulations/tmp/101_L_R/result.json")
        );
        assert_eq!(
            paths.log_path,
            PathBuf::from("/data/project/sub-101/logs/101_L_R.log")
        );
    }

    #[test]
    fn distinct_jobs_never_share_directories() {
        let layout = Layout::new("/data");
        let a = layout.job_paths(&job("101", "a"));
        let b = layout.job_paths(&job("101", "b"));
        let c = layout.job_paths(&job("102", "a"));
        assert_ne!(a.work_dir, b.work_dir);
        assert_ne!(a.output_dir, b.output_dir);
        assert_ne!(a.work_dir, c.work_dir);
        assert_ne!(a.output_dir, c.output_dir);
    }

    #[test]
    fn validate_id_rejects_path_separators() {
        assert!(validate_id("subject id", "101").is_ok());
        assert!(validate_id("subject id", "ernie.v2-b").is_ok());
        assert!(validate_id("subject id", "").is_err());
        assert!(validate_id("subject id", "../etc").is_err());
        assert!(validate_id("config name", "a/b").is_err());
        assert!(validate_id("config name", "tmp").is_err());
    }
}
