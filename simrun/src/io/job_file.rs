//! Job specification and result files exchanged with the simulation tool.
//!
//! Both are pretty-printed JSON so they can be inspected by hand. The
//! supervisor owns `job.json` (written before launch); the tool owns
//! `result.json` (written before exit).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::outcome::ResultRead;
use crate::core::types::{
    Conductivity, ElectrodeGeometry, Job, JobConfig, Placement, ResultFile,
};

/// Simulation parameters as the tool sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub name: String,
    pub conductivity: Conductivity,
    pub currents_ma: Vec<f64>,
    pub electrode: ElectrodeGeometry,
    pub placement: Placement,
}

/// Contents of `job.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpecFile {
    pub job_id: String,
    pub subject_id: String,
    /// Directory the tool must write its outputs into.
    pub output_dir: PathBuf,
    pub simulation: SimulationParams,
    pub debug: bool,
}

impl JobSpecFile {
    pub fn for_job(job: &Job, output_dir: &Path) -> Self {
        let JobConfig {
            name,
            conductivity,
            currents_ma,
            electrode,
            placement,
            debug,
        } = job.config.clone();
        Self {
            job_id: job.id.clone(),
            subject_id: job.subject_id.clone(),
            output_dir: output_dir.to_path_buf(),
            simulation: SimulationParams {
                name,
                conductivity,
                currents_ma,
                electrode,
                placement,
            },
            debug,
        }
    }
}

pub fn write_job_spec(path: &Path, spec: &JobSpecFile) -> Result<()> {
    debug!(path = %path.display(), job_id = %spec.job_id, "writing job specification");
    let mut buf = serde_json::to_string_pretty(spec).context("serialize job specification")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

pub fn read_job_spec(path: &Path) -> Result<JobSpecFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn write_result(path: &Path, result: &ResultFile) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(result).context("serialize result file")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Read the tool's result file, distinguishing "absent" from "unreadable".
pub fn read_result(path: &Path) -> ResultRead {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return ResultRead::Missing,
        Err(err) => return ResultRead::Malformed(format!("read {}: {err}", path.display())),
    };
    match serde_json::from_str::<ResultFile>(&contents) {
        Ok(file) => ResultRead::Parsed(file),
        Err(err) => ResultRead::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MappedElectrode, ResultStatus, UnitResult};
    use crate::test_support::{job, job_config};

    #[test]
    fn job_spec_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tmp/101_L_R/job.json");
        let job = job("101", "L_R");
        let spec = JobSpecFile::for_job(&job, &temp.path().join("out"));
        write_job_spec(&path, &spec).expect("write");
        let loaded = read_job_spec(&path).expect("read");
        assert_eq!(loaded, spec);
        assert_eq!(loaded.simulation.currents_ma, job.config.currents_ma);
        assert!(!temp.path().join("tmp/101_L_R/job.json.tmp").exists());
    }

    #[test]
    fn mapped_positions_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("job.json");
        let mut config = job_config("mapped");
        config.placement = Placement::Mapped {
            positions: vec![
                MappedElectrode {
                    label: "E1".to_string(),
                    position: [-61.2, 12.5, 40.0],
                },
                MappedElectrode {
                    label: "E2".to_string(),
                    position: [60.8, 11.9, 41.3],
                },
            ],
        };
        config.debug = true;
        let spec = JobSpecFile::for_job(&Job::new("102", config), temp.path());
        write_job_spec(&path, &spec).expect("write");
        let loaded = read_job_spec(&path).expect("read");
        assert_eq!(loaded, spec);
        assert!(loaded.debug);
    }

    #[test]
    fn spec_uses_tagged_placement() {
        let spec = JobSpecFile::for_job(&job("101", "L_R"), Path::new("/out"));
        let value = serde_json::to_value(&spec).expect("json");
        assert_eq!(value["simulation"]["placement"]["kind"], "montage");
        assert_eq!(value["simulation"]["conductivity"], "scalar");
        assert_eq!(value["output_dir"], "/out");
    }

    #[test]
    fn result_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("result.json");
        let result = ResultFile {
            status: ResultStatus::Failed,
            results: vec![UnitResult {
                name: "L_R".to_string(),
                status: ResultStatus::Failed,
                error: Some("mesh missing".to_string()),
            }],
            log_file: Some(temp.path().join("simnibs.log")),
        };
        write_result(&path, &result).expect("write");
        match read_result(&path) {
            ResultRead::Parsed(loaded) => assert_eq!(loaded, result),
            other => panic!("unexpected read {other:?}"),
        }
    }

    #[test]
    fn minimal_result_defaults_optional_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("result.json");
        fs::write(&path, r#"{"status":"ok"}"#).expect("write");
        match read_result(&path) {
            ResultRead::Parsed(loaded) => {
                assert_eq!(loaded.status, ResultStatus::Ok);
                assert!(loaded.results.is_empty());
                assert_eq!(loaded.log_file, None);
            }
            other => panic!("unexpected read {other:?}"),
        }
    }

    #[test]
    fn missing_and_malformed_results_are_distinguished() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("result.json");
        assert!(matches!(read_result(&path), ResultRead::Missing));
        fs::write(&path, r#"{"status":"maybe"}"#).expect("write");
        assert!(matches!(read_result(&path), ResultRead::Malformed(_)));
    }
}
