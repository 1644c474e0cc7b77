//! Shared deterministic types for the scheduling core.
//!
//! These types define the contracts between the classifier, the session state
//! machine and the supervisor. They carry no I/O and serialize to the stable
//! JSON shapes exchanged with the external simulation tool.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned to one line of tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Error,
    Warning,
    Info,
    Debug,
    Success,
    Command,
    Default,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Error => "error",
            Category::Warning => "warning",
            Category::Info => "info",
            Category::Debug => "debug",
            Category::Success => "success",
            Category::Command => "command",
            Category::Default => "default",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Conductivity model selector understood by the simulation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conductivity {
    Scalar,
    Vn,
    Dir,
    Mc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectrodeShape {
    Rect,
    Ellipse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeGeometry {
    pub shape: ElectrodeShape,
    /// Width and height (rect) or the two diameters (ellipse), in millimetres.
    pub dimensions_mm: [f64; 2],
    pub thickness_mm: f64,
}

/// A single electrode at an explicit (mapped or optimized) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedElectrode {
    pub label: String,
    pub position: [f64; 3],
}

/// Where the electrodes go: named montage pairs, or explicit positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
    Montage { pairs: Vec<[String; 2]> },
    Mapped { positions: Vec<MappedElectrode> },
}

/// Opaque simulation parameter bundle for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Configuration label; names the output subdirectory.
    pub name: String,
    pub conductivity: Conductivity,
    /// Per-channel current, in milliamperes.
    pub currents_ma: Vec<f64>,
    pub electrode: ElectrodeGeometry,
    pub placement: Placement,
    #[serde(default)]
    pub debug: bool,
}

/// One unit of work: one subject under one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub subject_id: String,
    pub config: JobConfig,
    pub state: JobState,
}

impl Job {
    /// Create a pending job with the canonical `<subject>_<config>` id.
    pub fn new(subject_id: &str, config: JobConfig) -> Self {
        Self {
            id: Self::id_for(subject_id, &config.name),
            subject_id: subject_id.to_string(),
            config,
            state: JobState::Pending,
        }
    }

    pub fn id_for(subject_id: &str, config_name: &str) -> String {
        format!("{subject_id}_{config_name}")
    }
}

/// A classified line of output from one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMessage {
    pub job_id: String,
    pub text: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
}

/// Status declared by the tool in its result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Failed,
}

/// Result of one unit of work inside a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub name: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result file written by the external tool before it exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    pub status: ResultStatus,
    #[serde(default)]
    pub results: Vec<UnitResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `job.json` could not be written or the tool could not be spawned.
    Launch,
    /// The result file declared `failed`.
    DeclaredFailed,
    /// Non-zero exit with no result file.
    NonZeroExit,
    /// Zero exit with no result file.
    MissingResult,
    /// A result file exists but could not be parsed.
    MalformedResult,
    /// The job was stopped by an abort.
    Terminated,
}

/// Terminal outcome of one job, as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub state: JobState,
    pub failure: Option<FailureKind>,
    pub exit_code: Option<i32>,
    pub diagnostic: Option<String>,
    pub log_path: Option<PathBuf>,
    /// Per-unit manifest from the result file (empty when none was read).
    pub units: Vec<UnitResult>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Succeeded
    }

    /// Outcome for a job whose launch failed before it ever ran.
    pub fn launch_failed(job_id: &str, diagnostic: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Failed,
            failure: Some(FailureKind::Launch),
            exit_code: None,
            diagnostic: Some(diagnostic),
            log_path: None,
            units: Vec::new(),
        }
    }
}
