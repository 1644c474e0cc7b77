//! Resolution of a finished process into a job outcome.
//!
//! The result file is authoritative whenever it is present and well-formed;
//! the exit code only decides between the fallback failure kinds.

use std::path::PathBuf;

use crate::core::types::{FailureKind, JobOutcome, JobState, ResultFile, ResultStatus};

/// What the supervisor observed after the process exited.
#[derive(Debug, Clone)]
pub enum ResultRead {
    Missing,
    Malformed(String),
    Parsed(ResultFile),
}

/// Everything needed to decide a finished job's terminal state.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub job_id: String,
    pub exit_code: Option<i32>,
    pub result: ResultRead,
    /// The supervisor stopped this process as part of an abort.
    pub terminated: bool,
    /// Log written by the supervisor itself, used when the tool names none.
    pub fallback_log: Option<PathBuf>,
}

pub fn resolve_outcome(report: ExitReport) -> JobOutcome {
    let ExitReport {
        job_id,
        exit_code,
        result,
        terminated,
        fallback_log,
    } = report;
    let code = describe_code(exit_code);

    let mut outcome = JobOutcome {
        job_id,
        state: JobState::Failed,
        failure: None,
        exit_code,
        diagnostic: None,
        log_path: fallback_log,
        units: Vec::new(),
    };

    if terminated {
        outcome.failure = Some(FailureKind::Terminated);
        outcome.diagnostic = Some(format!(
            "job {} was terminated by run abort (exit {code})",
            outcome.job_id
        ));
        if let ResultRead::Parsed(file) = result {
            take_manifest(&mut outcome, file);
        }
        return outcome;
    }

    match result {
        ResultRead::Parsed(file) => {
            let status = file.status;
            take_manifest(&mut outcome, file);
            match status {
                ResultStatus::Ok => outcome.state = JobState::Succeeded,
                ResultStatus::Failed => {
                    outcome.failure = Some(FailureKind::DeclaredFailed);
                    outcome.diagnostic = Some(first_unit_error(&outcome).unwrap_or_else(|| {
                        format!("job {} declared failure (exit {code})", outcome.job_id)
                    }));
                }
            }
        }
        ResultRead::Malformed(reason) => {
            outcome.failure = Some(FailureKind::MalformedResult);
            outcome.diagnostic = Some(format!(
                "job {} exited with {code}: malformed result file ({reason})",
                outcome.job_id
            ));
        }
        ResultRead::Missing => {
            let kind = if exit_code == Some(0) {
                FailureKind::MissingResult
            } else {
                FailureKind::NonZeroExit
            };
            outcome.failure = Some(kind);
            outcome.diagnostic = Some(format!(
                "job {} exited with {code}: no result file",
                outcome.job_id
            ));
        }
    }
    outcome
}

fn take_manifest(outcome: &mut JobOutcome, file: ResultFile) {
    if file.log_file.is_some() {
        outcome.log_path = file.log_file;
    }
    outcome.units = file.results;
}

fn first_unit_error(outcome: &JobOutcome) -> Option<String> {
    outcome
        .units
        .iter()
        .find(|unit| unit.status == ResultStatus::Failed)
        .map(|unit| match &unit.error {
            Some(error) => format!("{}: {}", unit.name, error),
            None => format!("{}: failed", unit.name),
        })
}

fn describe_code(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "no exit code".to_string(),
    }
}
