//! End-to-end wiring for one run: config, plan, layout, supervisor, scheduler.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::abort::AbortController;
use crate::core::session::{RunPhase, RunSession};
use crate::exit_codes;
use crate::io::config::RunConfig;
use crate::io::layout::{JobPaths, Layout};
use crate::io::plan::RunPlan;
use crate::io::supervisor::ProcessSupervisor;
use crate::observer::Observer;
use crate::scheduler::{RunSummary, Scheduler};

/// Run every job of `plan` under `root` with the real process supervisor.
///
/// Errors only when the inputs are invalid; once jobs start, every failure
/// is reported through the summary.
pub fn run_plan(
    root: &Path,
    plan: &RunPlan,
    config: &RunConfig,
    observer: &mut dyn Observer,
) -> Result<RunSummary> {
    config.validate().context("invalid config")?;
    plan.validate().context("invalid plan")?;
    let layout = Layout::new(root);
    let mut session = RunSession::new(plan.jobs(), config.max_concurrency)?;
    info!(
        root = %root.display(),
        jobs = session.jobs().len(),
        max_concurrency = config.max_concurrency,
        "starting run"
    );
    let supervisor = ProcessSupervisor::new(config.tool.clone(), layout.clone());
    let abort = AbortController::new(layout, config.escalate_after());
    Ok(Scheduler::new(supervisor, abort).run(&mut session, observer))
}

/// Paths every job of `plan` would use under `root`, in queue order.
pub fn plan_paths(root: &Path, plan: &RunPlan) -> Vec<JobPaths> {
    let layout = Layout::new(root);
    plan.jobs().iter().map(|job| layout.job_paths(job)).collect()
}

/// Process exit code for a finished run.
pub fn exit_code(summary: &RunSummary) -> i32 {
    match summary.phase {
        RunPhase::Aborted => exit_codes::ABORTED,
        _ if summary.failed > 0 => exit_codes::FAILED,
        _ => exit_codes::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use crate::test_support::job_config;
    use std::time::Duration;

    fn summary(phase: RunPhase, failed: usize) -> RunSummary {
        RunSummary {
            phase,
            succeeded: 1,
            failed,
            not_started: 0,
            abort: None,
            elapsed: Duration::ZERO,
            cleanup: None,
        }
    }

    #[test]
    fn exit_codes_follow_run_result() {
        assert_eq!(exit_code(&summary(RunPhase::Completed, 0)), exit_codes::OK);
        assert_eq!(exit_code(&summary(RunPhase::Completed, 2)), exit_codes::FAILED);
        assert_eq!(exit_code(&summary(RunPhase::Aborted, 0)), exit_codes::ABORTED);
    }

    #[test]
    fn empty_plan_is_a_noop_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let summary = run_plan(
            temp.path(),
            &RunPlan::default(),
            &RunConfig::default(),
            &mut NullObserver,
        )
        .expect("run");
        assert_eq!(summary.phase, RunPhase::Completed);
        assert_eq!((summary.succeeded, summary.failed), (0, 0));
    }

    #[test]
    fn invalid_plan_is_rejected_before_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = RunPlan {
            subjects: vec!["101".to_string(), "101".to_string()],
            configs: vec![job_config("a")],
        };
        let err = run_plan(temp.path(), &plan, &RunConfig::default(), &mut NullObserver)
            .unwrap_err();
        assert!(format!("{err:#}").contains("duplicate subject"));
    }

    #[test]
    fn plan_paths_are_in_queue_order() {
        let plan = RunPlan {
            subjects: vec!["101".to_string(), "102".to_string()],
            configs: vec![job_config("a")],
        };
        let ids: Vec<String> = plan_paths(Path::new("/data"), &plan)
            .into_iter()
            .map(|paths| paths.job_id)
            .collect();
        assert_eq!(ids, vec!["101_a", "102_a"]);
    }
}
