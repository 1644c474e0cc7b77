//! Scheduler and abort behavior driven by scripted jobs.
//!
//! No processes are spawned; each job plays back a script on its own thread
//! and reports through the same event channel as the real supervisor.

use std::time::Duration;

use simrun::abort::AbortController;
use simrun::core::session::{RunPhase, RunSession};
use simrun::core::types::{Category, FailureKind, JobState};
use simrun::io::layout::Layout;
use simrun::scheduler::Scheduler;
use simrun::test_support::{JobScript, Lifecycle, RecordingObserver, ScriptedLauncher, jobs};

fn scheduler(launcher: ScriptedLauncher, layout: Layout) -> Scheduler<ScriptedLauncher> {
    Scheduler::new(
        launcher,
        AbortController::new(layout, Duration::from_millis(200)),
    )
}

fn position(events: &[Lifecycle], wanted: &Lifecycle) -> usize {
    events
        .iter()
        .position(|event| event == wanted)
        .unwrap_or_else(|| panic!("missing {wanted:?} in {events:?}"))
}

#[test]
fn four_jobs_two_slots_all_succeed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let layout = Layout::new(temp.path());
    let quick = || JobScript::ok().run_for(Duration::from_millis(50));
    let launcher = ScriptedLauncher::new()
        .script("101_c1", quick())
        .script("101_c2", quick())
        .script("101_c3", quick())
        .script("101_c4", quick());
    let scheduler = scheduler(launcher, layout);
    let mut session = RunSession::new(jobs(4), 2).expect("session");
    let mut observer = RecordingObserver::default();

    let summary = scheduler.run(&mut session, &mut observer);

    assert_eq!(summary.phase, RunPhase::Completed);
    assert_eq!((summary.succeeded, summary.failed), (4, 0));
    assert!(summary.cleanup.is_none());
    assert_eq!(observer.started, vec!["101_c1", "101_c2", "101_c3", "101_c4"]);
    assert_eq!(observer.finished.len(), 4);
    assert!(session.jobs().iter().all(|job| job.state == JobState::Succeeded));

    let launcher = scheduler.launcher();
    assert_eq!(launcher.max_live(), 2);
    let events = launcher.events();
    let third = position(&events, &Lifecycle::Started("101_c3".to_string()));
    let first_finish = events
        .iter()
        .position(|event| matches!(event, Lifecycle::Finished(_)))
        .expect("a finish");
    assert!(first_finish < third, "job 3 started before a slot freed: {events:?}");
}

#[test]
fn concurrency_bound_holds_for_uneven_jobs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut launcher = ScriptedLauncher::new();
    for (n, millis) in [30, 5, 60, 10, 40, 5, 20, 50, 15, 25].into_iter().enumerate() {
        launcher = launcher.script(
            &format!("101_c{}", n + 1),
            JobScript::ok().run_for(Duration::from_millis(millis)),
        );
    }
    let scheduler = scheduler(launcher, Layout::new(temp.path()));
    let mut session = RunSession::new(jobs(10), 3).expect("session");

    let summary = scheduler.run(&mut session, &mut RecordingObserver::default());

    assert_eq!(summary.succeeded, 10);
    assert_eq!(scheduler.launcher().max_live(), 3);
    let started = scheduler.launcher().started();
    let expected: Vec<String> = (1..=10).map(|n| format!("101_c{n}")).collect();
    assert_eq!(started, expected);
}

#[test]
fn empty_run_completes_immediately() {
    let temp = tempfile::tempdir().expect("tempdir");
    let scheduler = scheduler(ScriptedLauncher::new(), Layout::new(temp.path()));
    let mut session = RunSession::new(Vec::new(), 2).expect("session");
    let mut observer = RecordingObserver::default();

    let summary = scheduler.run(&mut session, &mut observer);

    assert_eq!(summary.phase, RunPhase::Completed);
    assert_eq!((summary.succeeded, summary.failed), (0, 0));
    assert_eq!(observer.summary, Some(summary));
    assert!(scheduler.launcher().events().is_empty());
}

#[test]
fn error_line_aborts_and_rolls_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let layout = Layout::new(temp.path());
    let launcher = ScriptedLauncher::new()
        .with_layout(layout.clone())
        .script("101_c1", JobScript::ok().blocking())
        .script(
            "101_c2",
            JobScript::ok()
                .lines(["Loading mesh", "[ERROR] disk full"])
                .blocking(),
        );
    let scheduler = scheduler(launcher, layout.clone());
    let all_jobs = jobs(4);
    let paths: Vec<_> = all_jobs.iter().map(|job| layout.job_paths(job)).collect();
    let mut session = RunSession::new(all_jobs, 2).expect("session");
    let mut observer = RecordingObserver::default();

    let summary = scheduler.run(&mut session, &mut observer);

    assert_eq!(summary.phase, RunPhase::Aborted);
    let cause = summary.abort.as_ref().expect("abort cause");
    assert_eq!(cause.job_id, "101_c2");
    assert_eq!(cause.line, "[ERROR] disk full");
    assert_eq!((summary.succeeded, summary.failed, summary.not_started), (0, 2, 2));

    // Jobs 3 and 4 never start.
    assert_eq!(scheduler.launcher().started(), vec!["101_c1", "101_c2"]);
    assert_eq!(observer.started, vec!["101_c1", "101_c2"]);
    assert_eq!(session.job(2).state, JobState::Pending);
    assert_eq!(session.job(3).state, JobState::Pending);

    // Job 1 was healthy but is terminated anyway.
    let events = scheduler.launcher().events();
    assert!(events.contains(&Lifecycle::Terminated("101_c1".to_string())));
    for id in ["101_c1", "101_c2"] {
        let outcome = observer.outcome(id).expect("outcome");
        assert_eq!(outcome.failure, Some(FailureKind::Terminated));
    }

    // Partial outputs of jobs 1 and 2 are gone; their logs are kept but marked.
    for job_paths in &paths[..2] {
        assert!(!job_paths.output_dir.exists());
        assert!(!job_paths.work_dir.exists());
        assert!(!job_paths.log_path.exists());
        assert!(
            job_paths
                .log_dir
                .join(format!("{}.errored.log", job_paths.job_id))
                .exists()
        );
    }
    for job_paths in &paths[2..] {
        assert!(!job_paths.output_dir.exists());
        assert!(!job_paths.work_dir.exists());
        assert!(!job_paths.log_path.exists());
    }
    let cleanup = summary.cleanup.as_ref().expect("cleanup report");
    assert_eq!(cleanup.removed_dirs.len(), 4);
    assert_eq!(cleanup.renamed_logs.len(), 2);
    assert!(cleanup.errors.is_empty());

    // Output keeps flowing to observers, classified.
    assert_eq!(observer.lines(Category::Error), vec!["[ERROR] disk full"]);
    assert_eq!(observer.lines(Category::Info), vec!["Loading mesh"]);
}

#[test]
fn nothing_starts_after_abort() {
    let temp = tempfile::tempdir().expect("tempdir");
    let launcher = ScriptedLauncher::new()
        .script(
            "101_c1",
            JobScript::ok()
                .lines(["Traceback (most recent call last):"])
                .run_for(Duration::from_millis(10)),
        )
        .script("101_c2", JobScript::ok().run_for(Duration::from_millis(10)));
    let scheduler = scheduler(launcher, Layout::new(temp.path()));
    let mut session = RunSession::new(jobs(3), 1).expect("session");

    let summary = scheduler.run(&mut session, &mut RecordingObserver::default());

    assert_eq!(summary.phase, RunPhase::Aborted);
    assert_eq!(scheduler.launcher().started(), vec!["101_c1"]);
    assert_eq!(summary.not_started, 2);
}

#[test]
fn soft_failures_do_not_abort() {
    let temp = tempfile::tempdir().expect("tempdir");
    let launcher = ScriptedLauncher::new()
        .script("101_c1", JobScript::exit_nonzero().lines(["[WARNING] low space"]))
        .script("101_c2", JobScript::launch_error());
    let scheduler = scheduler(launcher, Layout::new(temp.path()));
    let mut session = RunSession::new(jobs(3), 1).expect("session");
    let mut observer = RecordingObserver::default();

    let summary = scheduler.run(&mut session, &mut observer);

    assert_eq!(summary.phase, RunPhase::Completed);
    assert_eq!((summary.succeeded, summary.failed), (1, 2));
    assert_eq!(scheduler.launcher().started(), vec!["101_c1", "101_c3"]);
    assert_eq!(
        observer.outcome("101_c1").and_then(|o| o.failure),
        Some(FailureKind::NonZeroExit)
    );
    let launch = observer.outcome("101_c2").expect("launch outcome");
    assert_eq!(launch.failure, Some(FailureKind::Launch));
    assert!(
        launch
            .diagnostic
            .as_deref()
            .is_some_and(|d| d.contains("scripted launch failure"))
    );
    assert_eq!(session.job(1).state, JobState::Failed);
}
