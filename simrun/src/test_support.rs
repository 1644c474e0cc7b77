//! Test-only helpers: fixtures, a recording observer and a scripted launcher.
//!
//! [`ScriptedLauncher`] stands in for the process supervisor. Each job plays
//! back a [`JobScript`] on its own thread and reports through the same event
//! channel, so scheduler and abort behavior can be tested without spawning
//! processes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::core::classifier::classify;
use crate::core::outcome::{ExitReport, ResultRead, resolve_outcome};
use crate::core::types::{
    Category, Conductivity, ElectrodeGeometry, ElectrodeShape, FailureKind, Job, JobConfig,
    JobOutcome, JobState, OutputMessage, Placement, ResultFile, ResultStatus,
};
use crate::io::job_file::{JobSpecFile, write_job_spec};
use crate::io::layout::Layout;
use crate::io::process::ExitLatch;
use crate::io::supervisor::{JobHandle, LaunchError, Launcher, SupervisorEvent};
use crate::observer::Observer;
use crate::scheduler::RunSummary;

/// Upper bound on how long a blocking script waits for `terminate`.
const BLOCK_LIMIT: Duration = Duration::from_secs(30);

/// A two-electrode montage with one channel.
pub fn job_config(name: &str) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        conductivity: Conductivity::Scalar,
        currents_ma: vec![2.0],
        electrode: ElectrodeGeometry {
            shape: ElectrodeShape::Rect,
            dimensions_mm: [50.0, 50.0],
            thickness_mm: 4.0,
        },
        placement: Placement::Montage {
            pairs: vec![["C3".to_string(), "C4".to_string()]],
        },
        debug: false,
    }
}

pub fn job(subject_id: &str, config: &str) -> Job {
    Job::new(subject_id, job_config(config))
}

/// `count` jobs for subject `101` named `c1..=count`.
pub fn jobs(count: usize) -> Vec<Job> {
    (1..=count).map(|n| job("101", &format!("c{n}"))).collect()
}

pub fn message(job_id: &str, text: &str) -> OutputMessage {
    OutputMessage {
        job_id: job_id.to_string(),
        text: text.to_string(),
        category: classify(text),
        timestamp: Utc::now(),
    }
}

pub fn ok_outcome(job_id: &str) -> JobOutcome {
    JobOutcome {
        job_id: job_id.to_string(),
        state: JobState::Succeeded,
        failure: None,
        exit_code: Some(0),
        diagnostic: None,
        log_path: None,
        units: Vec::new(),
    }
}

pub fn failed_outcome(job_id: &str) -> JobOutcome {
    JobOutcome {
        job_id: job_id.to_string(),
        state: JobState::Failed,
        failure: Some(FailureKind::NonZeroExit),
        exit_code: Some(1),
        diagnostic: Some(format!("job {job_id} exited with code 1: no result file")),
        log_path: None,
        units: Vec::new(),
    }
}

/// Write a shell script for the `sh` stand-in tool.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    path
}

/// Everything the scheduler told an observer, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub started: Vec<String>,
    pub output: Vec<OutputMessage>,
    pub finished: Vec<JobOutcome>,
    pub summary: Option<RunSummary>,
}

impl RecordingObserver {
    pub fn outcome(&self, job_id: &str) -> Option<&JobOutcome> {
        self.finished.iter().find(|o| o.job_id == job_id)
    }

    pub fn lines(&self, category: Category) -> Vec<&str> {
        self.output
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.text.as_str())
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn on_job_started(&mut self, job: &Job) {
        self.started.push(job.id.clone());
    }

    fn on_output(&mut self, message: &OutputMessage) {
        self.output.push(message.clone());
    }

    fn on_job_finished(&mut self, outcome: &JobOutcome) {
        self.finished.push(outcome.clone());
    }

    fn on_run_finished(&mut self, summary: &RunSummary) {
        self.summary = Some(summary.clone());
    }
}

/// How a scripted job behaves once started.
#[derive(Debug, Clone)]
pub struct JobScript {
    lines: Vec<String>,
    run_for: Duration,
    block_until_terminated: bool,
    exit_code: i32,
    result: Option<ResultStatus>,
    launch_error: bool,
}

impl JobScript {
    /// Exit 0 with an `ok` result.
    pub fn ok() -> Self {
        Self {
            lines: Vec::new(),
            run_for: Duration::from_millis(20),
            block_until_terminated: false,
            exit_code: 0,
            result: Some(ResultStatus::Ok),
            launch_error: false,
        }
    }

    /// Exit 1 without a result file.
    pub fn exit_nonzero() -> Self {
        Self {
            exit_code: 1,
            result: None,
            ..Self::ok()
        }
    }

    /// Fail in `start` before anything runs.
    pub fn launch_error() -> Self {
        Self {
            launch_error: true,
            ..Self::ok()
        }
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn run_for(mut self, duration: Duration) -> Self {
        self.run_for = duration;
        self
    }

    /// Keep running until terminated.
    pub fn blocking(mut self) -> Self {
        self.block_until_terminated = true;
        self
    }
}

/// Chronological lifecycle record kept by [`ScriptedLauncher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Started(String),
    Terminated(String),
    Finished(String),
}

#[derive(Debug, Default)]
struct Ledger {
    events: Vec<Lifecycle>,
    live: usize,
    max_live: usize,
}

/// Launcher that plays back scripts instead of spawning processes.
///
/// With a layout, each start writes the job specification, a partial output
/// file and a log, mirroring what a real tool leaves behind.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    scripts: HashMap<String, JobScript>,
    fallback: JobScript,
    layout: Option<Layout>,
    ledger: Arc<Mutex<Ledger>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: JobScript::ok(),
            layout: None,
            ledger: Arc::default(),
        }
    }

    pub fn script(mut self, job_id: &str, script: JobScript) -> Self {
        self.scripts.insert(job_id.to_string(), script);
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn events(&self) -> Vec<Lifecycle> {
        self.lock().events.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Lifecycle::Started(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Highest number of scripts running at the same time.
    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_artifacts(&self, job: &Job) {
        let Some(layout) = &self.layout else {
            return;
        };
        let paths = layout.job_paths(job);
        write_job_spec(&paths.spec_path, &JobSpecFile::for_job(job, &paths.output_dir))
            .expect("write job spec");
        fs::create_dir_all(&paths.output_dir).expect("create output dir");
        fs::write(paths.output_dir.join("partial.msh"), job.id.as_bytes()).expect("write output");
        fs::create_dir_all(&paths.log_dir).expect("create log dir");
        fs::write(&paths.log_path, "").expect("write log");
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for ScriptedLauncher {
    type Handle = ScriptedHandle;

    fn start(
        &self,
        job: &Job,
        events: Sender<SupervisorEvent>,
    ) -> Result<ScriptedHandle, LaunchError> {
        let script = self
            .scripts
            .get(&job.id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        if script.launch_error {
            return Err(LaunchError::Spawn {
                job_id: job.id.clone(),
                reason: "scripted launch failure".to_string(),
            });
        }
        self.write_artifacts(job);
        {
            let mut ledger = self.lock();
            ledger.events.push(Lifecycle::Started(job.id.clone()));
            ledger.live += 1;
            ledger.max_live = ledger.max_live.max(ledger.live);
        }

        let stop = Arc::new(ExitLatch::default());
        let handle = ScriptedHandle {
            job_id: job.id.clone(),
            stop: Arc::clone(&stop),
            ledger: Arc::clone(&self.ledger),
        };
        let job_id = job.id.clone();
        let ledger = Arc::clone(&self.ledger);
        thread::spawn(move || {
            for line in &script.lines {
                let _ = events.send(SupervisorEvent::Output(message(&job_id, line)));
            }
            let limit = if script.block_until_terminated {
                BLOCK_LIMIT
            } else {
                script.run_for
            };
            let terminated = stop.wait_for(limit);
            let result = match (terminated, script.result) {
                (false, Some(status)) => ResultRead::Parsed(ResultFile {
                    status,
                    results: Vec::new(),
                    log_file: None,
                }),
                _ => ResultRead::Missing,
            };
            let outcome = resolve_outcome(ExitReport {
                job_id: job_id.clone(),
                exit_code: if terminated { None } else { Some(script.exit_code) },
                result,
                terminated,
                fallback_log: None,
            });
            {
                let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
                ledger.live -= 1;
                ledger.events.push(Lifecycle::Finished(job_id));
            }
            let _ = events.send(SupervisorEvent::Finished(outcome));
        });
        Ok(handle)
    }
}

#[derive(Debug)]
pub struct ScriptedHandle {
    job_id: String,
    stop: Arc<ExitLatch>,
    ledger: Arc<Mutex<Ledger>>,
}

impl JobHandle for ScriptedHandle {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn terminate(&self, _escalate_after: Duration) {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .push(Lifecycle::Terminated(self.job_id.clone()));
        self.stop.set(None);
    }
}
