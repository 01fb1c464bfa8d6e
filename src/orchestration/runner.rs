//! Orchestrator: runs tasks and sequences from a [`TaskGraph`].
//!
//! Prerequisites are resolved depth-first and every task runs at most once
//! per run, however many tasks reach it. Sequences run step by step; a group
//! step runs its members concurrently and acts as a barrier. The first
//! failing step aborts the rest of the sequence. Group siblings of a failing
//! member are not cancelled; they finish on their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OnceCell};
use uuid::Uuid;

use crate::core::graph::TaskGraph;
use crate::core::sequence::{Sequence, Step};
use crate::core::task::{FailurePolicy, TaskAction, TaskStatus};
use crate::error::{Error, Result};
use crate::util::human_duration;
use crate::{clog, clog_debug, clog_error, clog_trace, clog_warn};

pub const REPORT_FILE: &str = "last-run.json";

/// Events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A task's action is about to execute.
    TaskStarted { task: String },
    /// A task finished successfully.
    TaskCompleted { task: String, elapsed: Duration },
    /// A task failed under the `continue` policy.
    TaskTolerated { task: String, error: String },
    /// A task failed and the failure propagates.
    TaskFailed { task: String, error: String },
    /// A sequence step is starting.
    StepStarted { index: usize, step: Step },
    /// A sequence stopped at `failed_step`; `skipped` never ran.
    SequenceAborted {
        failed_step: usize,
        skipped: Vec<String>,
    },
}

/// A failure carried up through prerequisites and sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    task: String,
    reason: String,
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        Error::TaskFailed {
            task: f.task,
            reason: f.reason,
        }
    }
}

type Outcome = std::result::Result<(), Failure>;

/// Per-task entry in a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Summary of one orchestrator invocation, persisted for postmortems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskRecord>,
    pub success: bool,
    pub failed_task: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    fn new(targets: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            targets,
            started_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
            success: false,
            failed_task: None,
            error: None,
        }
    }

    /// Status recorded for `task`, if it was reached.
    pub fn status_of(&self, task: &str) -> Option<&TaskStatus> {
        self.tasks
            .iter()
            .find(|r| r.name == task)
            .map(|r| &r.status)
    }

    /// Names of tasks that finished, in completion order.
    pub fn completed(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|r| r.status.is_success())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Write the report as JSON into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn into_result(self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let reason = self.error.unwrap_or_else(|| "unknown error".to_string());
        match self.failed_task {
            Some(task) => Err(Error::TaskFailed { task, reason }),
            None => Err(Error::Validation(reason)),
        }
    }
}

/// Shared state of one run.
#[derive(Default)]
struct RunState {
    cells: Mutex<HashMap<String, Arc<OnceCell<Outcome>>>>,
    records: Mutex<Vec<TaskRecord>>,
}

impl RunState {
    fn cell(&self, name: &str) -> Arc<OnceCell<Outcome>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            cells
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn record(&self, record: TaskRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn take_records(&self) -> Vec<TaskRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

pub struct Orchestrator {
    graph: Arc<TaskGraph>,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            event_tx: None,
        }
    }

    /// Emit [`RunEvent`]s on `tx` while running.
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run a single task and its prerequisites.
    pub async fn run(&self, target: &str) -> Result<()> {
        self.execute(&[target.to_string()]).await.into_result()
    }

    /// Run each target in order, sharing one run state so no task runs
    /// twice. Never fails; the outcome is in the report.
    pub async fn execute(&self, targets: &[String]) -> RunReport {
        let mut report = RunReport::new(targets.to_vec());

        for target in targets {
            if let Err(e) = self.graph.validate(target) {
                clog_error!("{}", e);
                report.error = Some(e.to_string());
                report.finished_at = Some(Utc::now());
                return report;
            }
        }

        let state = RunState::default();
        let mut outcome = Ok(());
        for target in targets {
            outcome = self.run_task(target, &state).await;
            if outcome.is_err() {
                break;
            }
        }
        self.finish(report, &state, outcome)
    }

    /// Run an ad-hoc sequence of registered tasks.
    pub async fn run_sequence(&self, sequence: &Sequence) -> RunReport {
        let targets: Vec<String> = sequence.task_names().map(str::to_string).collect();
        let mut report = RunReport::new(targets.clone());

        for target in &targets {
            if let Err(e) = self.graph.validate(target) {
                clog_error!("{}", e);
                report.error = Some(e.to_string());
                report.finished_at = Some(Utc::now());
                return report;
            }
        }

        let state = RunState::default();
        let outcome = self.run_steps(sequence, &state).await;
        self.finish(report, &state, outcome)
    }

    fn finish(&self, mut report: RunReport, state: &RunState, outcome: Outcome) -> RunReport {
        report.tasks = state.take_records();
        report.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => report.success = true,
            Err(failure) => {
                report.failed_task = Some(failure.task);
                report.error = Some(failure.reason);
            }
        }
        report
    }

    fn run_task<'a>(&'a self, name: &'a str, state: &'a RunState) -> BoxFuture<'a, Outcome> {
        async move {
            let cell = state.cell(name);
            cell.get_or_init(|| self.execute_task(name, state))
                .await
                .clone()
        }
        .boxed()
    }

    fn execute_task<'a>(&'a self, name: &'a str, state: &'a RunState) -> BoxFuture<'a, Outcome> {
        async move {
            let task = match self.graph.get(name) {
                Some(task) => Arc::clone(task),
                None => {
                    return Err(Failure {
                        task: name.to_string(),
                        reason: Error::TaskNotFound(name.to_string()).to_string(),
                    })
                }
            };

            for prerequisite in &task.prerequisites {
                if let Err(failure) = self.run_task(prerequisite, state).await {
                    clog_debug!("'{}' skipped: prerequisite '{}' failed", name, prerequisite);
                    state.record(TaskRecord {
                        name: name.to_string(),
                        status: TaskStatus::Skipped {
                            blocked_by: prerequisite.clone(),
                        },
                        started_at: None,
                        duration_ms: None,
                    });
                    return Err(failure);
                }
            }

            clog!("Starting '{}'...", name);
            self.emit(RunEvent::TaskStarted {
                task: name.to_string(),
            });
            let started_at = Utc::now();
            let started = Instant::now();

            let result = match &task.action {
                TaskAction::Noop => Ok(()),
                TaskAction::Body(body) => body().await.map_err(|e| Failure {
                    task: name.to_string(),
                    reason: e.to_string(),
                }),
                TaskAction::Sequence(sequence) => self.run_steps(sequence, state).await,
            };
            let elapsed = started.elapsed();
            let duration_ms = Some(elapsed.as_millis() as u64);

            match result {
                Ok(()) => {
                    clog!("Finished '{}' after {}", name, human_duration(elapsed));
                    if let Some(message) = &task.completion_message {
                        clog!("{}", message);
                    }
                    state.record(TaskRecord {
                        name: name.to_string(),
                        status: TaskStatus::Completed,
                        started_at: Some(started_at),
                        duration_ms,
                    });
                    self.emit(RunEvent::TaskCompleted {
                        task: name.to_string(),
                        elapsed,
                    });
                    Ok(())
                }
                Err(failure) if task.policy == FailurePolicy::Continue => {
                    clog_warn!(
                        "'{}' reported an error, continuing: {}",
                        name,
                        failure.reason
                    );
                    state.record(TaskRecord {
                        name: name.to_string(),
                        status: TaskStatus::Tolerated {
                            error: failure.reason.clone(),
                        },
                        started_at: Some(started_at),
                        duration_ms,
                    });
                    self.emit(RunEvent::TaskTolerated {
                        task: name.to_string(),
                        error: failure.reason,
                    });
                    Ok(())
                }
                Err(failure) => {
                    clog_error!(
                        "'{}' errored after {}: {}",
                        name,
                        human_duration(elapsed),
                        failure.reason
                    );
                    state.record(TaskRecord {
                        name: name.to_string(),
                        status: TaskStatus::Failed {
                            error: failure.reason.clone(),
                        },
                        started_at: Some(started_at),
                        duration_ms,
                    });
                    self.emit(RunEvent::TaskFailed {
                        task: name.to_string(),
                        error: failure.reason.clone(),
                    });
                    Err(failure)
                }
            }
        }
        .boxed()
    }

    async fn run_steps(&self, sequence: &Sequence, state: &RunState) -> Outcome {
        let steps = sequence.steps();
        for (index, step) in steps.iter().enumerate() {
            self.emit(RunEvent::StepStarted {
                index,
                step: step.clone(),
            });

            let result = match step {
                Step::Task(name) => self.run_task(name, state).await,
                Step::Group(names) => {
                    let results =
                        join_all(names.iter().map(|name| self.run_task(name, state))).await;
                    results.into_iter().find_map(|r| r.err()).map_or(Ok(()), Err)
                }
            };

            if let Err(failure) = result {
                let skipped: Vec<String> = steps[index + 1..]
                    .iter()
                    .flat_map(|s| s.task_names())
                    .map(str::to_string)
                    .collect();
                if !skipped.is_empty() {
                    clog_error!(
                        "Sequence aborted at step {} ({}); not run: {}",
                        index + 1,
                        step,
                        skipped.join(", ")
                    );
                }
                self.emit(RunEvent::SequenceAborted {
                    failed_step: index,
                    skipped,
                });
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Events are dropped rather than awaited when the receiver lags, so a
    /// slow or abandoned subscriber never stalls the run.
    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                clog_trace!("run event dropped: {}", e);
            }
        }
    }
}
