//! Units of work for the task scheduler

use chrono::{DateTime, Utc};
use cohort_core::{Code, EngineError, EngineId, Result};
use cohort_engine::Bindings;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::command::EngineCommand;
use crate::queued::QueuedEngine;

/// Sequential id assigned by the scheduler
pub type TaskId = u64;

/// Code plus the namespace traffic around it and a failure policy.
///
/// Built with chained setters:
///
/// ```ignore
/// let task = Task::new("total = xs.reduce((a, b) => a + b, 0)")
///     .push("xs", json!([1, 2, 3]))
///     .pull(["total"])
///     .retries(2);
/// ```
#[derive(Debug, Clone)]
pub struct Task {
    pub code: Code,
    /// Bound on the engine before the code runs
    pub push: Bindings,
    /// Read back after the code runs
    pub pull: Vec<String>,
    pub clear_before: bool,
    pub clear_after: bool,
    /// Re-runs allowed after a failure
    pub retries: u32,
    /// Runs in place of this task once the retries are spent
    pub recovery_task: Option<Box<Task>>,
}

impl Task {
    pub fn new(code: impl Into<Code>) -> Self {
        Self {
            code: code.into(),
            push: Bindings::new(),
            pull: Vec::new(),
            clear_before: false,
            clear_after: false,
            retries: 0,
            recovery_task: None,
        }
    }

    pub fn push(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.push.insert(name.into(), value);
        self
    }

    pub fn push_all(mut self, bindings: Bindings) -> Self {
        self.push.extend(bindings);
        self
    }

    pub fn pull<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pull.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn clear_before(mut self, clear: bool) -> Self {
        self.clear_before = clear;
        self
    }

    pub fn clear_after(mut self, clear: bool) -> Self {
        self.clear_after = clear;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn recovery_task(mut self, task: Task) -> Self {
        self.recovery_task = Some(Box::new(task));
        self
    }

    /// Run once on `engine` and return the pulled bindings
    pub async fn run_on(&self, engine: &QueuedEngine) -> Result<Bindings> {
        if self.clear_before {
            engine.submit(EngineCommand::Reset).wait().await?;
        }

        let outcome = self.run_body(engine).await;

        if self.clear_after {
            engine.submit(EngineCommand::Reset).wait().await?;
        }
        outcome
    }

    async fn run_body(&self, engine: &QueuedEngine) -> Result<Bindings> {
        if !self.push.is_empty() {
            engine
                .submit(EngineCommand::Push(self.push.clone()))
                .wait()
                .await?;
        }
        engine
            .submit(EngineCommand::Execute(self.code.clone()))
            .wait()
            .await?;
        if self.pull.is_empty() {
            return Ok(Bindings::new());
        }

        let values = engine
            .submit(EngineCommand::Pull(self.pull.clone()))
            .wait()
            .await?
            .into_values()?;
        Ok(self.pull.iter().cloned().zip(values).collect())
    }
}

/// Where a task is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for an engine, including after a failed attempt
    Queued,
    Running,
    Succeeded,
    /// The recovery task ran in place of the original and succeeded
    Recovered,
    Failed,
    Aborted,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Recovered | TaskState::Failed | TaskState::Aborted
        )
    }
}

/// Outcome of a task: the pulled namespace or the failure that ended it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub ns: Bindings,
    pub failure: Option<EngineError>,
    /// Engine of the last attempt
    pub engine_id: Option<EngineId>,
    /// Attempts made, recovery included
    pub attempts: u32,
    pub recovered: bool,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// A pulled value, or the task's failure if it failed
    pub fn get(&self, name: &str) -> Result<JsonValue> {
        self.raise_exception()?;
        self.ns
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::name_error(name))
    }

    /// Return the captured failure as an error
    pub fn raise_exception(&self) -> Result<()> {
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.submitted_at).num_milliseconds()
    }
}
