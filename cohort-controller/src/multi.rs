//! Fan-out of engine operations over a set of registered engines
//!
//! Every operation is submitted to each target's queue and the per-engine
//! results are joined in target order. If any engine fails, the whole call
//! fails with a [`CompositeError`](cohort_core::CompositeError) listing every
//! failure; successful results from the same call are discarded.

use cohort_core::{
    Callable, Code, Deferred, EngineError, EngineId, ExecuteResult, Result, ResultIndex,
};
use cohort_engine::{Bindings, Functions};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use crate::command::{CommandOutput, EngineCommand};
use crate::controller::Controller;
use crate::pending::PendingResults;
use crate::queued::{QueueStatus, QueuedEngine};

/// Name a scattered chunk is bound to during `map`
pub const MAP_INPUT: &str = "_cohort_map_in";
/// Name `map` leaves each engine's results under
pub const MAP_OUTPUT: &str = "_cohort_map_out";

/// Which engines an operation goes to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Targets {
    One(EngineId),
    Many(Vec<EngineId>),
    #[default]
    All,
}

impl From<EngineId> for Targets {
    fn from(id: EngineId) -> Self {
        Targets::One(id)
    }
}

impl From<Vec<EngineId>> for Targets {
    fn from(ids: Vec<EngineId>) -> Self {
        Targets::Many(ids)
    }
}

impl From<&[EngineId]> for Targets {
    fn from(ids: &[EngineId]) -> Self {
        Targets::Many(ids.to_vec())
    }
}

/// Split `items` into `parts` contiguous chunks of `ceil(len / parts)`
/// elements. Trailing chunks may be short or empty.
pub fn partition<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    if parts == 0 {
        return Vec::new();
    }
    let size = items.len().div_ceil(parts);
    (0..parts)
        .map(|i| {
            let start = (i * size).min(items.len());
            let end = (start + size).min(items.len());
            items[start..end].to_vec()
        })
        .collect()
}

pub struct MultiEngine {
    controller: Arc<Controller>,
    pending: PendingResults<Vec<CommandOutput>>,
}

impl MultiEngine {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            pending: PendingResults::new(),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Results saved by [`MultiEngine::submit_nonblocking`]
    pub fn pending(&self) -> &PendingResults<Vec<CommandOutput>> {
        &self.pending
    }

    /// Resolve targets to queued engines. Fails before anything is submitted.
    pub fn resolve(&self, targets: &Targets) -> Result<Vec<Arc<QueuedEngine>>> {
        let lookup = |id: &EngineId| {
            self.controller
                .engine(*id)
                .ok_or(EngineError::InvalidEngineId { id: *id })
        };
        match targets {
            Targets::One(id) => Ok(vec![lookup(id)?]),
            Targets::Many(ids) => ids.iter().map(lookup).collect(),
            Targets::All => {
                let engines: Vec<_> = self
                    .controller
                    .engine_ids()
                    .iter()
                    .filter_map(|id| self.controller.engine(*id))
                    .collect();
                if engines.is_empty() {
                    return Err(EngineError::NoEnginesRegistered);
                }
                Ok(engines)
            }
        }
    }

    /// Send one command to every target and join the results
    pub fn submit(
        &self,
        targets: impl Into<Targets>,
        command: EngineCommand,
    ) -> Result<Deferred<Vec<CommandOutput>>> {
        let targets = targets.into();
        let engines = self.resolve(&targets)?;
        debug!(targets = ?targets, command = %command.describe(), "Fanning out");

        let message = format!("{} failed on one or more engines", command.method());
        let entries = engines
            .iter()
            .map(|engine| (Some(engine.id()), engine.submit(command.clone())))
            .collect();
        Ok(Deferred::join(entries, message))
    }

    /// Like [`MultiEngine::submit`] but returns a pending-result id
    pub fn submit_nonblocking(
        &self,
        targets: impl Into<Targets>,
        command: EngineCommand,
    ) -> Result<String> {
        let deferred = self.submit(targets, command)?;
        Ok(self.pending.save(deferred))
    }

    async fn run<T>(
        &self,
        targets: impl Into<Targets>,
        command: EngineCommand,
        convert: fn(CommandOutput) -> Result<T>,
    ) -> Result<Vec<T>> {
        let outputs = self.submit(targets, command)?.wait().await?;
        outputs.into_iter().map(convert).collect()
    }

    async fn run_done(&self, targets: impl Into<Targets>, command: EngineCommand) -> Result<()> {
        self.run(targets, command, CommandOutput::into_done)
            .await
            .map(|_| ())
    }

    pub async fn execute(
        &self,
        targets: impl Into<Targets>,
        code: impl Into<Code>,
    ) -> Result<Vec<ExecuteResult>> {
        self.run(
            targets,
            EngineCommand::Execute(code.into()),
            CommandOutput::into_executed,
        )
        .await
    }

    pub async fn push(&self, targets: impl Into<Targets>, bindings: Bindings) -> Result<()> {
        self.run_done(targets, EngineCommand::Push(bindings)).await
    }

    /// Values of `names` from every target, one list per engine
    pub async fn pull(
        &self,
        targets: impl Into<Targets>,
        names: Vec<String>,
    ) -> Result<Vec<Vec<JsonValue>>> {
        self.run(targets, EngineCommand::Pull(names), CommandOutput::into_values)
            .await
    }

    pub async fn push_function(
        &self,
        targets: impl Into<Targets>,
        functions: Functions,
    ) -> Result<()> {
        self.run_done(targets, EngineCommand::PushFunction(functions))
            .await
    }

    pub async fn pull_function(
        &self,
        targets: impl Into<Targets>,
        names: Vec<String>,
    ) -> Result<Vec<Vec<Callable>>> {
        self.run(
            targets,
            EngineCommand::PullFunction(names),
            CommandOutput::into_functions,
        )
        .await
    }

    pub async fn get_result(
        &self,
        targets: impl Into<Targets>,
        index: ResultIndex,
    ) -> Result<Vec<ExecuteResult>> {
        self.run(
            targets,
            EngineCommand::GetResult(index),
            CommandOutput::into_executed,
        )
        .await
    }

    pub async fn reset(&self, targets: impl Into<Targets>) -> Result<()> {
        self.run_done(targets, EngineCommand::Reset).await
    }

    pub async fn kill(&self, targets: impl Into<Targets>) -> Result<()> {
        self.run_done(targets, EngineCommand::Kill).await
    }

    pub async fn keys(&self, targets: impl Into<Targets>) -> Result<Vec<Vec<String>>> {
        self.run(targets, EngineCommand::Keys, CommandOutput::into_keys)
            .await
    }

    pub async fn get_properties(
        &self,
        targets: impl Into<Targets>,
        names: Option<Vec<String>>,
    ) -> Result<Vec<Bindings>> {
        self.run(
            targets,
            EngineCommand::GetProperties(names),
            CommandOutput::into_properties,
        )
        .await
    }

    pub async fn set_properties(
        &self,
        targets: impl Into<Targets>,
        properties: Bindings,
    ) -> Result<()> {
        self.run_done(targets, EngineCommand::SetProperties(properties))
            .await
    }

    pub async fn has_properties(
        &self,
        targets: impl Into<Targets>,
        names: Vec<String>,
    ) -> Result<Vec<Vec<bool>>> {
        self.run(
            targets,
            EngineCommand::HasProperties(names),
            CommandOutput::into_flags,
        )
        .await
    }

    pub async fn del_properties(
        &self,
        targets: impl Into<Targets>,
        names: Vec<String>,
    ) -> Result<()> {
        self.run_done(targets, EngineCommand::DelProperties(names))
            .await
    }

    pub async fn clear_properties(&self, targets: impl Into<Targets>) -> Result<()> {
        self.run_done(targets, EngineCommand::ClearProperties).await
    }

    pub fn queue_status(&self, targets: impl Into<Targets>) -> Result<Vec<QueueStatus>> {
        Ok(self
            .resolve(&targets.into())?
            .iter()
            .map(|engine| engine.queue_status())
            .collect())
    }

    /// Push contiguous chunks of `values` to the targets, chunk `i` to engine `i`
    pub async fn scatter(
        &self,
        targets: impl Into<Targets>,
        name: &str,
        values: &[JsonValue],
    ) -> Result<()> {
        let engines = self.resolve(&targets.into())?;
        let chunks = partition(values, engines.len());

        let entries = engines
            .iter()
            .zip(chunks)
            .map(|(engine, chunk)| {
                let mut bindings = Bindings::new();
                bindings.insert(name.to_string(), JsonValue::Array(chunk));
                (Some(engine.id()), engine.submit(EngineCommand::Push(bindings)))
            })
            .collect();
        Deferred::join(entries, "scatter failed on one or more engines")
            .wait()
            .await
            .map(|_| ())
    }

    /// Pull `name` from every target and concatenate the chunks in target order
    pub async fn gather(&self, targets: impl Into<Targets>, name: &str) -> Result<Vec<JsonValue>> {
        let pulled = self.pull(targets, vec![name.to_string()]).await?;
        let mut gathered = Vec::new();
        for value in pulled.into_iter().flatten() {
            match value {
                JsonValue::Array(items) => gathered.extend(items),
                other => gathered.push(other),
            }
        }
        Ok(gathered)
    }

    /// Apply `func` to every element of `values`, spread across the targets
    pub async fn map(
        &self,
        targets: impl Into<Targets>,
        func: Callable,
        values: &[JsonValue],
    ) -> Result<Vec<JsonValue>> {
        let targets = targets.into();
        self.scatter(targets.clone(), MAP_INPUT, values).await?;

        let apply = Callable::new(format!("map({})", func.name()), move |scope, _args| {
            let items = match scope.get(MAP_INPUT)? {
                JsonValue::Array(items) => items,
                other => vec![other],
            };
            let mapped = items
                .iter()
                .map(|item| func.call(scope, std::slice::from_ref(item)))
                .collect::<Result<Vec<_>>>()?;
            scope.set(MAP_OUTPUT, JsonValue::Array(mapped));
            Ok(JsonValue::Null)
        });
        self.execute(targets.clone(), Code::call(apply, Vec::new()))
            .await?;

        self.gather(targets, MAP_OUTPUT).await
    }
}
