//! Error taxonomy for Cohort
//!
//! Every failure that can reach a caller is an [`EngineError`]. The type is
//! `Clone` so one failure can be delivered to several waiting futures, and
//! serializable so it can travel back from a remote engine unchanged.

use serde::{Deserialize, Serialize};
use std::ops::Index;
use thiserror::Error;

use crate::types::EngineId;

/// Result type alias for Cohort operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Core error type for all engine, queue and scheduling failures
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    /// A targeted engine id is not registered
    #[error("InvalidEngineID: engine {id} is not registered")]
    InvalidEngineId { id: EngineId },

    /// A fan-out to "all" found an empty registry
    #[error("NoEnginesRegistered: there are no engines registered")]
    NoEnginesRegistered,

    /// Every id in the pool is in use
    #[error("Engine id pool exhausted (max_engines = {max_engines})")]
    EnginePoolExhausted { max_engines: usize },

    /// A queued command was dropped because an earlier command failed
    #[error("QueueCleared: queue cleared on engine {engine_id:?} after failure: {reason}")]
    QueueCleared {
        engine_id: Option<EngineId>,
        reason: String,
    },

    /// Non-blocking poll of a result that is not yet available
    #[error("ResultNotCompleted: result {id} is not ready yet")]
    ResultNotCompleted { id: String },

    /// Unknown or already consumed pending-result id
    #[error("InvalidDeferredID: {id}")]
    InvalidDeferredId { id: String },

    /// The pending result was deleted before it resolved
    #[error("AbortedPendingDeferredError: pending result {id} was aborted")]
    AbortedPendingDeferred { id: String },

    /// A value was rejected by a properties store
    #[error("InvalidProperty: {name}: {reason}")]
    InvalidProperty { name: String, reason: String },

    /// Aggregate of per-engine failures from one fan-out
    #[error(transparent)]
    Composite(CompositeError),

    /// Lookup of an unbound name
    #[error("NameError: name '{name}' is not defined")]
    NameError { name: String },

    /// A value could not be serialized or deserialized
    #[error("SerializationError: {message}")]
    Serialization { message: String },

    /// A failure raised while an engine ran user code
    #[error(transparent)]
    Execution(RemoteFailure),

    /// The engine was killed and accepts no further calls
    #[error("EngineKilled: engine {engine_id:?} has been killed")]
    EngineKilled { engine_id: Option<EngineId> },

    /// The transport to a remote engine went away
    #[error("ConnectionLost: {reason}")]
    ConnectionLost { reason: String },

    /// Unknown, cleared or already completed task id
    #[error("IndexError: {message}")]
    IndexError { message: String },

    /// Malformed argument
    #[error("TypeError: {message}")]
    TypeError { message: String },

    /// The task was aborted before it was dispatched
    #[error("TaskAborted: task {task_id} was aborted")]
    TaskAborted { task_id: u64 },
}

impl EngineError {
    /// Build an execution failure with a Python-style error name
    pub fn execution(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        EngineError::Execution(RemoteFailure::new(ename, evalue))
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        EngineError::Serialization {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        EngineError::TypeError {
            message: message.into(),
        }
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        EngineError::IndexError {
            message: message.into(),
        }
    }

    pub fn name_error(name: impl Into<String>) -> Self {
        EngineError::NameError { name: name.into() }
    }

    /// Short class name used when the error is reported as a remote failure
    pub fn kind_name(&self) -> &'static str {
        match self {
            EngineError::InvalidEngineId { .. } => "InvalidEngineID",
            EngineError::NoEnginesRegistered => "NoEnginesRegistered",
            EngineError::EnginePoolExhausted { .. } => "EnginePoolExhausted",
            EngineError::QueueCleared { .. } => "QueueCleared",
            EngineError::ResultNotCompleted { .. } => "ResultNotCompleted",
            EngineError::InvalidDeferredId { .. } => "InvalidDeferredID",
            EngineError::AbortedPendingDeferred { .. } => "AbortedPendingDeferredError",
            EngineError::InvalidProperty { .. } => "InvalidProperty",
            EngineError::Composite(_) => "CompositeError",
            EngineError::NameError { .. } => "NameError",
            EngineError::Serialization { .. } => "SerializationError",
            EngineError::Execution(_) => "RemoteFailure",
            EngineError::EngineKilled { .. } => "EngineKilled",
            EngineError::ConnectionLost { .. } => "ConnectionLost",
            EngineError::IndexError { .. } => "IndexError",
            EngineError::TypeError { .. } => "TypeError",
            EngineError::TaskAborted { .. } => "TaskAborted",
        }
    }

    /// Convert into an execution failure tagged with where it happened.
    ///
    /// Already-tagged failures keep their existing tags.
    pub fn tagged(self, engine_id: EngineId, method: &str, args: impl Into<String>) -> Self {
        let mut failure = match self {
            EngineError::Execution(failure) => failure,
            other => RemoteFailure::new(other.kind_name(), other.to_string()),
        };
        failure.engine_id.get_or_insert(engine_id);
        failure.method.get_or_insert_with(|| method.to_string());
        if failure.args.is_none() {
            failure.args = Some(args.into());
        }
        EngineError::Execution(failure)
    }

    /// Error name as seen by callers; execution failures report their own name
    pub fn ename(&self) -> &str {
        match self {
            EngineError::Execution(failure) => &failure.ename,
            other => other.kind_name(),
        }
    }
}

/// A failure captured on an engine while running a method
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{ename}: {evalue}")]
pub struct RemoteFailure {
    /// Error class name (e.g. `AssertionError`)
    pub ename: String,
    /// Error message
    pub evalue: String,
    /// Engine that raised the failure
    pub engine_id: Option<EngineId>,
    /// Engine method that was running
    pub method: Option<String>,
    /// Rendered arguments of that method
    pub args: Option<String>,
}

impl RemoteFailure {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.into(),
            evalue: evalue.into(),
            engine_id: None,
            method: None,
            args: None,
        }
    }
}

/// One failure inside a [`CompositeError`] with the engine it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub engine_id: Option<EngineId>,
    pub error: EngineError,
}

/// Aggregate failure of a fan-out call.
///
/// The failure list is always flat: building a composite from failures that
/// are themselves composites splices their entries in place.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("CompositeError: {message} ({} engine failures)", .failures.len())]
pub struct CompositeError {
    pub message: String,
    failures: Vec<FailureEntry>,
}

impl CompositeError {
    /// Build a composite from (origin, failure) pairs, flattening nested composites
    pub fn new(
        message: impl Into<String>,
        failures: impl IntoIterator<Item = (Option<EngineId>, EngineError)>,
    ) -> Self {
        let mut flat = Vec::new();
        for (engine_id, error) in failures {
            match error {
                EngineError::Composite(inner) => flat.extend(inner.failures),
                error => flat.push(FailureEntry { engine_id, error }),
            }
        }
        Self {
            message: message.into(),
            failures: flat,
        }
    }

    /// Collect per-engine results: all values in order, or every failure.
    ///
    /// A single failing entry fails the whole collection; successful values
    /// are dropped in that case.
    pub fn collect<T>(
        message: impl Into<String>,
        results: impl IntoIterator<Item = (Option<EngineId>, Result<T>)>,
    ) -> std::result::Result<Vec<T>, CompositeError> {
        let mut values = Vec::new();
        let mut failures = Vec::new();
        for (engine_id, result) in results {
            match result {
                Ok(value) => values.push(value),
                Err(error) => failures.push((engine_id, error)),
            }
        }
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(CompositeError::new(message, failures))
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FailureEntry> {
        self.failures.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailureEntry> {
        self.failures.iter()
    }

    pub fn failures(&self) -> &[FailureEntry] {
        &self.failures
    }

    /// Re-raise the failure at `index`
    pub fn raise_exception(&self, index: usize) -> Result<()> {
        match self.failures.get(index) {
            Some(entry) => Err(entry.error.clone()),
            None => Err(EngineError::index_error(format!(
                "an exception with index {} does not exist (composite holds {})",
                index,
                self.failures.len()
            ))),
        }
    }

    /// One line per failure, prefixed with the originating engine
    pub fn summaries(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|entry| match entry.engine_id {
                Some(id) => format!("[engine {}] {}", id, entry.error),
                None => format!("[unknown engine] {}", entry.error),
            })
            .collect()
    }
}

impl Index<usize> for CompositeError {
    type Output = FailureEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.failures[index]
    }
}

impl From<CompositeError> for EngineError {
    fn from(err: CompositeError) -> Self {
        EngineError::Composite(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::serialization(err.to_string())
    }
}
