//! The capability set every compute engine exposes

use async_trait::async_trait;
use cohort_core::{Callable, Code, EngineId, ExecuteResult, Result, ResultIndex};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Name bindings pushed to or pulled from an engine namespace
pub type Bindings = BTreeMap<String, JsonValue>;

/// Native functions pushed to an engine namespace
pub type Functions = BTreeMap<String, Callable>;

/// Name the engine identity is bound to in every namespace
pub const ID_BINDING: &str = "id";

/// Engine core capability trait.
///
/// One implementation exists per transport: [`crate::LocalEngine`] runs
/// in-process, a remote adapter forwards every call over a connection.
/// Failures are always returned, never allowed to take the engine down.
#[async_trait]
pub trait EngineCore: Send + Sync {
    /// Current engine identity
    fn id(&self) -> EngineId;

    /// Assign a new identity and rebind it in the namespace
    async fn set_id(&self, id: EngineId) -> Result<()>;

    /// Run code against the persistent namespace
    async fn execute(&self, code: Code) -> Result<ExecuteResult>;

    async fn push(&self, bindings: Bindings) -> Result<()>;

    /// Values bound to `names`, in order
    async fn pull(&self, names: Vec<String>) -> Result<Vec<JsonValue>>;

    async fn push_function(&self, functions: Functions) -> Result<()>;

    async fn pull_function(&self, names: Vec<String>) -> Result<Vec<Callable>>;

    /// A past successful execution
    async fn get_result(&self, index: ResultIndex) -> Result<ExecuteResult>;

    /// Discard the namespace and reseed the identity binding
    async fn reset(&self) -> Result<()>;

    /// Terminate the engine. Every later call fails.
    async fn kill(&self) -> Result<()>;

    /// Names currently bound in the namespace
    async fn keys(&self) -> Result<Vec<String>>;

    /// Properties named in `names`, or every property when `None`
    async fn get_properties(&self, names: Option<Vec<String>>) -> Result<Bindings>;

    async fn set_properties(&self, properties: Bindings) -> Result<()>;

    async fn has_properties(&self, names: Vec<String>) -> Result<Vec<bool>>;

    async fn del_properties(&self, names: Vec<String>) -> Result<()>;

    async fn clear_properties(&self) -> Result<()>;
}
