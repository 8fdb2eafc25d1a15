//! Source interpreters for `Code::Source` fragments

mod script;

use cohort_core::{Result, Scope};
use serde_json::Value as JsonValue;

pub use script::ScriptInterpreter;

/// Runs source text against an engine scope.
///
/// Returns the completion value of the fragment, if it has one.
pub trait Interpreter: Send + Sync {
    fn run(&self, source: &str, scope: &mut Scope<'_>) -> Result<Option<JsonValue>>;
}
