//! Code fragments, native callables and the namespace they run against

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Signature of a native function that can run on an engine
pub type CallableFn = dyn Fn(&mut Scope<'_>, &[JsonValue]) -> Result<JsonValue> + Send + Sync;

/// A named native function.
///
/// Callables are shared, never copied: cloning hands out another reference
/// to the same function.
#[derive(Clone)]
pub struct Callable {
    name: String,
    func: Arc<CallableFn>,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &[JsonValue]) -> Result<JsonValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, scope: &mut Scope<'_>, args: &[JsonValue]) -> Result<JsonValue> {
        (self.func)(scope, args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {}>", self.name)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

/// A unit of code an engine can execute
#[derive(Debug, Clone)]
pub enum Code {
    /// Source text for the engine's interpreter
    Source(String),
    /// A native callable applied to arguments
    Call { func: Callable, args: Vec<JsonValue> },
}

impl Code {
    pub fn source(source: impl Into<String>) -> Self {
        Code::Source(source.into())
    }

    pub fn call(func: Callable, args: Vec<JsonValue>) -> Self {
        Code::Call { func, args }
    }

    /// Short human-readable description for logs and queue listings
    pub fn describe(&self) -> String {
        match self {
            Code::Source(source) => {
                let first = source.lines().next().unwrap_or_default();
                if source.lines().count() > 1 || first.len() > 60 {
                    format!("{}...", first.chars().take(60).collect::<String>())
                } else {
                    first.to_string()
                }
            }
            Code::Call { func, args } => format!("{}({} args)", func.name(), args.len()),
        }
    }
}

impl From<&str> for Code {
    fn from(source: &str) -> Self {
        Code::Source(source.to_string())
    }
}

impl From<String> for Code {
    fn from(source: String) -> Self {
        Code::Source(source)
    }
}

/// A name binding in an engine namespace
#[derive(Debug, Clone)]
pub enum Binding {
    Value(JsonValue),
    Function(Callable),
}

/// The persistent name table of an engine
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: BTreeMap<String, Binding>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Data value bound to `name`; functions are not transportable values
    pub fn value(&self, name: &str) -> Result<&JsonValue> {
        match self.bindings.get(name) {
            Some(Binding::Value(value)) => Ok(value),
            Some(Binding::Function(func)) => Err(EngineError::serialization(format!(
                "'{}' is bound to {:?}, which cannot be serialized as a value",
                name, func
            ))),
            None => Err(EngineError::name_error(name)),
        }
    }

    pub fn function(&self, name: &str) -> Result<&Callable> {
        match self.bindings.get(name) {
            Some(Binding::Function(func)) => Ok(func),
            Some(Binding::Value(_)) => Err(EngineError::type_error(format!(
                "'{}' is not a function",
                name
            ))),
            None => Err(EngineError::name_error(name)),
        }
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: JsonValue) {
        self.bindings.insert(name.into(), Binding::Value(value));
    }

    pub fn set_function(&mut self, name: impl Into<String>, func: Callable) {
        self.bindings.insert(name.into(), Binding::Function(func));
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Execution scope handed to interpreters and callables.
///
/// Borrows the engine namespace for the duration of one `execute` call and
/// captures anything written to stdout/stderr.
pub struct Scope<'a> {
    namespace: &'a mut Namespace,
    stdout: String,
    stderr: String,
}

impl<'a> Scope<'a> {
    pub fn new(namespace: &'a mut Namespace) -> Self {
        Self {
            namespace,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<JsonValue> {
        self.namespace.value(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: JsonValue) {
        self.namespace.set_value(name, value);
    }

    pub fn function(&self, name: &str) -> Result<Callable> {
        self.namespace.function(name).cloned()
    }

    pub fn is_function(&self, name: &str) -> bool {
        matches!(self.namespace.get(name), Some(Binding::Function(_)))
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.namespace
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::name_error(name))
    }

    pub fn print(&mut self, line: &str) {
        self.stdout.push_str(line);
        self.stdout.push('\n');
    }

    pub fn eprint(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');
    }

    pub fn namespace(&mut self) -> &mut Namespace {
        &mut *self.namespace
    }

    /// Captured (stdout, stderr)
    pub fn into_output(self) -> (String, String) {
        (self.stdout, self.stderr)
    }
}
