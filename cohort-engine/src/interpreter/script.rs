//! JavaScript interpreter for engine scripts, backed by boa
//!
//! Every run gets a fresh boa context. The engine namespace is copied in as
//! JSON globals before the fragment runs and copied back out afterwards, so
//! only JSON-representable data persists between runs. Top-level `let` and
//! `const` declarations stay local to the fragment; plain assignments and
//! `var` declarations persist.

use boa_engine::{
    Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use cohort_core::{Binding, EngineError, Namespace, Result, Scope};
use serde_json::{json, Map, Value as JsonValue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::Interpreter;

const PRELUDE: &str = include_str!("prelude.js");

type JsonMap = Map<String, JsonValue>;

/// The built-in interpreter for `Code::Source` fragments.
///
/// Fragments are JavaScript. `assert(condition, message)` raises an
/// `AssertionError`, `print`/`console.log` write to the captured stdout and
/// functions pushed to the engine are callable by name. Failures keep their
/// JavaScript error names (`ReferenceError`, `TypeError`, `RangeError`,
/// `SyntaxError`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptInterpreter {
    loop_iteration_limit: Option<u64>,
}

impl ScriptInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort any loop that runs more than `limit` iterations
    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = Some(limit);
        self
    }

    fn context(&self) -> JsResult<Context> {
        let mut context = Context::default();
        if let Some(limit) = self.loop_iteration_limit {
            context.runtime_limits_mut().set_loop_iteration_limit(limit);
        }
        context.register_global_callable(
            JsString::from("__cohort_write"),
            2,
            NativeFunction::from_fn_ptr(write_output),
        )?;
        context.register_global_callable(
            JsString::from("__cohort_call"),
            2,
            NativeFunction::from_fn_ptr(call_pushed),
        )?;
        context.eval(Source::from_bytes(PRELUDE))?;
        Ok(context)
    }

    /// Run `source` and collect the globals it leaves behind.
    ///
    /// Exports are `None` when they could not be collected; the namespace is
    /// then left as it was.
    fn evaluate(
        &self,
        source: &str,
        bound: &Bound,
    ) -> (Result<Option<JsonValue>>, Option<JsonMap>) {
        let mut context = match self.context() {
            Ok(context) => context,
            Err(err) => {
                return (Err(EngineError::execution("RuntimeError", err.to_string())), None)
            }
        };
        let setup = match bound.injection() {
            Ok(script) => context.eval(Source::from_bytes(&script)).map(drop),
            Err(err) => return (Err(err), None),
        };
        if let Err(err) = setup {
            return (Err(failure(&err, &mut context)), None);
        }

        let outcome = match context.eval(Source::from_bytes(source)) {
            Ok(value) => completion(&mut context, value),
            Err(err) => Err(err),
        }
        .map_err(|err| failure(&err, &mut context));

        match (outcome, exports(&mut context)) {
            (outcome, Ok(exported)) => (outcome, Some(exported)),
            (Ok(_), Err(err)) => (Err(err), None),
            (Err(err), Err(_)) => (Err(err), None),
        }
    }
}

impl Interpreter for ScriptInterpreter {
    fn run(&self, source: &str, scope: &mut Scope<'_>) -> Result<Option<JsonValue>> {
        let bound = Bound::capture(scope.namespace());
        let (outcome, exported) = {
            let _frame = FrameGuard::enter(scope);
            self.evaluate(source, &bound)
        };
        if let Some(exported) = exported {
            bound.apply(scope.namespace(), exported);
        }
        outcome
    }
}

/// Namespace contents as they were handed to the script
struct Bound {
    values: BTreeMap<String, JsonValue>,
    functions: Vec<String>,
}

impl Bound {
    fn capture(namespace: &Namespace) -> Self {
        let mut values = BTreeMap::new();
        let mut functions = Vec::new();
        for name in namespace.keys() {
            match namespace.get(&name) {
                Some(Binding::Value(value)) => {
                    values.insert(name, value.clone());
                }
                Some(Binding::Function(_)) => functions.push(name),
                None => {}
            }
        }
        Self { values, functions }
    }

    /// Script that defines every bound name as a global
    fn injection(&self) -> Result<String> {
        let names: Vec<&String> = self.values.keys().chain(&self.functions).collect();
        let mut script = format!(
            "const __cohort_bound = new Set({});\n",
            serde_json::to_string(&names)?
        );
        for (name, value) in &self.values {
            script.push_str(&format!(
                "globalThis[{}] = {};\n",
                serde_json::to_string(name)?,
                serde_json::to_string(value)?
            ));
        }
        for name in &self.functions {
            script.push_str(&format!(
                "globalThis[{0}] = (...args) => __cohort_invoke({0}, args);\n",
                serde_json::to_string(name)?
            ));
        }
        Ok(script)
    }

    /// Write changed values back. Values the script deleted are removed;
    /// values it left untouched keep whatever a pushed function stored meanwhile.
    fn apply(&self, namespace: &mut Namespace, exported: JsonMap) {
        for name in self.values.keys() {
            if !exported.contains_key(name) {
                trace!(name = %name, "Binding removed by script");
                namespace.remove(name);
            }
        }
        for (name, value) in exported {
            if self.values.get(&name) != Some(&value) {
                namespace.set_value(name, value);
            }
        }
    }
}

/// State reachable from native callbacks while a script runs
struct Frame {
    namespace: Namespace,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

thread_local! {
    static FRAME: RefCell<Option<Frame>> = const { RefCell::new(None) };
}

/// Lends the engine namespace to the running script and returns it, with
/// anything printed, when dropped. Unwinding gives the namespace back too.
struct FrameGuard<'s, 'a> {
    scope: &'s mut Scope<'a>,
    outer: Option<Frame>,
}

impl<'s, 'a> FrameGuard<'s, 'a> {
    fn enter(scope: &'s mut Scope<'a>) -> Self {
        let frame = Frame {
            namespace: std::mem::take(scope.namespace()),
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        let outer = FRAME.replace(Some(frame));
        Self { scope, outer }
    }
}

impl Drop for FrameGuard<'_, '_> {
    fn drop(&mut self) {
        let Some(frame) = FRAME.replace(self.outer.take()) else {
            return;
        };
        *self.scope.namespace() = frame.namespace;
        for line in &frame.stdout {
            self.scope.print(line);
        }
        for line in &frame.stderr {
            self.scope.eprint(line);
        }
    }
}

fn string_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    match args.get(index) {
        Some(value) => Ok(value.to_string(context)?.to_std_string_escaped()),
        None => Err(JsNativeError::typ()
            .with_message(format!("missing argument {index}"))
            .into()),
    }
}

fn write_output(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let stream = string_arg(args, 0, context)?;
    let text = string_arg(args, 1, context)?;
    FRAME.with_borrow_mut(|frame| {
        if let Some(frame) = frame {
            match stream.as_str() {
                "stderr" => frame.stderr.push(text),
                _ => frame.stdout.push(text),
            }
        }
    });
    Ok(JsValue::undefined())
}

fn call_pushed(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, context)?;
    let payload = string_arg(args, 1, context)?;

    let outcome = serde_json::from_str::<Vec<JsonValue>>(&payload)
        .map_err(EngineError::from)
        .and_then(|call_args| {
            FRAME.with_borrow_mut(|frame| match frame {
                Some(frame) => frame.call(&name, &call_args),
                None => Err(EngineError::execution("RuntimeError", "no script is running")),
            })
        });
    let reply = match outcome {
        Ok(value) => json!({ "value": value }),
        Err(err) => {
            debug!(function = %name, error = %err, "Pushed function failed");
            json!({ "error": { "name": err.ename(), "message": message_of(&err) } })
        }
    };
    Ok(JsValue::from(JsString::from(reply.to_string().as_str())))
}

impl Frame {
    fn call(&mut self, name: &str, args: &[JsonValue]) -> Result<JsonValue> {
        let func = self.namespace.function(name)?.clone();
        let mut scope = Scope::new(&mut self.namespace);
        let result = func.call(&mut scope, args);
        let (stdout, stderr) = scope.into_output();
        self.stdout.extend(stdout.lines().map(str::to_string));
        self.stderr.extend(stderr.lines().map(str::to_string));
        result
    }
}

fn message_of(err: &EngineError) -> String {
    match err {
        EngineError::Execution(failure) => failure.evalue.clone(),
        other => other.to_string(),
    }
}

fn call_global(context: &mut Context, name: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let function = context.global_object().get(JsString::from(name), context)?;
    match function.as_callable() {
        Some(callable) => callable.call(&JsValue::undefined(), args, context),
        None => Err(JsNativeError::typ()
            .with_message(format!("{name} is not a function"))
            .into()),
    }
}

/// JSON form of a completion value; `undefined`, `null` and functions give none
fn completion(context: &mut Context, value: JsValue) -> JsResult<Option<JsonValue>> {
    if value.is_undefined() || value.is_null() || value.is_callable() {
        return Ok(None);
    }
    let text = call_global(context, "__cohort_json", &[value])?;
    if text.is_undefined() {
        return Ok(None);
    }
    let text = text.to_string(context)?.to_std_string_escaped();
    serde_json::from_str::<JsonValue>(&text)
        .map(|value| Some(value).filter(|value| !value.is_null()))
        .map_err(|err| JsNativeError::typ().with_message(err.to_string()).into())
}

fn exports(context: &mut Context) -> Result<JsonMap> {
    let text = call_global(context, "__cohort_export", &[])
        .and_then(|text| text.to_string(context))
        .map_err(|err| failure(&err, context))?
        .to_std_string_escaped();
    Ok(serde_json::from_str(&text)?)
}

/// Map a JavaScript exception onto a failure with the same error name
fn failure(err: &JsError, context: &mut Context) -> EngineError {
    if let Some(native) = err.as_native() {
        let text = native.to_string();
        return match text.split_once(": ") {
            Some((name, message)) => EngineError::execution(name, message),
            None => EngineError::execution(text.as_str(), ""),
        };
    }

    let Some(value) = err.as_opaque() else {
        return EngineError::execution("Error", err.to_string());
    };
    match value.as_object() {
        Some(object) => {
            let mut property = |key: &str| {
                object
                    .get(JsString::from(key), context)
                    .and_then(|value| value.to_string(context))
                    .map(|text| text.to_std_string_escaped())
                    .ok()
            };
            let name = property("name").unwrap_or_else(|| "Error".to_string());
            let message = property("message").unwrap_or_default();
            EngineError::execution(name, message)
        }
        None => {
            let text = value
                .to_string(context)
                .map(|text| text.to_std_string_escaped())
                .unwrap_or_default();
            EngineError::execution("Error", text)
        }
    }
}
