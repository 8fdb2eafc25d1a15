//! In-process engine

use async_trait::async_trait;
use chrono::Utc;
use cohort_core::{
    Callable, Code, EngineError, EngineId, ExecuteResult, Namespace, Result, ResultIndex, Scope,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{Bindings, EngineCore, Functions, ID_BINDING};
use crate::interpreter::{Interpreter, ScriptInterpreter};
use crate::properties::PropertiesStore;

struct EngineState {
    id: EngineId,
    namespace: Namespace,
    history: Vec<ExecuteResult>,
    properties: PropertiesStore,
    killed: bool,
}

impl EngineState {
    fn new(id: EngineId) -> Self {
        let mut state = Self {
            id,
            namespace: Namespace::new(),
            history: Vec::new(),
            properties: PropertiesStore::new(),
            killed: false,
        };
        state.reseed();
        state
    }

    fn reseed(&mut self) {
        self.namespace.set_value(ID_BINDING, JsonValue::from(self.id));
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.killed {
            Err(EngineError::EngineKilled {
                engine_id: Some(self.id),
            })
        } else {
            Ok(())
        }
    }
}

/// An engine that runs code in the current process.
///
/// State lives behind a lock that is never held across an await point, so
/// each call runs to completion before the next one starts.
pub struct LocalEngine {
    state: Mutex<EngineState>,
    interpreter: Arc<dyn Interpreter>,
}

impl LocalEngine {
    pub fn new(id: EngineId) -> Self {
        Self::with_interpreter(id, Arc::new(ScriptInterpreter::new()))
    }

    pub fn with_interpreter(id: EngineId, interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            state: Mutex::new(EngineState::new(id)),
            interpreter,
        }
    }

    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }

    /// Number of successful executions so far
    pub fn execution_count(&self) -> usize {
        self.state.lock().history.len()
    }

    fn run(&self, state: &mut EngineState, code: &Code) -> Result<ExecuteResult> {
        let started_at = Utc::now();
        let mut scope = Scope::new(&mut state.namespace);
        let value = match code {
            Code::Source(source) => self.interpreter.run(source, &mut scope)?,
            Code::Call { func, args } => {
                Some(func.call(&mut scope, args)?).filter(|v| !v.is_null())
            }
        };
        let (stdout, stderr) = scope.into_output();

        Ok(ExecuteResult {
            execution_count: state.history.len() as u64,
            stdout,
            stderr,
            engine_id: state.id,
            value,
            started_at,
            completed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl EngineCore for LocalEngine {
    fn id(&self) -> EngineId {
        self.state.lock().id
    }

    async fn set_id(&self, id: EngineId) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        state.id = id;
        state.reseed();
        Ok(())
    }

    async fn execute(&self, code: Code) -> Result<ExecuteResult> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        let engine_id = state.id;
        debug!(engine_id, code = %code.describe(), "Executing");

        match self.run(&mut state, &code) {
            Ok(result) => {
                state.history.push(result.clone());
                Ok(result)
            }
            Err(err) => {
                debug!(engine_id, error = %err, "Execution failed");
                Err(err.tagged(engine_id, "execute", code.describe()))
            }
        }
    }

    async fn push(&self, bindings: Bindings) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        for (name, value) in bindings {
            state.namespace.set_value(name, value);
        }
        Ok(())
    }

    async fn pull(&self, names: Vec<String>) -> Result<Vec<JsonValue>> {
        let state = self.state.lock();
        state.ensure_alive()?;
        names
            .iter()
            .map(|name| state.namespace.value(name).cloned())
            .collect()
    }

    async fn push_function(&self, functions: Functions) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        for (name, func) in functions {
            state.namespace.set_function(name, func);
        }
        Ok(())
    }

    async fn pull_function(&self, names: Vec<String>) -> Result<Vec<Callable>> {
        let state = self.state.lock();
        state.ensure_alive()?;
        names
            .iter()
            .map(|name| state.namespace.function(name).cloned())
            .collect()
    }

    async fn get_result(&self, index: ResultIndex) -> Result<ExecuteResult> {
        let state = self.state.lock();
        state.ensure_alive()?;
        let found = match index {
            ResultIndex::Latest => state.history.last(),
            ResultIndex::At(i) => usize::try_from(i).ok().and_then(|i| state.history.get(i)),
        };
        found.cloned().ok_or_else(|| {
            EngineError::index_error(format!(
                "no result at index {} on engine {} ({} recorded)",
                index,
                state.id,
                state.history.len()
            ))
        })
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        state.namespace.clear();
        state.reseed();
        debug!(engine_id = state.id, "Namespace reset");
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.killed {
            warn!(engine_id = state.id, "Engine already killed");
        }
        state.killed = true;
        state.namespace.clear();
        info!(engine_id = state.id, "Engine killed");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.ensure_alive()?;
        Ok(state.namespace.keys())
    }

    async fn get_properties(&self, names: Option<Vec<String>>) -> Result<Bindings> {
        let state = self.state.lock();
        state.ensure_alive()?;
        state.properties.get_many(names.as_deref())
    }

    async fn set_properties(&self, properties: Bindings) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        state.properties.update(properties)
    }

    async fn has_properties(&self, names: Vec<String>) -> Result<Vec<bool>> {
        let state = self.state.lock();
        state.ensure_alive()?;
        Ok(names.iter().map(|name| state.properties.has(name)).collect())
    }

    async fn del_properties(&self, names: Vec<String>) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        if let Some(missing) = names.iter().find(|name| !state.properties.has(name)) {
            return Err(EngineError::InvalidProperty {
                name: missing.clone(),
                reason: "no such property".to_string(),
            });
        }
        for name in &names {
            state.properties.del(name)?;
        }
        Ok(())
    }

    async fn clear_properties(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_alive()?;
        state.properties.clear();
        Ok(())
    }
}
