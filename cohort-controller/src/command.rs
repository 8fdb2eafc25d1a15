//! Engine operations as values that can be queued and replayed

use cohort_core::{Callable, Code, EngineError, ExecuteResult, Result, ResultIndex};
use cohort_engine::{Bindings, EngineCore, Functions};
use serde_json::Value as JsonValue;

/// One call of an engine operation, with its arguments
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Execute(Code),
    Push(Bindings),
    Pull(Vec<String>),
    PushFunction(Functions),
    PullFunction(Vec<String>),
    GetResult(ResultIndex),
    Reset,
    Kill,
    Keys,
    GetProperties(Option<Vec<String>>),
    SetProperties(Bindings),
    HasProperties(Vec<String>),
    DelProperties(Vec<String>),
    ClearProperties,
}

impl EngineCommand {
    pub fn method(&self) -> &'static str {
        match self {
            EngineCommand::Execute(_) => "execute",
            EngineCommand::Push(_) => "push",
            EngineCommand::Pull(_) => "pull",
            EngineCommand::PushFunction(_) => "push_function",
            EngineCommand::PullFunction(_) => "pull_function",
            EngineCommand::GetResult(_) => "get_result",
            EngineCommand::Reset => "reset",
            EngineCommand::Kill => "kill",
            EngineCommand::Keys => "keys",
            EngineCommand::GetProperties(_) => "get_properties",
            EngineCommand::SetProperties(_) => "set_properties",
            EngineCommand::HasProperties(_) => "has_properties",
            EngineCommand::DelProperties(_) => "del_properties",
            EngineCommand::ClearProperties => "clear_properties",
        }
    }

    /// `method(args)` summary used in queue listings
    pub fn describe(&self) -> String {
        fn names<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
            names
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        }

        let args = match self {
            EngineCommand::Execute(code) => code.describe(),
            EngineCommand::Push(bindings) | EngineCommand::SetProperties(bindings) => {
                names(bindings.keys())
            }
            EngineCommand::PushFunction(functions) => names(functions.keys()),
            EngineCommand::Pull(list)
            | EngineCommand::PullFunction(list)
            | EngineCommand::HasProperties(list)
            | EngineCommand::DelProperties(list) => names(list),
            EngineCommand::GetProperties(Some(list)) => names(list),
            EngineCommand::GetResult(index) => index.to_string(),
            EngineCommand::GetProperties(None)
            | EngineCommand::Reset
            | EngineCommand::Kill
            | EngineCommand::Keys
            | EngineCommand::ClearProperties => String::new(),
        };
        format!("{}({})", self.method(), args)
    }

    /// Run the command against an engine
    pub async fn apply(self, engine: &dyn EngineCore) -> Result<CommandOutput> {
        let output = match self {
            EngineCommand::Execute(code) => CommandOutput::Executed(engine.execute(code).await?),
            EngineCommand::Push(bindings) => {
                engine.push(bindings).await?;
                CommandOutput::Done
            }
            EngineCommand::Pull(names) => CommandOutput::Values(engine.pull(names).await?),
            EngineCommand::PushFunction(functions) => {
                engine.push_function(functions).await?;
                CommandOutput::Done
            }
            EngineCommand::PullFunction(names) => {
                CommandOutput::Functions(engine.pull_function(names).await?)
            }
            EngineCommand::GetResult(index) => {
                CommandOutput::Executed(engine.get_result(index).await?)
            }
            EngineCommand::Reset => {
                engine.reset().await?;
                CommandOutput::Done
            }
            EngineCommand::Kill => {
                engine.kill().await?;
                CommandOutput::Done
            }
            EngineCommand::Keys => CommandOutput::Keys(engine.keys().await?),
            EngineCommand::GetProperties(names) => {
                CommandOutput::Properties(engine.get_properties(names).await?)
            }
            EngineCommand::SetProperties(properties) => {
                engine.set_properties(properties).await?;
                CommandOutput::Done
            }
            EngineCommand::HasProperties(names) => {
                CommandOutput::Flags(engine.has_properties(names).await?)
            }
            EngineCommand::DelProperties(names) => {
                engine.del_properties(names).await?;
                CommandOutput::Done
            }
            EngineCommand::ClearProperties => {
                engine.clear_properties().await?;
                CommandOutput::Done
            }
        };
        Ok(output)
    }
}

/// What a command produced
#[derive(Debug, Clone)]
pub enum CommandOutput {
    Executed(ExecuteResult),
    Values(Vec<JsonValue>),
    Functions(Vec<Callable>),
    Keys(Vec<String>),
    Properties(Bindings),
    Flags(Vec<bool>),
    Done,
}

fn mismatch(expected: &str, got: &CommandOutput) -> EngineError {
    EngineError::type_error(format!("expected {} output, got {}", expected, got.kind()))
}

impl CommandOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandOutput::Executed(_) => "executed",
            CommandOutput::Values(_) => "values",
            CommandOutput::Functions(_) => "functions",
            CommandOutput::Keys(_) => "keys",
            CommandOutput::Properties(_) => "properties",
            CommandOutput::Flags(_) => "flags",
            CommandOutput::Done => "done",
        }
    }

    pub fn into_executed(self) -> Result<ExecuteResult> {
        match self {
            CommandOutput::Executed(result) => Ok(result),
            other => Err(mismatch("executed", &other)),
        }
    }

    pub fn into_values(self) -> Result<Vec<JsonValue>> {
        match self {
            CommandOutput::Values(values) => Ok(values),
            other => Err(mismatch("values", &other)),
        }
    }

    pub fn into_functions(self) -> Result<Vec<Callable>> {
        match self {
            CommandOutput::Functions(functions) => Ok(functions),
            other => Err(mismatch("functions", &other)),
        }
    }

    pub fn into_keys(self) -> Result<Vec<String>> {
        match self {
            CommandOutput::Keys(keys) => Ok(keys),
            other => Err(mismatch("keys", &other)),
        }
    }

    pub fn into_properties(self) -> Result<Bindings> {
        match self {
            CommandOutput::Properties(properties) => Ok(properties),
            other => Err(mismatch("properties", &other)),
        }
    }

    pub fn into_flags(self) -> Result<Vec<bool>> {
        match self {
            CommandOutput::Flags(flags) => Ok(flags),
            other => Err(mismatch("flags", &other)),
        }
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            CommandOutput::Done => Ok(()),
            other => Err(mismatch("done", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_engine::LocalEngine;
    use serde_json::json;

    #[test]
    fn test_describe() {
        let mut bindings = Bindings::new();
        bindings.insert("a".into(), json!(1));
        bindings.insert("b".into(), json!(2));
        assert_eq!(EngineCommand::Push(bindings).describe(), "push(a, b)");
        assert_eq!(EngineCommand::Keys.describe(), "keys()");
        assert_eq!(
            EngineCommand::Execute(Code::from("x = 1")).describe(),
            "execute(x = 1)"
        );
    }

    #[tokio::test]
    async fn test_apply_and_convert() {
        let engine = LocalEngine::new(0);
        let output = EngineCommand::Execute(Code::from("1 + 2"))
            .apply(&engine)
            .await
            .unwrap();
        assert_eq!(output.clone().into_executed().unwrap().value, Some(json!(3)));
        assert!(matches!(
            output.into_keys(),
            Err(EngineError::TypeError { .. })
        ));

        let keys = EngineCommand::Keys.apply(&engine).await.unwrap();
        assert_eq!(keys.into_keys().unwrap(), vec!["id".to_string()]);
    }
}
