//! Per-engine command queue behaviour seen through the controller

use anyhow::Result;
use cohort_controller::{Controller, EngineCommand, Registration};
use cohort_core::{Code, EngineError};
use cohort_engine::LocalEngine;
use serde_json::json;
use std::sync::Arc;

async fn controller_with_engine() -> Result<(Controller, usize)> {
    let _ = cohort_logging::init_simple_tracing("warn");
    let controller = Controller::default();
    let id = controller
        .register_engine(Arc::new(LocalEngine::new(0)), Registration::default())
        .await?;
    Ok((controller, id))
}

#[tokio::test]
async fn test_commands_run_in_submission_order() -> Result<()> {
    let (controller, id) = controller_with_engine().await?;
    let engine = controller.engine(id).expect("engine registered");

    let cells: Vec<_> = ["n = 1", "n = n * 10 + 2", "n = n * 10 + 3"]
        .into_iter()
        .map(|source| engine.submit(EngineCommand::Execute(Code::from(source))))
        .collect();
    let status = engine.queue_status();
    assert_eq!(status.pending.as_deref(), Some("execute(n = 1)"));
    assert_eq!(status.queue.len(), 2);

    for cell in cells {
        cell.wait().await?;
    }
    let values = engine
        .submit(EngineCommand::Pull(vec!["n".into()]))
        .wait()
        .await?
        .into_values()?;
    assert_eq!(values, vec![json!(123)]);
    assert!(engine.is_idle());
    Ok(())
}

#[tokio::test]
async fn test_failure_clears_everything_behind_it() -> Result<()> {
    let (controller, id) = controller_with_engine().await?;
    let engine = controller.engine(id).expect("engine registered");

    let failing = engine.submit(EngineCommand::Execute(Code::from("null.size")));
    let dropped: Vec<_> = ["a = 1", "b = 2"]
        .into_iter()
        .map(|source| engine.submit(EngineCommand::Execute(Code::from(source))))
        .collect();

    assert_eq!(failing.wait().await.unwrap_err().ename(), "TypeError");
    for cell in dropped {
        match cell.wait().await {
            Err(EngineError::QueueCleared { engine_id, reason }) => {
                assert_eq!(engine_id, Some(id));
                assert!(reason.contains("null.size"), "reason was {reason}");
            }
            other => panic!("expected QueueCleared, got {other:?}"),
        }
    }

    // The queue accepts work again and nothing dropped ever ran
    let keys = engine
        .submit(EngineCommand::Keys)
        .wait()
        .await?
        .into_keys()?;
    assert!(!keys.contains(&"a".to_string()));
    assert!(!keys.contains(&"b".to_string()));
    Ok(())
}
