//! Task scheduling with retries, recovery and engines joining late

use anyhow::Result;
use cohort_config::SchedulerConfig;
use cohort_controller::{
    Controller, MultiEngine, Registration, Task, TaskScheduler, TaskState,
};
use cohort_core::EngineError;
use cohort_engine::{Bindings, LocalEngine};
use serde_json::json;
use std::sync::Arc;

async fn register(controller: &Controller, n: usize) -> Result<()> {
    for _ in 0..n {
        controller
            .register_engine(Arc::new(LocalEngine::new(0)), Registration::default())
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_retries_until_the_task_succeeds() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 1).await?;

    let mut seed = Bindings::new();
    seed.insert("counter".into(), json!(5));
    MultiEngine::new(Arc::clone(&controller))
        .push(0usize, seed)
        .await?;

    let scheduler = TaskScheduler::new(Arc::clone(&controller), SchedulerConfig::default());
    let task = Task::new("counter += 1;\nassert(counter === 16)")
        .pull(["counter"])
        .retries(10);
    let result = scheduler.run_and_wait(task).await?;

    assert!(result.is_success());
    assert_eq!(result.get("counter")?, json!(16));
    assert_eq!(result.attempts, 11);
    assert_eq!(scheduler.task_state(result.task_id), Some(TaskState::Succeeded));
    Ok(())
}

#[tokio::test]
async fn test_recovery_task_replaces_a_failing_task() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 2).await?;
    let scheduler = TaskScheduler::new(Arc::clone(&controller), SchedulerConfig::default());

    let recovery = Task::new("fixed = \"recovered\"").pull(["fixed"]);
    let task = Task::new("assert(false, \"always broken\")")
        .retries(2)
        .recovery_task(recovery);
    let id = scheduler.run(task);
    let result = scheduler.get_task_result(id, true).await?;

    assert!(result.recovered);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.get("fixed")?, json!("recovered"));
    assert_eq!(scheduler.task_state(id), Some(TaskState::Recovered));
    Ok(())
}

#[tokio::test]
async fn test_failed_recovery_reports_the_recovery_error() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 1).await?;
    let scheduler = TaskScheduler::new(Arc::clone(&controller), SchedulerConfig::default());

    let task = Task::new("assert(false)").recovery_task(Task::new("missing_name"));
    let result = scheduler.run_and_wait(task).await?;
    assert!(!result.is_success());
    assert_eq!(result.failure.as_ref().map(EngineError::ename), Some("ReferenceError"));
    assert_eq!(scheduler.task_state(result.task_id), Some(TaskState::Failed));
    Ok(())
}

#[tokio::test]
async fn test_tasks_spread_over_idle_engines() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 3).await?;
    let scheduler = TaskScheduler::new(Arc::clone(&controller), SchedulerConfig::default());

    let ids: Vec<_> = (0..9)
        .map(|i| {
            let task = Task::new("square = n * n").push("n", json!(i)).pull(["square"]);
            scheduler.run(task)
        })
        .collect();

    let mut engines = Vec::new();
    for (i, id) in ids.into_iter().enumerate() {
        let result = scheduler.get_task_result(id, true).await?;
        assert_eq!(result.get("square")?, json!(i * i));
        engines.extend(result.engine_id);
    }
    engines.sort_unstable();
    engines.dedup();
    assert!(engines.len() > 1, "tasks all ran on {engines:?}");
    assert_eq!(scheduler.idle_engines().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unregistered_engine_gets_no_more_tasks() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 2).await?;
    let scheduler = TaskScheduler::new(Arc::clone(&controller), SchedulerConfig::default());

    controller.unregister_engine(0);
    assert_eq!(scheduler.idle_engines(), vec![1]);

    let result = scheduler.run_and_wait(Task::new("a = 1")).await?;
    assert_eq!(result.engine_id, Some(1));

    // The freed id is handed out again and the scheduler picks it up
    let id = controller
        .register_engine(Arc::new(LocalEngine::new(0)), Registration::default())
        .await?;
    assert_eq!(id, 0);
    assert_eq!(scheduler.idle_engines(), vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn test_clear_between_tasks() -> Result<()> {
    let controller = Arc::new(Controller::default());
    register(&controller, 1).await?;
    let config = SchedulerConfig {
        clear_between_tasks: true,
        ..SchedulerConfig::default()
    };
    let scheduler = TaskScheduler::new(Arc::clone(&controller), config);

    scheduler.run_and_wait(Task::new("leftover = 1")).await?;
    let result = scheduler
        .run_and_wait(Task::new("seen = leftover"))
        .await?;
    assert_eq!(result.failure.as_ref().map(EngineError::ename), Some("ReferenceError"));
    Ok(())
}
