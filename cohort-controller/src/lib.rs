//! Cohort controller
//!
//! Coordinates a pool of compute engines: every engine gets a command queue,
//! the [`Controller`] tracks which engines are connected, [`MultiEngine`]
//! fans operations out across them and [`TaskScheduler`] load-balances
//! self-contained tasks with retry and recovery.

pub mod command;
pub mod controller;
pub mod multi;
pub mod pending;
pub mod queued;
pub mod scheduler;
pub mod task;

pub use command::{CommandOutput, EngineCommand};
pub use controller::{Controller, EngineRecord, Observer, Registration};
pub use multi::{partition, MultiEngine, Targets, MAP_INPUT, MAP_OUTPUT};
pub use pending::PendingResults;
pub use queued::{QueueStatus, QueuedEngine};
pub use scheduler::TaskScheduler;
pub use task::{Task, TaskId, TaskResult, TaskState};
