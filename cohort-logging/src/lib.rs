//! Logging setup for Cohort
//!
//! Every Cohort crate logs through `tracing` macros with structured fields
//! (`engine_id`, `task_id`, `pending_id`). This crate installs the global
//! subscriber that renders them; `log` records from dependencies are
//! forwarded through the subscriber's log bridge.

pub mod init;

pub use cohort_config::domains::logging::{LogFormat, LogLevel};
pub use cohort_config::LoggingConfig;
pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
