//! Domain-driven configuration management for Cohort
//!
//! This crate provides configuration split by functional domain (controller,
//! scheduler, ipc, logging), with validation, defaults, and `COHORT_*`
//! environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    controller::ControllerConfig, ipc::IpcConfig, logging::LoggingConfig,
    scheduler::SchedulerConfig, CohortConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
