//! Domain-specific configuration modules

pub mod controller;
pub mod ipc;
pub mod logging;
pub mod scheduler;
pub mod utils;

use crate::error::ConfigResult;
use serde::{Deserialize, Serialize};

/// Main Cohort configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CohortConfig {
    /// Engine registry configuration
    #[serde(default)]
    pub controller: controller::ControllerConfig,

    /// Task scheduling configuration
    #[serde(default)]
    pub scheduler: scheduler::SchedulerConfig,

    /// Engine transport configuration
    #[serde(default)]
    pub ipc: ipc::IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl CohortConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        crate::validation::validate_config(self)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = CohortConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
