//! Task scheduling configuration

use crate::error::ConfigResult;
use crate::validation::{warn_above, Validatable};
use serde::{Deserialize, Serialize};

/// Task scheduling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Retry budget given to tasks built through the scheduler
    #[serde(default)]
    pub default_retries: u32,

    /// Clear the engine namespace before every task
    #[serde(default = "crate::domains::utils::default_false")]
    pub clear_between_tasks: bool,
}

impl Validatable for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        warn_above(self.default_retries, 1000, "default_retries", self.domain_name());
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "scheduler"
    }
}
