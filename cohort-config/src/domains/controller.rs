//! Engine registry configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, warn_above, Validatable};
use serde::{Deserialize, Serialize};

/// Engine registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Size of the engine id pool; ids run from 0 to max_engines - 1
    #[serde(default = "default_max_engines")]
    pub max_engines: usize,

    /// Never hand out an id again once its engine has unregistered
    #[serde(default = "crate::domains::utils::default_false")]
    pub preserve_ids: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_engines: default_max_engines(),
            preserve_ids: false,
        }
    }
}

impl Validatable for ControllerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_engines, "max_engines", self.domain_name())?;
        warn_above(self.max_engines, 1 << 16, "max_engines", self.domain_name());
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "controller"
    }
}

fn default_max_engines() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_engines, 1024);
        assert!(!config.preserve_ids);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_engines_is_invalid() {
        let config = ControllerConfig {
            max_engines: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
