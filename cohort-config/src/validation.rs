//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate an upper bound, warning rather than failing when it is exceeded
pub fn warn_above<T>(value: T, limit: T, field_name: &str, domain: &str)
where
    T: PartialOrd + std::fmt::Display,
{
    if value > limit {
        log::warn!(
            "{}.{} is {}, above the recommended maximum of {}",
            domain,
            field_name,
            value,
            limit
        );
    }
}

/// Validate a complete configuration object
pub fn validate_config(config: &crate::domains::CohortConfig) -> ConfigResult<()> {
    config.controller.validate()?;
    config.scheduler.validate()?;
    config.ipc.validate()?;
    config.logging.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "max_engines", "controller").is_ok());
        let err = validate_positive(0usize, "max_engines", "controller").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Domain configuration error in controller: max_engines must be greater than 0, got 0"
        );
    }
}
