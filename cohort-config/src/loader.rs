//! Configuration loading and environment variable handling

use crate::domains::CohortConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "COHORT".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<CohortConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml(&self, content: &str) -> ConfigResult<CohortConfig> {
        let mut config: CohortConfig = if content.trim().is_empty() {
            CohortConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<CohortConfig> {
        let mut config = CohortConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<CohortConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut CohortConfig) -> ConfigResult<()> {
        self.apply_controller_overrides(&mut config.controller)?;
        self.apply_scheduler_overrides(&mut config.scheduler)?;
        self.apply_ipc_overrides(&mut config.ipc)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_controller_overrides(
        &self,
        config: &mut crate::domains::controller::ControllerConfig,
    ) -> ConfigResult<()> {
        if let Some(max_engines) = self.parse_env_var("MAX_ENGINES")? {
            config.max_engines = max_engines;
        }

        if let Some(preserve) = self.parse_env_var("PRESERVE_IDS")? {
            config.preserve_ids = preserve;
        }

        Ok(())
    }

    fn apply_scheduler_overrides(
        &self,
        config: &mut crate::domains::scheduler::SchedulerConfig,
    ) -> ConfigResult<()> {
        if let Some(retries) = self.parse_env_var("DEFAULT_RETRIES")? {
            config.default_retries = retries;
        }

        if let Some(clear) = self.parse_env_var("CLEAR_BETWEEN_TASKS")? {
            config.clear_between_tasks = clear;
        }

        Ok(())
    }

    fn apply_ipc_overrides(&self, config: &mut crate::domains::ipc::IpcConfig) -> ConfigResult<()> {
        if let Some(max_frame) = self.parse_env_var("MAX_FRAME_BYTES")? {
            config.max_frame_bytes = max_frame;
        }

        if let Some(millis) = self.parse_env_var::<u64>("HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = std::time::Duration::from_millis(millis);
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Some(level) = self.parse_env_var("LOG_LEVEL")? {
            config.level = level;
        }

        if let Some(format) = self.parse_env_var("LOG_FORMAT")? {
            config.format = format;
        }

        Ok(())
    }

    /// Parse an environment variable if it is set
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| {
                    ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))
                }),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
