//! Configuration errors

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("config file is not valid YAML for cohort: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `COHORT_*` override is set but does not parse
    #[error("bad environment override: {0}")]
    EnvError(String),

    /// A value parsed but is out of range for its domain
    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },
}
