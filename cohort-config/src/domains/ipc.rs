//! Engine transport configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    /// Reject messages whose protocol version differs from ours
    #[serde(default = "crate::domains::utils::default_true")]
    pub protocol_version_check: bool,

    /// Largest single message accepted from a peer
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// How long to wait for a remote engine to announce itself
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_handshake_timeout"
    )]
    pub handshake_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            protocol_version_check: true,
            max_frame_bytes: default_max_frame_bytes(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

impl Validatable for IpcConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_frame_bytes, "max_frame_bytes", self.domain_name())?;
        if self.handshake_timeout.is_zero() {
            return Err(self.validation_error("handshake_timeout must be greater than 0"));
        }
        if !self.protocol_version_check {
            log::warn!(
                "ipc.protocol_version_check is disabled; mismatched peers will not be rejected"
            );
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "ipc"
    }
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipc_config_defaults() {
        let config = IpcConfig::default();
        assert!(config.protocol_version_check);
        assert_eq!(config.max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ipc_config_validation() {
        let mut config = IpcConfig {
            max_frame_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_frame_bytes = 1024;
        config.handshake_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
