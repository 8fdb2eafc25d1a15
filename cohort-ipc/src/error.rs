//! Transport and protocol failures

use cohort_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// A frame arrived but did not decode as the expected message
    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end, or this end was closed locally
    #[error("peer disconnected")]
    Disconnected,

    #[error("peer speaks protocol version {theirs}, this side speaks {ours}")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("frame of at least {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("peer did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

impl IpcError {
    /// Whether the connection is still usable after this error.
    ///
    /// Only a frame that failed to decode leaves the stream in sync.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IpcError::Decode(_))
    }
}

impl From<IpcError> for EngineError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Encode(message) | IpcError::Decode(message) => {
                EngineError::Serialization { message }
            }
            other => EngineError::ConnectionLost {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_only_decode_failures_are_recoverable() {
        assert!(IpcError::Decode("trailing comma".into()).is_recoverable());
        assert!(!IpcError::Disconnected.is_recoverable());
        assert!(!IpcError::FrameTooLarge { size: 10, max: 5 }.is_recoverable());
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(!IpcError::from(broken).is_recoverable());
    }

    #[test]
    fn test_conversion_to_engine_error() {
        assert_eq!(
            EngineError::from(IpcError::VersionMismatch { ours: 1, theirs: 2 }),
            EngineError::ConnectionLost {
                reason: "peer speaks protocol version 2, this side speaks 1".into()
            }
        );
        assert!(matches!(
            EngineError::from(IpcError::Decode("bad".into())),
            EngineError::Serialization { .. }
        ));
    }
}
