//! Error types for the throttle engine.

use thiserror::Error;

use crate::transport::{BufferError, FrameError, TransportError};

/// Errors raised while validating a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Server host is empty.
    #[error("server host must not be empty")]
    EmptyHost,

    /// Server port is zero.
    #[error("server port must not be zero")]
    InvalidPort,

    /// Receive buffer cannot hold a single roster entry.
    #[error("receive buffer of {actual} bytes is below the minimum of {minimum}")]
    BufferTooSmall {
        /// Minimum accepted capacity.
        minimum: usize,
        /// Configured capacity.
        actual: usize,
    },

    /// Backoff schedule has no entries.
    #[error("backoff schedule must contain at least one delay")]
    EmptyBackoff,

    /// Calibration range is empty or inverted.
    #[error("calibration range {min}..{max} is empty")]
    InvalidCalibration {
        /// Raw reading mapped to 0.
        min: u16,
        /// Raw reading mapped to 100.
        max: u16,
    },

    /// Roster limit is zero.
    #[error("roster limit must be at least one")]
    InvalidRosterLimit,

    /// Outbound FIFO depth is zero.
    #[error("outbound queue capacity must be at least one")]
    InvalidQueueCapacity,

    /// A task interval is zero.
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Top-level throttle errors.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Receive buffer error.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::BufferTooSmall {
            minimum: 4096,
            actual: 1024,
        };
        assert_eq!(
            err.to_string(),
            "receive buffer of 1024 bytes is below the minimum of 4096"
        );
        assert_eq!(
            ConfigError::InvalidCalibration { min: 10, max: 10 }.to_string(),
            "calibration range 10..10 is empty"
        );
    }

    #[test]
    fn test_throttle_error_from_layers() {
        let err: ThrottleError = ConfigError::EmptyHost.into();
        assert!(matches!(err, ThrottleError::Config(ConfigError::EmptyHost)));

        let err: ThrottleError = TransportError::ConnectionClosed.into();
        assert!(err.to_string().starts_with("transport error"));
    }
}
