//! Transport layer error types.
//!
//! None of these are fatal to the process. Every variant ends in the
//! connection state machine moving to `Recovering`.

use std::io;

use thiserror::Error;

use super::frame::FrameError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Connect did not complete within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Host name did not resolve to any address.
    #[error("could not resolve {0}")]
    Resolve(String),
}

impl TransportError {
    /// Check if the error means the peer is gone rather than a transient
    /// hiccup on a live stream.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            TransportError::ConnectionClosed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
