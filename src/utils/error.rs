//! Error types for the broker, its listeners and the client.
//!
//! An empty queue and a destination that was never routed to are not
//! errors. The queue and the outbound table report both as `None`.

use tokio_util::codec::{AnyDelimiterCodecError, LinesCodecError};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Raw bytes (or their hex framing) could not be decoded into a message.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Encoded message is larger than the configured bound.
    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The broker answered `FAIL`, or the client ran out of retries.
    #[error("broker rejected message after {attempts} attempt(s)")]
    SendRejected { attempts: u32 },

    #[error("unexpected response from broker: {got:?}")]
    UnexpectedResponse { got: String },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("frame codec error: {0}")]
    Frame(#[from] AnyDelimiterCodecError),
}

impl BrokerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
