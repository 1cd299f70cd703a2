//! Error types for txwire.

use thiserror::Error;

/// Main error type for all txwire operations.
#[derive(Debug, Error)]
pub enum TxWireError {
    /// The underlying transact primitive reported a failure.
    #[error("transact failed on code {code}: {reason}")]
    Transact { code: u32, reason: String },

    /// Malformed wire data (out-of-range length field, truncated parcel,
    /// invalid UTF-8 in a string field).
    #[error("decode error: {0}")]
    Decode(String),

    /// Protocol invariant violation (sequence-number mismatch, setup
    /// recurrence, peer acknowledging bytes that were never sent).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stream traffic attempted before the handshake completed.
    #[error("channel not established")]
    NotEstablished,

    /// The channel was torn down or marked broken.
    #[error("channel closed")]
    ChannelClosed,

    /// The stream was cancelled locally; no further sends are accepted.
    #[error("stream {0} cancelled")]
    StreamCancelled(u32),

    /// The peer did not complete the handshake within the allowed time.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Result type alias using TxWireError.
pub type Result<T> = std::result::Result<T, TxWireError>;
