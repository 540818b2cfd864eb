//! Error types for buildwire.

use thiserror::Error;

/// Main error type for all buildwire operations.
///
/// Transport and decode failures on the message channel are *not* reported
/// through this type to sending callers; the channel is best-effort and those
/// conditions surface as [`SendOutcome`](crate::connection::SendOutcome)
/// variants instead. `BuildwireError` is reserved for server setup and for
/// the caller-bug class of failures that must be loud.
#[derive(Debug, Error)]
pub enum BuildwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message decoding failed (truncated frame, malformed length, bad UTF-8).
    #[error("decode error: {0}")]
    Decode(#[from] crate::protocol::DecodeError),

    /// Session id was requested on a message that was never sent or received.
    #[error("session id is not available on a locally created message")]
    LocalMessage,

    /// Configuration was requested for a session that never negotiated one.
    #[error("no configuration active for session {0}")]
    NoConfiguration(String),

    /// A legacy numeric severity value outside the known range.
    #[error("unknown severity value: {0}")]
    UnknownSeverity(i32),
}

/// Result type alias using BuildwireError.
pub type Result<T> = std::result::Result<T, BuildwireError>;
