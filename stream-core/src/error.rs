//! Error types for stream-core.

use crate::frame::StreamId;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by configuration parsing and channel control.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing configuration. Fatal to the stage being configured.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The stream id already maps to an active slot.
    #[error("channel {0} is already running")]
    AlreadyRunning(StreamId),

    #[error("channel {0} not found")]
    ChannelNotFound(StreamId),

    /// The control operation does not apply to the channel's current state.
    #[error("channel {stream_id} is {state}, cannot {operation}")]
    InvalidState {
        stream_id: StreamId,
        state: String,
        operation: &'static str,
    },

    /// The decoder could not be opened. The slot has already been released.
    #[error("channel {stream_id} init failed: {reason}")]
    InitFailed { stream_id: StreamId, reason: String },

    /// The control operation exceeded its bound. Cleanup may still be in flight.
    #[error("channel {0} timed out waiting for init")]
    Timeout(StreamId),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    /// Non-fatal errors a caller can correct by issuing a different request.
    pub fn is_control_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning(_) | Self::ChannelNotFound(_) | Self::InvalidState { .. }
        )
    }
}
