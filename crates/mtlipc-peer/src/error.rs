use std::time::Duration;

use mtlipc_frame::Command;

use crate::response::Response;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error (spawn or write failure).
    #[error("transport error: {0}")]
    Transport(#[from] mtlipc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] mtlipc_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No response arrived before the deadline.
    #[error("{command} request timed out after {after:?}")]
    Timeout { command: Command, after: Duration },

    /// The connection was torn down while the request was pending.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The connection is not running.
    #[error("not connected to the remote controller")]
    NotConnected,

    /// The remote refused to launch or start running.
    #[error("remote rejected {}: {}", .0.command, .0.describe())]
    LaunchRejected(Box<Response>),
}

impl PeerError {
    /// Returns true if the error means the remote end is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            PeerError::Disconnected(_) | PeerError::NotConnected => true,
            PeerError::Transport(err) => err.is_disconnect(),
            PeerError::Frame(mtlipc_frame::FrameError::ConnectionClosed) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
