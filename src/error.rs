//! Error types for the audio-graph seam
//!
//! Errors are split by how far they reach:
//! - [`GraphError`] is returned by [`AudioGraph`](crate::graph::AudioGraph) calls and is
//!   always contained to the one endpoint whose pipeline issued the call.
//! - Process-level setup (config, backend start) uses `anyhow` in the binary.

use crate::graph::Handle;

/// Failures reported by an audio-graph backend.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// An isolated client session could not be opened or connected.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A remote handle could not be bound to a global object.
    #[error("bind to global {global_id} failed: {reason}")]
    BindFailed {
        /// Global id that was requested.
        global_id: u32,
        /// Backend-provided reason.
        reason: String,
    },

    /// The shadow stream could not be created or connected.
    #[error("stream setup failed: {0}")]
    StreamFailed(String),

    /// A call referenced a handle the backend does not know.
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),

    /// A parameter could not be encoded or decoded.
    #[error("parameter encoding failed: {0}")]
    Pod(String),

    /// The backend loop has stopped and no longer accepts commands.
    #[error("audio graph backend is gone")]
    BackendGone,
}

/// Result alias for audio-graph calls
pub type GraphResult<T> = std::result::Result<T, GraphError>;
