//! Events delivered by an audio-graph backend

use super::handle::Handle;
use super::types::{EndpointId, Param, Properties, StreamState};

/// Everything the mirror reacts to
///
/// Directory events carry global ids. Per-object events carry the observer
/// [`Handle`] that was attached when the mirror asked to watch the object, so a
/// released observer can never be confused with a live one.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A global object appeared in the daemon's directory.
    GlobalAdded {
        id: EndpointId,
        type_: String,
        props: Properties,
    },

    /// A global object disappeared from the daemon's directory.
    GlobalRemoved { id: EndpointId },

    /// Node info (properties) seen by a node observer.
    NodeInfo { observer: Handle, props: Properties },

    /// A parameter emitted by a node, seen by a node observer.
    NodeParam { observer: Handle, param: Param },

    /// A stream changed state, seen by a stream observer.
    StreamState {
        observer: Handle,
        old: StreamState,
        new: StreamState,
    },

    /// A session's daemon connection reported an error.
    SessionError { connection: Handle, message: String },

    /// A bind requested with `observer` attached failed asynchronously.
    BindFailed {
        observer: Handle,
        global_id: u32,
        message: String,
    },
}

impl GraphEvent {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            GraphEvent::GlobalAdded { .. } => "global_added",
            GraphEvent::GlobalRemoved { .. } => "global_removed",
            GraphEvent::NodeInfo { .. } => "node_info",
            GraphEvent::NodeParam { .. } => "node_param",
            GraphEvent::StreamState { .. } => "stream_state",
            GraphEvent::SessionError { .. } => "session_error",
            GraphEvent::BindFailed { .. } => "bind_failed",
        }
    }
}
