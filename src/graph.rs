//! Audio-graph seam
//!
//! Everything the mirror needs from the audio server goes through the
//! [`AudioGraph`] trait (calls out) and the [`GraphEvent`] enum (events in).
//! Native objects are never exposed; the mirror names every object it asks for
//! with a [`Handle`] it allocated itself, and events come back tagged with the
//! handle of the observer that saw them.

mod events;
mod handle;
pub mod recording;
mod types;

#[cfg(feature = "pipewire")]
pub mod pipewire;

pub use events::GraphEvent;
pub use handle::{Handle, HandleAllocator, ScopedHandle};
pub use types::{
    keys, AudioChannel, AudioFormat, ConnectFlags, EndpointId, Param, ParamBlob, ParamKind,
    Properties, StreamSpec, StreamState,
};

use crate::error::GraphResult;

/// Calls the mirror makes into the audio server
///
/// All methods take `&self` so a backend can be shared as `Arc<dyn AudioGraph>`
/// between the coordinator and the scoped handles it hands out. Every call is
/// fire-and-forget: completion (readiness, parameters, errors) arrives later as
/// a [`GraphEvent`]. An `Err` here means the request was rejected up front.
pub trait AudioGraph: Send + Sync {
    /// Open an isolated client session on the shared loop and connect it.
    ///
    /// `session` names the client context, `connection` the daemon connection
    /// made from it. Asynchronous failures arrive as
    /// [`GraphEvent::SessionError`] tagged with `connection`.
    fn open_session(&self, session: Handle, connection: Handle, app_name: &str) -> GraphResult<()>;

    /// Create an output stream on `connection` and connect it.
    ///
    /// `observer` receives the stream's state transitions from the moment the
    /// stream exists, so no transition can be missed.
    fn create_stream(
        &self,
        connection: Handle,
        stream: Handle,
        observer: Handle,
        spec: &StreamSpec,
    ) -> GraphResult<()>;

    /// Bind a remote node handle to the global `global_id` through the
    /// directory of `connection` ([`Handle::MAIN`] for the daemon session).
    ///
    /// `observer` is attached at bind time and receives info and param events.
    fn bind_node(
        &self,
        connection: Handle,
        node: Handle,
        observer: Handle,
        global_id: u32,
    ) -> GraphResult<()>;

    /// Attach another observer to an already-bound node.
    fn observe(&self, node: Handle, observer: Handle) -> GraphResult<()>;

    /// Subscribe a bound node to change notifications for the given kinds.
    fn subscribe_params(&self, node: Handle, kinds: &[ParamKind]) -> GraphResult<()>;

    /// Ask a bound node to emit its current parameters of `kind`.
    fn enum_params(&self, node: Handle, kind: ParamKind) -> GraphResult<()>;

    /// Push a parameter blob to a bound node.
    fn push_params(&self, node: Handle, blob: &ParamBlob) -> GraphResult<()>;

    /// Node id the server assigned to a connected stream, once known.
    fn stream_node_id(&self, stream: Handle) -> Option<u32>;

    /// Release whatever `handle` names. Unknown handles are ignored.
    fn release(&self, handle: Handle);
}
