//! Native PipeWire backend
//!
//! PipeWire objects are neither `Send` nor `Sync`, so they all live on one
//! dedicated thread running the PipeWire main loop. The rest of the process
//! talks to that thread through channels:
//!
//! ```text
//!   Mirror ──AudioGraph calls──► PipewireGraph ──pw::channel──► loop thread
//!   Mirror ◄──────────────── tokio mpsc (GraphEvent) ◄───────── loop thread
//! ```
//!
//! Every [`AudioGraph`] call becomes a [`Command`]; its outcome comes back as a
//! [`GraphEvent`]. The only synchronous read is [`AudioGraph::stream_node_id`],
//! served from a map the loop thread fills in before it reports readiness.

mod pod;
mod thread;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use pipewire as pw;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AudioGraph, GraphEvent, Handle, ParamBlob, ParamKind, StreamSpec};
use crate::error::{GraphError, GraphResult};

/// Requests executed on the loop thread
#[derive(Debug)]
pub(crate) enum Command {
    OpenSession {
        session: Handle,
        connection: Handle,
        app_name: String,
    },
    CreateStream {
        connection: Handle,
        stream: Handle,
        observer: Handle,
        spec: StreamSpec,
    },
    BindNode {
        connection: Handle,
        node: Handle,
        observer: Handle,
        global_id: u32,
    },
    Observe {
        node: Handle,
        observer: Handle,
    },
    SubscribeParams {
        node: Handle,
        kinds: Vec<ParamKind>,
    },
    EnumParams {
        node: Handle,
        kind: ParamKind,
    },
    PushParams {
        node: Handle,
        blob: ParamBlob,
    },
    Release(Handle),
    Quit,
}

/// [`AudioGraph`] implementation forwarding to the loop thread
pub struct PipewireGraph {
    cmd_tx: Mutex<pw::channel::Sender<Command>>,
    /// Node ids of ready streams, keyed by stream handle
    node_ids: Arc<DashMap<Handle, u32>>,
}

impl PipewireGraph {
    fn send(&self, cmd: Command) -> GraphResult<()> {
        self.cmd_tx
            .lock()
            .send(cmd)
            .map_err(|_| GraphError::BackendGone)
    }
}

impl AudioGraph for PipewireGraph {
    fn open_session(&self, session: Handle, connection: Handle, app_name: &str) -> GraphResult<()> {
        self.send(Command::OpenSession {
            session,
            connection,
            app_name: app_name.to_string(),
        })
    }

    fn create_stream(
        &self,
        connection: Handle,
        stream: Handle,
        observer: Handle,
        spec: &StreamSpec,
    ) -> GraphResult<()> {
        self.send(Command::CreateStream {
            connection,
            stream,
            observer,
            spec: spec.clone(),
        })
    }

    fn bind_node(
        &self,
        connection: Handle,
        node: Handle,
        observer: Handle,
        global_id: u32,
    ) -> GraphResult<()> {
        self.send(Command::BindNode {
            connection,
            node,
            observer,
            global_id,
        })
    }

    fn observe(&self, node: Handle, observer: Handle) -> GraphResult<()> {
        self.send(Command::Observe { node, observer })
    }

    fn subscribe_params(&self, node: Handle, kinds: &[ParamKind]) -> GraphResult<()> {
        self.send(Command::SubscribeParams {
            node,
            kinds: kinds.to_vec(),
        })
    }

    fn enum_params(&self, node: Handle, kind: ParamKind) -> GraphResult<()> {
        self.send(Command::EnumParams { node, kind })
    }

    fn push_params(&self, node: Handle, blob: &ParamBlob) -> GraphResult<()> {
        self.send(Command::PushParams {
            node,
            blob: blob.clone(),
        })
    }

    fn stream_node_id(&self, stream: Handle) -> Option<u32> {
        self.node_ids.get(&stream).map(|id| *id)
    }

    fn release(&self, handle: Handle) {
        if self.send(Command::Release(handle)).is_err() {
            debug!(%handle, "Backend gone, release dropped");
        }
    }
}

/// Running PipeWire loop thread plus the graph that talks to it
pub struct PipewireBackend {
    graph: Arc<PipewireGraph>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PipewireBackend {
    /// Start the loop thread and connect to the daemon.
    ///
    /// Returns once the daemon connection and the object directory are set
    /// up; directory events then start flowing into `events`.
    pub fn start(events: mpsc::UnboundedSender<GraphEvent>) -> GraphResult<Self> {
        let (cmd_tx, cmd_rx) = pw::channel::channel();
        let node_ids = Arc::new(DashMap::new());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("pipewire".to_string())
            .spawn({
                let node_ids = node_ids.clone();
                move || thread::run(events, node_ids, cmd_rx, ready_tx)
            })
            .map_err(|e| GraphError::ConnectionFailed(format!("failed to spawn loop thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(GraphError::BackendGone);
            }
        }

        info!("PipeWire backend started");

        Ok(Self {
            graph: Arc::new(PipewireGraph {
                cmd_tx: Mutex::new(cmd_tx),
                node_ids,
            }),
            thread: Some(thread),
        })
    }

    /// Shared graph for the mirror and its scoped handles
    pub fn graph(&self) -> Arc<dyn AudioGraph> {
        self.graph.clone()
    }

    /// Stop the loop after it has executed every queued command.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.graph.send(Command::Quit).is_err() {
            debug!("PipeWire loop already stopped");
        }
        if thread.join().is_err() {
            warn!("PipeWire loop thread panicked");
        }
        info!("PipeWire backend stopped");
    }
}

impl Drop for PipewireBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
