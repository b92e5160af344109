//! In-memory audio graph that records every call
//!
//! Used by the coordinator tests and handy for exercising the mirror without a
//! running audio server. It tracks which handles are live so tests can assert
//! that teardown released everything exactly once.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;

use super::{AudioGraph, Handle, ParamBlob, ParamKind, StreamSpec};
use crate::error::{GraphError, GraphResult};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
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
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    live: BTreeSet<Handle>,
    double_released: Vec<Handle>,
    node_ids: HashMap<Handle, u32>,
    next_node_id: u32,
    fail_sessions: bool,
    fail_binds: HashSet<u32>,
}

/// Records calls instead of talking to a server
pub struct RecordingGraph {
    inner: Mutex<Inner>,
}

impl RecordingGraph {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_node_id: 100,
                ..Default::default()
            }),
        }
    }

    /// Make every following `open_session` fail
    pub fn fail_sessions(&self, fail: bool) {
        self.inner.lock().fail_sessions = fail;
    }

    /// Make binds to `global_id` fail
    pub fn fail_bind(&self, global_id: u32) {
        self.inner.lock().fail_binds.insert(global_id);
    }

    /// Node id the next created stream will report
    pub fn set_next_node_id(&self, id: u32) {
        self.inner.lock().next_node_id = id;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Handles created and not yet released
    pub fn live_handles(&self) -> BTreeSet<Handle> {
        self.inner.lock().live.clone()
    }

    /// Handles released more than once (should always be empty)
    pub fn double_released(&self) -> Vec<Handle> {
        self.inner.lock().double_released.clone()
    }

    /// All pushes, in order
    pub fn pushes(&self) -> Vec<(Handle, ParamBlob)> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::PushParams { node, blob } => Some((*node, blob.clone())),
                _ => None,
            })
            .collect()
    }

    /// Release calls, in order
    pub fn releases(&self) -> Vec<Handle> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Release(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    /// Parameters of the most recently created stream
    pub fn last_stream(&self) -> Option<(Handle, Handle, StreamSpec)> {
        self.inner.lock().calls.iter().rev().find_map(|call| match call {
            Call::CreateStream {
                stream,
                observer,
                spec,
                ..
            } => Some((*stream, *observer, spec.clone())),
            _ => None,
        })
    }

    /// Observer attached by the most recent bind to `global_id`
    pub fn bind_observer(&self, global_id: u32) -> Option<(Handle, Handle)> {
        self.inner.lock().calls.iter().rev().find_map(|call| match call {
            Call::BindNode {
                node,
                observer,
                global_id: id,
                ..
            } if *id == global_id => Some((*node, *observer)),
            _ => None,
        })
    }

    /// Observers attached through `observe` to `node`
    pub fn observers_of(&self, node: Handle) -> Vec<Handle> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Observe { node: n, observer } if *n == node => Some(*observer),
                _ => None,
            })
            .collect()
    }
}

impl Default for RecordingGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioGraph for RecordingGraph {
    fn open_session(&self, session: Handle, connection: Handle, app_name: &str) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::OpenSession {
            session,
            connection,
            app_name: app_name.to_string(),
        });
        if inner.fail_sessions {
            return Err(GraphError::ConnectionFailed("refused by test".to_string()));
        }
        inner.live.insert(session);
        inner.live.insert(connection);
        Ok(())
    }

    fn create_stream(
        &self,
        connection: Handle,
        stream: Handle,
        observer: Handle,
        spec: &StreamSpec,
    ) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::CreateStream {
            connection,
            stream,
            observer,
            spec: spec.clone(),
        });
        if !inner.live.contains(&connection) {
            return Err(GraphError::UnknownHandle(connection));
        }
        let node_id = inner.next_node_id;
        inner.next_node_id += 1;
        inner.node_ids.insert(stream, node_id);
        inner.live.insert(stream);
        inner.live.insert(observer);
        Ok(())
    }

    fn bind_node(
        &self,
        connection: Handle,
        node: Handle,
        observer: Handle,
        global_id: u32,
    ) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::BindNode {
            connection,
            node,
            observer,
            global_id,
        });
        if inner.fail_binds.contains(&global_id) {
            return Err(GraphError::BindFailed {
                global_id,
                reason: "refused by test".to_string(),
            });
        }
        inner.live.insert(node);
        inner.live.insert(observer);
        Ok(())
    }

    fn observe(&self, node: Handle, observer: Handle) -> GraphResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Observe { node, observer });
        if !inner.live.contains(&node) {
            return Err(GraphError::UnknownHandle(node));
        }
        inner.live.insert(observer);
        Ok(())
    }

    fn subscribe_params(&self, node: Handle, kinds: &[ParamKind]) -> GraphResult<()> {
        self.inner.lock().calls.push(Call::SubscribeParams {
            node,
            kinds: kinds.to_vec(),
        });
        Ok(())
    }

    fn enum_params(&self, node: Handle, kind: ParamKind) -> GraphResult<()> {
        self.inner.lock().calls.push(Call::EnumParams { node, kind });
        Ok(())
    }

    fn push_params(&self, node: Handle, blob: &ParamBlob) -> GraphResult<()> {
        self.inner.lock().calls.push(Call::PushParams {
            node,
            blob: blob.clone(),
        });
        Ok(())
    }

    fn stream_node_id(&self, stream: Handle) -> Option<u32> {
        self.inner.lock().node_ids.get(&stream).copied()
    }

    fn release(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Release(handle));
        if !inner.live.remove(&handle) {
            inner.double_released.push(handle);
        }
        inner.node_ids.remove(&handle);
    }
}
