//! EntryStore - per-endpoint pipeline state keyed by original endpoint id
//!
//! One [`Entry`] per original endpoint holds everything its pipeline created.
//! Entries own their backend objects through [`ScopedHandle`]s, so removing an
//! entry releases its resources synchronously, whatever stage it reached.
//!
//! The store also keeps the route table from observer handles back to the
//! endpoint that owns them. Removing an entry drops its routes in the same call,
//! which is what makes late events for a torn-down pipeline harmless: they find
//! no route and are discarded before touching any state.

use std::collections::HashMap;
use std::time::Instant;

use crate::graph::{keys, AudioFormat, EndpointId, Handle, Properties, ScopedHandle};

use super::anti_echo::SyncSession;

/// Progress of descriptor collection
///
/// Info and format events arrive independently and possibly more than once.
/// Each half moves the state forward at most once; `Complete` is reached
/// exactly once per entry, regardless of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collect {
    Empty,
    InfoOnly,
    FormatOnly,
    Complete,
}

impl Collect {
    pub fn has_info(self) -> bool {
        matches!(self, Collect::InfoOnly | Collect::Complete)
    }

    pub fn has_format(self) -> bool {
        matches!(self, Collect::FormatOnly | Collect::Complete)
    }

    pub fn with_info(self) -> Self {
        match self {
            Collect::Empty => Collect::InfoOnly,
            Collect::FormatOnly => Collect::Complete,
            other => other,
        }
    }

    pub fn with_format(self) -> Self {
        match self {
            Collect::Empty => Collect::FormatOnly,
            Collect::InfoOnly => Collect::Complete,
            other => other,
        }
    }
}

/// Lifecycle stage of an entry
///
/// Stages only move forward. There is no `Removed` variant: a removed entry no
/// longer exists in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovered,
    Collecting(Collect),
    Provisioning,
    /// The binder ran; parameter sync is active while `Entry::sync` is set
    Bound,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::Collecting(_) => "collecting",
            Stage::Provisioning => "provisioning",
            Stage::Bound => "bound",
        }
    }
}

/// Merged description of an original endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginalDescriptor {
    pub endpoint_id: EndpointId,
    pub process_binary: String,
    pub media_class: String,
    pub media_name: String,
    pub format: AudioFormat,
}

impl OriginalDescriptor {
    pub fn new(endpoint_id: EndpointId) -> Self {
        Self {
            endpoint_id,
            ..Default::default()
        }
    }

    /// Copy the descriptive properties; missing values become empty strings.
    pub fn apply_info(&mut self, props: &Properties) {
        let lookup = |key: &str| props.get(key).cloned().unwrap_or_default();
        self.process_binary = lookup(keys::APP_PROCESS_BINARY);
        self.media_class = lookup(keys::MEDIA_CLASS);
        self.media_name = lookup(keys::MEDIA_NAME);
    }
}

/// Shadow resources while the stream is connecting
///
/// Field order is release order.
#[derive(Debug)]
pub struct Provision {
    pub state_observer: ScopedHandle,
    pub stream: ScopedHandle,
    pub connection: ScopedHandle,
    pub session: ScopedHandle,
}

impl Provision {
    /// Stop watching the stream and keep its resources as the shadow bundle.
    pub fn into_bundle(self, shadow_endpoint_id: u32) -> ShadowResourceBundle {
        let Provision {
            state_observer,
            stream,
            connection,
            session,
        } = self;
        drop(state_observer);
        ShadowResourceBundle {
            shadow_endpoint_id,
            stream,
            connection,
            session,
        }
    }
}

/// Resources backing a ready shadow endpoint
///
/// Field order is release order: stream, connection, then session.
#[derive(Debug)]
pub struct ShadowResourceBundle {
    pub shadow_endpoint_id: u32,
    pub stream: ScopedHandle,
    pub connection: ScopedHandle,
    pub session: ScopedHandle,
}

/// Everything the pipeline for one original endpoint owns
///
/// Fields holding handles are declared newest-first, so dropping an entry
/// releases resources in reverse creation order.
#[derive(Debug)]
pub struct Entry {
    pub stage: Stage,
    pub descriptor: OriginalDescriptor,
    pub discovered_at: Instant,
    pub sync: Option<SyncSession>,
    pub shadow: Option<ShadowResourceBundle>,
    pub provision: Option<Provision>,
    /// Info/format observer on the original, dropped once collection completes
    pub collector: Option<ScopedHandle>,
    /// Remote handle to the original endpoint
    pub original: Option<ScopedHandle>,
}

impl Entry {
    fn new(id: EndpointId) -> Self {
        Self {
            stage: Stage::Discovered,
            descriptor: OriginalDescriptor::new(id),
            discovered_at: Instant::now(),
            sync: None,
            shadow: None,
            provision: None,
            collector: None,
            original: None,
        }
    }

    pub fn shadow_endpoint_id(&self) -> Option<u32> {
        self.shadow.as_ref().map(|bundle| bundle.shadow_endpoint_id)
    }
}

/// What an observer handle is watching on behalf of its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Info and format events of the original
    Collector,
    /// State transitions of the shadow stream
    StreamState,
    /// Error events of the shadow's daemon connection
    Connection,
    /// Props changes of the shadow
    ShadowParams,
    /// Props changes of the original
    OriginalParams,
}

/// Route from an observer handle to its owning entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub endpoint: EndpointId,
    pub role: Role,
}

/// Keyed store of in-flight and bound pipelines
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<EndpointId, Entry>,
    routes: HashMap<Handle, Route>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `id`, created in `Discovered` if absent
    pub fn get_or_create(&mut self, id: EndpointId) -> &mut Entry {
        self.entries.entry(id).or_insert_with(|| Entry::new(id))
    }

    pub fn find(&self, id: EndpointId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn find_mut(&mut self, id: EndpointId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Tear down the entry for `id`, releasing everything it owns.
    ///
    /// Returns false when there was nothing to remove; calling it again for
    /// the same id is a no-op.
    pub fn remove(&mut self, id: EndpointId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        self.routes.retain(|_, route| route.endpoint != id);
        drop(entry);
        true
    }

    /// Tear down every entry; returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let ids = self.ids();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    pub fn bind_route(&mut self, handle: Handle, endpoint: EndpointId, role: Role) {
        self.routes.insert(handle, Route { endpoint, role });
    }

    pub fn unbind_route(&mut self, handle: Handle) {
        self.routes.remove(&handle);
    }

    pub fn route(&self, handle: Handle) -> Option<Route> {
        self.routes.get(&handle).copied()
    }

    /// Ids of all live entries, sorted
    pub fn ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndpointId, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
