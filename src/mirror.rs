//! Mirror - per-endpoint lifecycle controller
//!
//! The mirror owns the [`EntryStore`] and drives every original endpoint
//! through its pipeline:
//!
//! ```text
//! discovered ──► collecting ──► provisioning ──► bound
//!      │              │               │            │
//!      └──────────────┴───────┬───────┴────────────┘
//!                             ▼
//!                          removed
//! ```
//!
//! Each stage lives in its own module as an `impl Mirror` block
//! (`collector`, `provisioner`, `binder`, `anti_echo`). Stage completion is
//! signalled by events from the audio graph; [`Mirror::handle_event`] routes
//! each one through the store to the entry and stage it belongs to.
//!
//! All processing happens on one task, so no state is locked. Removal is
//! synchronous: resources are released and routes dropped before
//! [`Mirror::on_endpoint_removed`] returns.

mod actor;
mod actor_handle;
mod anti_echo;
mod binder;
mod collector;
mod commands;
mod filter;
mod provisioner;
mod store;

#[cfg(test)]
mod tests;

pub use actor::MirrorActor;
pub use actor_handle::MirrorHandle;
pub use anti_echo::{Side, SyncAction, SyncSession};
pub use commands::MirrorCommand;
pub use filter::{AppNameFilter, CandidateFilter, SHADOW_NODE_PREFIX};
pub use store::{
    Collect, Entry, EntryStore, OriginalDescriptor, Provision, Role, Route, ShadowResourceBundle,
    Stage,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::graph::{
    AudioFormat, AudioGraph, ConnectFlags, EndpointId, GraphEvent, Handle, HandleAllocator, Param,
    Properties, ScopedHandle, StreamState,
};

/// Side whose current parameters seed the first sync after binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    /// Enumerate the shadow's fresh parameters and push them to the original
    #[default]
    Shadow,
    /// Enumerate the original's live parameters and push them to the shadow
    Original,
}

/// Tunables applied to pipelines started after they are set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirrorOptions {
    pub initial_source: SyncSource,
    pub flags: ConnectFlags,
    /// Appended to the original's media name to form the shadow stream name
    pub name_suffix: Option<String>,
}

impl MirrorOptions {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            initial_source: config.sync.initial_source,
            flags: ConnectFlags {
                autoconnect: config.shadow.autoconnect,
                map_buffers: config.shadow.map_buffers,
            },
            name_suffix: config.shadow.name_suffix.clone(),
        }
    }
}

/// Read-only view of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySummary {
    pub endpoint: EndpointId,
    pub stage: Stage,
    pub process_binary: String,
    pub media_name: String,
    pub format: AudioFormat,
    pub shadow: Option<u32>,
    pub synced: bool,
}

/// An entry that has not reached `Bound` in time
#[derive(Debug, Clone, PartialEq)]
pub struct StallReport {
    pub endpoint: EndpointId,
    pub stage: Stage,
    pub age: Duration,
}

/// Lifecycle controller for all mirrored endpoints
pub struct Mirror {
    graph: Arc<dyn AudioGraph>,
    store: EntryStore,
    handles: HandleAllocator,
    filter: Box<dyn CandidateFilter>,
    options: MirrorOptions,
}

impl Mirror {
    pub fn new(
        graph: Arc<dyn AudioGraph>,
        filter: Box<dyn CandidateFilter>,
        options: MirrorOptions,
    ) -> Self {
        Self {
            graph,
            store: EntryStore::new(),
            handles: HandleAllocator::new(),
            filter,
            options,
        }
    }

    /// Swap the candidate predicate and options.
    ///
    /// Only future discoveries and stages see the change; live entries keep
    /// running.
    pub fn reconfigure(&mut self, filter: Box<dyn CandidateFilter>, options: MirrorOptions) {
        self.filter = filter;
        self.options = options;
        debug!(options = ?self.options, "Mirror reconfigured");
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    /// Route one backend event to the entry and stage it belongs to.
    pub fn handle_event(&mut self, event: GraphEvent) {
        trace!(kind = event.kind(), "Graph event");

        match event {
            GraphEvent::GlobalAdded { id, type_, props } => {
                self.on_endpoint_discovered(id, &type_, &props);
            }
            GraphEvent::GlobalRemoved { id } => {
                self.on_endpoint_removed(id);
            }
            GraphEvent::NodeInfo { observer, props } => match self.store.route(observer) {
                Some(Route {
                    endpoint,
                    role: Role::Collector,
                }) => self.collect_info(endpoint, &props),
                Some(route) => trace!(?route, "Info event outside collection ignored"),
                None => trace!(%observer, "Info event for released observer"),
            },
            GraphEvent::NodeParam { observer, param } => self.on_node_param(observer, param),
            GraphEvent::StreamState { observer, old, new } => match self.store.route(observer) {
                Some(Route {
                    endpoint,
                    role: Role::StreamState,
                }) => self.on_stream_state(endpoint, old, new),
                Some(route) => trace!(?route, "Stream state on unexpected route"),
                None => trace!(%observer, ?new, "Stream state for released observer"),
            },
            GraphEvent::SessionError {
                connection,
                message,
            } => match self.store.route(connection) {
                Some(Route { endpoint, .. }) => self.on_session_error(endpoint, &message),
                None => {
                    if connection == Handle::MAIN {
                        warn!(%message, "Daemon connection error");
                    } else {
                        trace!(%connection, "Error on released connection");
                    }
                }
            },
            GraphEvent::BindFailed {
                observer,
                global_id,
                message,
            } => match self.store.route(observer) {
                Some(route) => self.on_bind_failed(route, global_id, &message),
                None => trace!(%observer, global_id, "Bind failure for released observer"),
            },
        }
    }

    /// Start a pipeline for `id` if it is a candidate and not already tracked.
    pub fn on_endpoint_discovered(&mut self, id: EndpointId, type_: &str, props: &Properties) {
        if !self.filter.is_candidate(type_, props) {
            return;
        }

        if self.store.contains(id) {
            debug!(endpoint = id, "Endpoint rediscovered while live, ignoring");
            return;
        }

        info!(
            endpoint = id,
            app = props.get(crate::graph::keys::APP_NAME).map(String::as_str).unwrap_or(""),
            "Candidate endpoint discovered"
        );
        self.store.get_or_create(id);
        self.start_collector(id);
    }

    /// Tear down the pipeline for `id` from whatever stage it reached.
    pub fn on_endpoint_removed(&mut self, id: EndpointId) {
        let stage = self.store.find(id).map(|entry| entry.stage);
        if self.store.remove(id) {
            info!(
                endpoint = id,
                stage = stage.map(|s| s.name()).unwrap_or("unknown"),
                "Endpoint removed, shadow torn down"
            );
        }
    }

    /// Release every entry. Called once at shutdown.
    pub fn shutdown(&mut self) {
        let removed = self.store.clear();
        info!(entries = removed, "Mirror shut down");
    }

    pub fn find(&self, id: EndpointId) -> Option<&Entry> {
        self.store.find(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Summary of every live entry, sorted by endpoint id
    pub fn snapshot(&self) -> Vec<EntrySummary> {
        let mut summaries: Vec<EntrySummary> = self
            .store
            .iter()
            .map(|(id, entry)| EntrySummary {
                endpoint: *id,
                stage: entry.stage,
                process_binary: entry.descriptor.process_binary.clone(),
                media_name: entry.descriptor.media_name.clone(),
                format: entry.descriptor.format.clone(),
                shadow: entry.shadow_endpoint_id(),
                synced: entry.sync.is_some(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.endpoint);
        summaries
    }

    /// Entries still short of `Bound` that were discovered more than
    /// `older_than` before `now`.
    pub fn stalled(&self, now: Instant, older_than: Duration) -> Vec<StallReport> {
        let mut reports: Vec<StallReport> = self
            .store
            .iter()
            .filter(|(_, entry)| entry.stage != Stage::Bound)
            .filter_map(|(id, entry)| {
                let age = now.saturating_duration_since(entry.discovered_at);
                (age >= older_than).then_some(StallReport {
                    endpoint: *id,
                    stage: entry.stage,
                    age,
                })
            })
            .collect();
        reports.sort_by_key(|report| report.endpoint);
        reports
    }

    fn scoped(&self, handle: Handle) -> ScopedHandle {
        ScopedHandle::new(handle, self.graph.clone())
    }

    fn on_node_param(&mut self, observer: Handle, param: Param) {
        let Some(Route { endpoint, role }) = self.store.route(observer) else {
            trace!(%observer, "Param event for released observer");
            return;
        };

        match (role, param) {
            (Role::Collector, Param::Format(format)) => self.collect_format(endpoint, format),
            (Role::ShadowParams, Param::Props(blob)) => {
                self.on_params_changed(endpoint, Side::Shadow, blob)
            }
            (Role::OriginalParams, Param::Props(blob)) => {
                self.on_params_changed(endpoint, Side::Original, blob)
            }
            (role, param) => trace!(endpoint, ?role, ?param, "Param event ignored"),
        }
    }

    fn on_stream_state(&mut self, id: EndpointId, old: StreamState, new: StreamState) {
        debug!(endpoint = id, ?old, ?new, "Shadow stream state changed");
        match new {
            StreamState::Paused => self.on_shadow_ready(id),
            StreamState::Error(message) => self.on_stream_failed(id, &message),
            _ => {}
        }
    }

    fn on_session_error(&mut self, id: EndpointId, message: &str) {
        let bound = self
            .store
            .find(id)
            .is_some_and(|entry| entry.stage == Stage::Bound);

        if bound {
            warn!(endpoint = id, %message, "Shadow connection reported an error");
        } else {
            warn!(endpoint = id, %message, "Shadow connection failed, abandoning endpoint");
            self.store.remove(id);
        }
    }

    fn on_bind_failed(&mut self, route: Route, global_id: u32, message: &str) {
        let id = route.endpoint;
        match route.role {
            Role::Collector => {
                warn!(endpoint = id, %message, "Failed to bind original endpoint, abandoning");
                self.store.remove(id);
            }
            Role::ShadowParams | Role::OriginalParams => {
                warn!(
                    endpoint = id,
                    shadow = global_id,
                    %message,
                    "Failed to bind shadow, parameter sync abandoned"
                );
                self.abandon_sync(id);
            }
            Role::StreamState | Role::Connection => {
                trace!(endpoint = id, role = ?route.role, "Bind failure on unexpected route");
            }
        }
    }
}
