//! Registration binding of a ready shadow
//!
//! Binds a remote handle to the shadow node through the shadow's own
//! connection, attaches param observers to both sides, subscribes both to
//! `Props` changes and seeds the first sync with one enumeration.

use tracing::{debug, info, warn};

use crate::graph::{EndpointId, ParamKind};

use super::anti_echo::SyncSession;
use super::store::{Role, Stage};
use super::SyncSource;

impl super::Mirror {
    pub(super) fn start_binding(&mut self, id: EndpointId) {
        let Some(entry) = self.store.find(id) else {
            return;
        };
        let (Some(bundle), Some(original)) = (entry.shadow.as_ref(), entry.original.as_ref())
        else {
            warn!(endpoint = id, "Binder started without shadow or original handle");
            return;
        };
        let shadow_id = bundle.shadow_endpoint_id;
        let connection = bundle.connection.handle();
        let original = original.handle();

        let shadow_node = self.handles.next();
        let shadow_observer = self.handles.next();
        if let Err(e) = self
            .graph
            .bind_node(connection, shadow_node, shadow_observer, shadow_id)
        {
            warn!(endpoint = id, shadow = shadow_id, error = %e, "Failed to bind shadow, sync abandoned");
            return;
        }
        let shadow_node = self.scoped(shadow_node);
        let shadow_observer = self.scoped(shadow_observer);
        self.store
            .bind_route(shadow_observer.handle(), id, Role::ShadowParams);

        let original_observer = self.handles.next();
        if let Err(e) = self.graph.observe(original, original_observer) {
            warn!(endpoint = id, error = %e, "Failed to observe original, sync abandoned");
            self.store.unbind_route(shadow_observer.handle());
            drop(shadow_observer);
            drop(shadow_node);
            return;
        }
        let original_observer = self.scoped(original_observer);
        self.store
            .bind_route(original_observer.handle(), id, Role::OriginalParams);

        let subscribed = self
            .graph
            .subscribe_params(shadow_node.handle(), &[ParamKind::Props])
            .and_then(|()| self.graph.subscribe_params(original, &[ParamKind::Props]));
        if let Err(e) = subscribed {
            warn!(endpoint = id, error = %e, "Failed to subscribe to props, sync abandoned");
            self.store.unbind_route(original_observer.handle());
            self.store.unbind_route(shadow_observer.handle());
            drop(original_observer);
            drop(shadow_observer);
            drop(shadow_node);
            return;
        }

        let shadow_handle = shadow_node.handle();
        let sync = SyncSession::new(
            shadow_node,
            original,
            vec![shadow_observer, original_observer],
        );

        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        entry.sync = Some(sync);
        entry.stage = Stage::Bound;
        info!(endpoint = id, shadow = shadow_id, "Shadow bound, syncing volume and mute");

        let (seed, node) = match self.options.initial_source {
            SyncSource::Shadow => ("shadow", shadow_handle),
            SyncSource::Original => ("original", original),
        };
        debug!(endpoint = id, seed, "Seeding initial sync");
        if let Err(e) = self.graph.enum_params(node, ParamKind::Props) {
            warn!(endpoint = id, error = %e, "Failed to enumerate props for initial sync");
        }
    }

    /// Undo binding after an asynchronous bind failure.
    ///
    /// The entry ends where a rejected `bind_node` leaves it: back in
    /// `Provisioning` with the shadow bundle kept until removal and no sync.
    pub(super) fn abandon_sync(&mut self, id: EndpointId) {
        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        entry.stage = Stage::Provisioning;
        let Some(sync) = entry.sync.take() else {
            return;
        };
        for observer in sync.observer_handles() {
            self.store.unbind_route(observer);
        }
        drop(sync);
    }
}
