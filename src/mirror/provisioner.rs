//! Shadow provisioning
//!
//! Opens an isolated client session named after the original's process,
//! creates an output stream offering exactly the original's format, and waits
//! for the stream to become ready. The first `Paused` transition records the
//! shadow's node id and hands over to the binder; any later one is ignored.

use tracing::{debug, info, trace, warn};

use crate::graph::{keys, EndpointId, Properties, StreamSpec};

use super::filter::SHADOW_NODE_PREFIX;
use super::store::{OriginalDescriptor, Provision, Role, Stage};
use super::MirrorOptions;

/// Build the stream description for the shadow of `descriptor`.
pub(super) fn stream_spec(descriptor: &OriginalDescriptor, options: &MirrorOptions) -> StreamSpec {
    let mut properties = Properties::new();
    properties.insert(keys::MEDIA_TYPE.to_string(), "Audio".to_string());
    properties.insert(
        keys::MEDIA_CLASS.to_string(),
        descriptor.media_class.clone(),
    );
    properties.insert(
        keys::APP_NAME.to_string(),
        descriptor.process_binary.clone(),
    );
    properties.insert(
        keys::APP_ICON_NAME.to_string(),
        descriptor.process_binary.clone(),
    );
    properties.insert(
        keys::APP_PROCESS_BINARY.to_string(),
        descriptor.process_binary.clone(),
    );
    properties.insert(
        keys::NODE_NAME.to_string(),
        format!("{}{}", SHADOW_NODE_PREFIX, descriptor.endpoint_id),
    );

    let name = match &options.name_suffix {
        Some(suffix) => format!("{}{}", descriptor.media_name, suffix),
        None => descriptor.media_name.clone(),
    };

    StreamSpec {
        name,
        properties,
        format: descriptor.format.clone(),
        flags: options.flags,
    }
}

impl super::Mirror {
    /// Open the shadow's session and create its stream.
    pub(super) fn start_provisioning(&mut self, id: EndpointId) {
        let Some(entry) = self.store.find(id) else {
            return;
        };
        let app_name = entry.descriptor.process_binary.clone();
        let spec = stream_spec(&entry.descriptor, &self.options);

        let session = self.handles.next();
        let connection = self.handles.next();
        if let Err(e) = self.graph.open_session(session, connection, &app_name) {
            warn!(endpoint = id, error = %e, "Failed to open shadow session, abandoning endpoint");
            self.store.remove(id);
            return;
        }
        let session = self.scoped(session);
        let connection = self.scoped(connection);
        self.store
            .bind_route(connection.handle(), id, Role::Connection);

        let stream = self.handles.next();
        let state_observer = self.handles.next();
        if let Err(e) =
            self.graph
                .create_stream(connection.handle(), stream, state_observer, &spec)
        {
            warn!(endpoint = id, error = %e, "Failed to create shadow stream, abandoning endpoint");
            drop(connection);
            drop(session);
            self.store.remove(id);
            return;
        }
        let stream = self.scoped(stream);
        let state_observer = self.scoped(state_observer);
        self.store
            .bind_route(state_observer.handle(), id, Role::StreamState);

        debug!(
            endpoint = id,
            stream = %stream.handle(),
            name = %spec.name,
            format = %spec.format,
            "Shadow stream connecting"
        );

        if let Some(entry) = self.store.find_mut(id) {
            entry.provision = Some(Provision {
                state_observer,
                stream,
                connection,
                session,
            });
        }
    }

    /// First readiness of the shadow stream.
    pub(super) fn on_shadow_ready(&mut self, id: EndpointId) {
        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        let Some(provision) = entry.provision.take() else {
            trace!(endpoint = id, "Redundant readiness ignored");
            return;
        };

        let Some(node_id) = self.graph.stream_node_id(provision.stream.handle()) else {
            warn!(endpoint = id, "Shadow ready without a node id, abandoning endpoint");
            drop(provision);
            self.store.remove(id);
            return;
        };

        self.store.unbind_route(provision.state_observer.handle());
        let bundle = provision.into_bundle(node_id);

        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        info!(
            endpoint = id,
            shadow = node_id,
            name = %entry.descriptor.media_name,
            "Shadow endpoint ready"
        );
        entry.shadow = Some(bundle);

        self.start_binding(id);
    }

    /// Stream error before readiness
    pub(super) fn on_stream_failed(&mut self, id: EndpointId, message: &str) {
        let pending = self
            .store
            .find(id)
            .is_some_and(|entry| entry.stage == Stage::Provisioning && entry.provision.is_some());

        if pending {
            warn!(endpoint = id, %message, "Shadow stream failed, abandoning endpoint");
            self.store.remove(id);
        } else {
            warn!(endpoint = id, %message, "Shadow stream reported an error");
        }
    }
}
