//! Descriptor collection for a newly discovered endpoint
//!
//! The original is bound through the daemon session with an observer that
//! sees both its info and its param events. Properties and format arrive as
//! two independent events, in any order and possibly repeated; the
//! [`Collect`] state records which halves are in and advances to
//! provisioning once both are.

use tracing::{debug, info, trace, warn};

use crate::graph::{AudioFormat, EndpointId, Handle, ParamKind, Properties};

use super::store::{Collect, Role, Stage};

impl super::Mirror {
    /// Bind the original and ask for its format.
    pub(super) fn start_collector(&mut self, id: EndpointId) {
        let node = self.handles.next();
        let observer = self.handles.next();

        if let Err(e) = self.graph.bind_node(Handle::MAIN, node, observer, id) {
            warn!(endpoint = id, error = %e, "Failed to bind original endpoint");
            self.store.remove(id);
            return;
        }

        let original = self.scoped(node);
        let collector = self.scoped(observer);
        let entry = self.store.get_or_create(id);
        entry.original = Some(original);
        entry.collector = Some(collector);
        entry.stage = Stage::Collecting(Collect::Empty);
        self.store.bind_route(observer, id, Role::Collector);

        let requested = self
            .graph
            .subscribe_params(node, &[ParamKind::Format])
            .and_then(|()| self.graph.enum_params(node, ParamKind::Format));
        if let Err(e) = requested {
            warn!(endpoint = id, error = %e, "Failed to request original format");
            self.store.remove(id);
            return;
        }

        debug!(endpoint = id, %node, "Collecting descriptor");
    }

    /// Record the original's descriptive properties.
    pub(super) fn collect_info(&mut self, id: EndpointId, props: &Properties) {
        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        let Stage::Collecting(collect) = entry.stage else {
            trace!(endpoint = id, stage = entry.stage.name(), "Late info event ignored");
            return;
        };
        if collect.has_info() {
            trace!(endpoint = id, "Duplicate info event ignored");
            return;
        }

        entry.descriptor.apply_info(props);
        entry.stage = Stage::Collecting(collect.with_info());
        debug!(
            endpoint = id,
            binary = %entry.descriptor.process_binary,
            class = %entry.descriptor.media_class,
            name = %entry.descriptor.media_name,
            "Collected endpoint info"
        );

        self.maybe_advance(id);
    }

    /// Record the original's audio format.
    pub(super) fn collect_format(&mut self, id: EndpointId, format: AudioFormat) {
        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        let Stage::Collecting(collect) = entry.stage else {
            trace!(endpoint = id, stage = entry.stage.name(), "Late format event ignored");
            return;
        };
        if collect.has_format() {
            trace!(endpoint = id, "Duplicate format event ignored");
            return;
        }

        debug!(endpoint = id, %format, "Collected endpoint format");
        entry.descriptor.format = format;
        entry.stage = Stage::Collecting(collect.with_format());

        self.maybe_advance(id);
    }

    /// Move to provisioning once both halves of the descriptor are in.
    fn maybe_advance(&mut self, id: EndpointId) {
        let Some(entry) = self.store.find_mut(id) else {
            return;
        };
        if entry.stage != Stage::Collecting(Collect::Complete) {
            return;
        }

        entry.stage = Stage::Provisioning;
        let collector = entry.collector.take();
        info!(
            endpoint = id,
            name = %entry.descriptor.media_name,
            format = %entry.descriptor.format,
            "Descriptor complete, provisioning shadow"
        );

        if let Some(collector) = collector {
            self.store.unbind_route(collector.handle());
        }

        self.start_provisioning(id);
    }
}
