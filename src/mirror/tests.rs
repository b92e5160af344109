//! Tests for the Mirror lifecycle
//!
//! Every test drives the mirror with graph events against a recording graph
//! and checks the calls it made and the handles left live.

use super::*;
use crate::graph::recording::{Call, RecordingGraph};
use crate::graph::{keys, AudioFormat, ParamBlob, ParamKind};
use proptest::prelude::*;
use std::time::{Duration, Instant};

const ORIGINAL: EndpointId = 42;
const SHADOW: u32 = 100;

struct Harness {
    graph: Arc<RecordingGraph>,
    mirror: Mirror,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(MirrorOptions::default())
    }

    fn with_options(options: MirrorOptions) -> Self {
        let graph = Arc::new(RecordingGraph::new());
        graph.set_next_node_id(SHADOW);
        let filter = AppNameFilter::new(
            keys::NODE_TYPE,
            vec!["Chromium".to_string(), "Chromium input".to_string()],
        );
        let mirror = Mirror::new(graph.clone(), Box::new(filter), options);
        Self { graph, mirror }
    }

    fn discover(&mut self, id: EndpointId) {
        let mut props = Properties::new();
        props.insert(keys::APP_NAME.to_string(), "Chromium".to_string());
        self.mirror.handle_event(GraphEvent::GlobalAdded {
            id,
            type_: keys::NODE_TYPE.to_string(),
            props,
        });
    }

    fn remove(&mut self, id: EndpointId) {
        self.mirror.handle_event(GraphEvent::GlobalRemoved { id });
    }

    /// (remote node, collector observer) of the original
    fn original(&self, id: EndpointId) -> (Handle, Handle) {
        self.graph
            .bind_observer(id)
            .expect("original was never bound")
    }

    fn info(&mut self, id: EndpointId) {
        let (_, observer) = self.original(id);
        let mut props = Properties::new();
        props.insert(keys::APP_PROCESS_BINARY.to_string(), "app".to_string());
        props.insert(
            keys::MEDIA_CLASS.to_string(),
            "Stream/Output/Audio".to_string(),
        );
        props.insert(keys::MEDIA_NAME.to_string(), "Playback".to_string());
        self.mirror
            .handle_event(GraphEvent::NodeInfo { observer, props });
    }

    fn format(&mut self, id: EndpointId) {
        let (_, observer) = self.original(id);
        self.mirror.handle_event(GraphEvent::NodeParam {
            observer,
            param: Param::Format(AudioFormat::new(48000, 2)),
        });
    }

    fn stream_state(&mut self, new: StreamState) {
        let (_, observer, _) = self.graph.last_stream().expect("no stream created");
        self.mirror.handle_event(GraphEvent::StreamState {
            observer,
            old: StreamState::Connecting,
            new,
        });
    }

    fn ready(&mut self) {
        self.stream_state(StreamState::Paused);
    }

    /// Drive `id` all the way to `Bound`
    fn bind(&mut self, id: EndpointId) {
        self.discover(id);
        self.info(id);
        self.format(id);
        self.ready();
    }

    /// Mark the shadow stream of `id` ready, whichever stream was created last
    fn ready_for(&mut self, id: EndpointId) {
        let observer = self
            .mirror
            .find(id)
            .and_then(|entry| entry.provision.as_ref())
            .map(|provision| provision.state_observer.handle())
            .expect("entry is not provisioning");
        self.mirror.handle_event(GraphEvent::StreamState {
            observer,
            old: StreamState::Connecting,
            new: StreamState::Paused,
        });
    }

    /// Shadow connection of `id`, pending or ready
    fn connection_of(&self, id: EndpointId) -> Handle {
        let entry = self.mirror.find(id).expect("entry is gone");
        entry
            .provision
            .as_ref()
            .map(|provision| provision.connection.handle())
            .or_else(|| entry.shadow.as_ref().map(|bundle| bundle.connection.handle()))
            .expect("entry has no shadow connection")
    }

    /// Observer attached to the shadow by the binder
    fn shadow_observer(&self) -> Handle {
        self.graph
            .bind_observer(SHADOW)
            .expect("shadow was never bound")
            .1
    }

    /// Props observer attached to the original by the binder
    fn original_observer(&self, id: EndpointId) -> Handle {
        let (node, _) = self.original(id);
        self.graph.observers_of(node)[0]
    }

    fn props_from(&mut self, observer: Handle, blob: ParamBlob) {
        self.mirror.handle_event(GraphEvent::NodeParam {
            observer,
            param: Param::Props(blob),
        });
    }

    fn stage(&self, id: EndpointId) -> Option<Stage> {
        self.mirror.find(id).map(|entry| entry.stage)
    }

    fn sessions_opened(&self) -> usize {
        self.graph
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::OpenSession { .. }))
            .count()
    }

    fn binds_to(&self, global_id: u32) -> usize {
        self.graph
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::BindNode { global_id: id, .. } if *id == global_id))
            .count()
    }

    fn assert_all_released(&self) {
        assert!(
            self.graph.live_handles().is_empty(),
            "leaked handles: {:?}",
            self.graph.live_handles()
        );
        assert!(
            self.graph.double_released().is_empty(),
            "double released: {:?}",
            self.graph.double_released()
        );
    }
}

// =========================================================================
// Discovery and collection
// =========================================================================

#[test]
fn test_discovery_binds_original_and_requests_format() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);

    let (node, observer) = h.original(ORIGINAL);
    let calls = h.graph.calls();
    assert_eq!(
        calls,
        vec![
            Call::BindNode {
                connection: Handle::MAIN,
                node,
                observer,
                global_id: ORIGINAL,
            },
            Call::SubscribeParams {
                node,
                kinds: vec![ParamKind::Format],
            },
            Call::EnumParams {
                node,
                kind: ParamKind::Format,
            },
        ]
    );
    assert_eq!(h.stage(ORIGINAL), Some(Stage::Collecting(Collect::Empty)));
}

#[test]
fn test_non_candidates_are_ignored() {
    let mut h = Harness::new();
    let mut props = Properties::new();
    props.insert(keys::APP_NAME.to_string(), "Firefox".to_string());
    h.mirror.handle_event(GraphEvent::GlobalAdded {
        id: 5,
        type_: keys::NODE_TYPE.to_string(),
        props,
    });

    assert!(h.mirror.is_empty());
    assert!(h.graph.calls().is_empty());
}

#[test]
fn test_shadow_nodes_are_never_mirrored() {
    let mut h = Harness::new();
    let mut props = Properties::new();
    props.insert(keys::APP_NAME.to_string(), "Chromium".to_string());
    props.insert(keys::NODE_NAME.to_string(), format!("pw-shadow.{}", ORIGINAL));
    h.mirror.handle_event(GraphEvent::GlobalAdded {
        id: SHADOW,
        type_: keys::NODE_TYPE.to_string(),
        props,
    });

    assert!(h.mirror.is_empty());
}

#[test]
fn test_rediscovery_of_live_entry_is_noop() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.discover(ORIGINAL);

    assert_eq!(h.binds_to(ORIGINAL), 1);
    assert_eq!(h.stage(ORIGINAL), Some(Stage::Collecting(Collect::InfoOnly)));
}

#[test]
fn test_collection_completes_in_either_order() {
    let mut h = Harness::new();
    h.discover(1);
    h.format(1);
    assert_eq!(h.stage(1), Some(Stage::Collecting(Collect::FormatOnly)));
    h.info(1);
    assert_eq!(h.stage(1), Some(Stage::Provisioning));

    h.discover(2);
    h.info(2);
    h.format(2);
    assert_eq!(h.stage(2), Some(Stage::Provisioning));

    assert_eq!(h.sessions_opened(), 2);
}

#[test]
fn test_collector_observer_released_on_completion() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    let (node, observer) = h.original(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);

    assert!(h.graph.releases().contains(&observer));
    assert!(h.graph.live_handles().contains(&node));
    assert!(h.mirror.find(ORIGINAL).unwrap().collector.is_none());

    // Late duplicates after completion change nothing
    h.format(ORIGINAL);
    h.info(ORIGINAL);
    assert_eq!(h.sessions_opened(), 1);
}

#[test]
fn test_non_format_params_ignored_during_collection() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    let (_, observer) = h.original(ORIGINAL);
    h.mirror.handle_event(GraphEvent::NodeParam {
        observer,
        param: Param::Props(ParamBlob::volume_mute(1.0, false)),
    });
    h.mirror.handle_event(GraphEvent::NodeParam {
        observer,
        param: Param::Other(17),
    });

    assert_eq!(h.stage(ORIGINAL), Some(Stage::Collecting(Collect::Empty)));
}

proptest! {
    #[test]
    fn prop_provisioning_starts_exactly_once(
        sequence in prop::collection::vec(any::<bool>(), 2..16)
            .prop_filter("both halves present", |seq| seq.contains(&true) && seq.contains(&false))
    ) {
        let mut h = Harness::new();
        h.discover(ORIGINAL);

        for is_info in &sequence {
            if *is_info {
                h.info(ORIGINAL);
            } else {
                h.format(ORIGINAL);
            }
        }

        prop_assert_eq!(h.sessions_opened(), 1);
        prop_assert_eq!(h.stage(ORIGINAL), Some(Stage::Provisioning));
        let descriptor = &h.mirror.find(ORIGINAL).unwrap().descriptor;
        prop_assert_eq!(descriptor.media_name.as_str(), "Playback");
        prop_assert_eq!(descriptor.format.sample_rate, 48000);
    }

    #[test]
    fn prop_binding_happens_once_however_often_ready_repeats(extra in 0usize..6) {
        let mut h = Harness::new();
        h.bind(ORIGINAL);
        for _ in 0..extra {
            h.ready();
        }

        prop_assert_eq!(h.binds_to(SHADOW), 1);
        prop_assert_eq!(h.stage(ORIGINAL), Some(Stage::Bound));
    }
}

// =========================================================================
// Provisioning
// =========================================================================

#[test]
fn test_scenario_a_shadow_created_and_bound() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);

    let (_, _, spec) = h.graph.last_stream().unwrap();
    assert_eq!(spec.name, "Playback");
    assert_eq!(spec.format.sample_rate, 48000);
    assert_eq!(spec.format.channels, 2);
    assert_eq!(spec.properties[keys::APP_NAME], "app");
    assert!(h.graph.calls().iter().any(|call| matches!(
        call,
        Call::OpenSession { app_name, .. } if app_name == "app"
    )));

    h.ready();

    let entry = h.mirror.find(ORIGINAL).unwrap();
    assert_eq!(entry.stage, Stage::Bound);
    assert_eq!(entry.shadow_endpoint_id(), Some(SHADOW));
    assert!(entry.sync.is_some());

    // Shadow bound through its own connection, not the daemon session
    let connection = entry.shadow.as_ref().unwrap().connection.handle();
    assert!(h.graph.calls().iter().any(|call| matches!(
        call,
        Call::BindNode { connection: c, global_id, .. } if *c == connection && *global_id == SHADOW
    )));

    let summary = &h.mirror.snapshot()[0];
    assert_eq!(summary.shadow, Some(SHADOW));
    assert!(summary.synced);
}

#[test]
fn test_binder_subscribes_both_sides_and_seeds_from_shadow() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);

    let (original, _) = h.original(ORIGINAL);
    let (shadow, _) = h.graph.bind_observer(SHADOW).unwrap();
    let calls = h.graph.calls();

    for node in [shadow, original] {
        assert!(calls.contains(&Call::SubscribeParams {
            node,
            kinds: vec![ParamKind::Props],
        }));
    }
    assert_eq!(
        calls.last(),
        Some(&Call::EnumParams {
            node: shadow,
            kind: ParamKind::Props,
        })
    );
}

#[test]
fn test_initial_sync_can_seed_from_original() {
    let mut h = Harness::with_options(MirrorOptions {
        initial_source: SyncSource::Original,
        ..Default::default()
    });
    h.bind(ORIGINAL);

    let (original, _) = h.original(ORIGINAL);
    assert_eq!(
        h.graph.calls().last(),
        Some(&Call::EnumParams {
            node: original,
            kind: ParamKind::Props,
        })
    );
}

#[test]
fn test_state_observer_released_on_readiness() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);
    let (stream, observer, _) = h.graph.last_stream().unwrap();

    h.ready();

    assert!(h.graph.releases().contains(&observer));
    assert!(h.graph.live_handles().contains(&stream));
}

#[test]
fn test_non_ready_transitions_do_not_advance() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);
    h.stream_state(StreamState::Connecting);
    h.stream_state(StreamState::Unconnected);

    assert_eq!(h.stage(ORIGINAL), Some(Stage::Provisioning));
    assert_eq!(h.binds_to(SHADOW), 0);
}

#[test]
fn test_session_open_failure_removes_entry() {
    let mut h = Harness::new();
    h.graph.fail_sessions(true);
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);

    assert!(h.mirror.find(ORIGINAL).is_none());
    assert!(h.graph.last_stream().is_none());
    h.assert_all_released();
}

#[test]
fn test_async_session_error_before_readiness_removes_entry() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);
    let connection = h
        .mirror
        .find(ORIGINAL)
        .and_then(|entry| entry.provision.as_ref())
        .map(|provision| provision.connection.handle())
        .unwrap();

    h.mirror.handle_event(GraphEvent::SessionError {
        connection,
        message: "connection refused".to_string(),
    });

    assert!(h.mirror.find(ORIGINAL).is_none());
    h.assert_all_released();
}

#[test]
fn test_session_error_after_binding_keeps_entry() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let connection = h.mirror.find(ORIGINAL).unwrap().shadow.as_ref().unwrap().connection.handle();

    h.mirror.handle_event(GraphEvent::SessionError {
        connection,
        message: "hiccup".to_string(),
    });

    assert_eq!(h.stage(ORIGINAL), Some(Stage::Bound));
}

#[test]
fn test_stream_error_before_readiness_removes_entry() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);
    h.stream_state(StreamState::Error("no target".to_string()));

    assert!(h.mirror.find(ORIGINAL).is_none());
    h.assert_all_released();
}

// =========================================================================
// Binding failures
// =========================================================================

#[test]
fn test_shadow_bind_failure_keeps_bundle_until_removal() {
    let mut h = Harness::new();
    h.graph.fail_bind(SHADOW);
    h.bind(ORIGINAL);

    let entry = h.mirror.find(ORIGINAL).unwrap();
    assert_eq!(entry.stage, Stage::Provisioning);
    assert_eq!(entry.shadow_endpoint_id(), Some(SHADOW));
    assert!(entry.sync.is_none());

    h.remove(ORIGINAL);
    h.assert_all_released();
}

#[test]
fn test_async_shadow_bind_failure_abandons_sync() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let shadow_observer = h.shadow_observer();
    let original_observer = h.original_observer(ORIGINAL);

    h.mirror.handle_event(GraphEvent::BindFailed {
        observer: shadow_observer,
        global_id: SHADOW,
        message: "no such node".to_string(),
    });

    let entry = h.mirror.find(ORIGINAL).unwrap();
    assert_eq!(entry.stage, Stage::Provisioning);
    assert!(entry.sync.is_none());
    assert_eq!(entry.shadow_endpoint_id(), Some(SHADOW));

    h.props_from(original_observer, ParamBlob::volume_mute(0.3, false));
    assert!(h.graph.pushes().is_empty());

    h.remove(ORIGINAL);
    h.assert_all_released();
}

#[test]
fn test_rejected_and_failed_shadow_binds_end_in_same_state() {
    let mut rejected = Harness::new();
    rejected.graph.fail_bind(SHADOW);
    rejected.bind(ORIGINAL);

    let mut failed = Harness::new();
    failed.bind(ORIGINAL);
    let shadow_observer = failed.shadow_observer();
    failed.mirror.handle_event(GraphEvent::BindFailed {
        observer: shadow_observer,
        global_id: SHADOW,
        message: "no such node".to_string(),
    });

    assert_eq!(rejected.mirror.snapshot(), failed.mirror.snapshot());
    let summary = &failed.mirror.snapshot()[0];
    assert_eq!(summary.stage, Stage::Provisioning);
    assert_eq!(summary.shadow, Some(SHADOW));
    assert!(!summary.synced);

    let later = Instant::now() + Duration::from_secs(60);
    for h in [&rejected, &failed] {
        let stalled = h.mirror.stalled(later, Duration::from_secs(30));
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].stage, Stage::Provisioning);
    }

    // A connection error is fatal for both, as for any unbound entry
    for mut h in [rejected, failed] {
        let connection = h.connection_of(ORIGINAL);
        h.mirror.handle_event(GraphEvent::SessionError {
            connection,
            message: "broken pipe".to_string(),
        });
        assert!(h.mirror.find(ORIGINAL).is_none());
        h.assert_all_released();
    }
}

#[test]
fn test_async_original_bind_failure_removes_entry() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    let (_, observer) = h.original(ORIGINAL);

    h.mirror.handle_event(GraphEvent::BindFailed {
        observer,
        global_id: ORIGINAL,
        message: "gone".to_string(),
    });

    assert!(h.mirror.find(ORIGINAL).is_none());
    h.assert_all_released();
}

// =========================================================================
// Several endpoints in flight
// =========================================================================

#[test]
fn test_interleaved_endpoints_fail_independently() {
    let mut h = Harness::new();
    h.discover(1);
    h.discover(2);
    h.info(2);
    h.format(1);
    h.info(1);
    h.format(2);
    assert_eq!(h.stage(1), Some(Stage::Provisioning));
    assert_eq!(h.stage(2), Some(Stage::Provisioning));
    assert_eq!(h.sessions_opened(), 2);

    let connection = h.connection_of(1);
    h.mirror.handle_event(GraphEvent::SessionError {
        connection,
        message: "connection refused".to_string(),
    });
    assert!(h.mirror.find(1).is_none());
    assert_eq!(h.stage(2), Some(Stage::Provisioning));

    h.ready_for(2);
    assert_eq!(h.stage(2), Some(Stage::Bound));
    let shadow = h.mirror.find(2).and_then(|entry| entry.shadow_endpoint_id()).unwrap();
    assert_eq!(h.binds_to(shadow), 1);

    let (shadow_observer, original_observer) = {
        let (_, observer) = h.graph.bind_observer(shadow).unwrap();
        (observer, h.original_observer(2))
    };
    h.props_from(shadow_observer, ParamBlob::volume_mute(0.4, true));
    assert_eq!(h.graph.pushes().len(), 1);
    h.props_from(original_observer, ParamBlob::volume_mute(0.4, true));
    assert_eq!(h.graph.pushes().len(), 1);

    // Late events for the removed endpoint touch nothing
    h.remove(1);
    h.format(1);
    assert!(h.mirror.find(1).is_none());
    assert_eq!(h.stage(2), Some(Stage::Bound));

    h.remove(2);
    assert!(h.mirror.is_empty());
    h.assert_all_released();
}

#[test]
fn test_removing_one_endpoint_mid_collection_spares_the_other() {
    let mut h = Harness::new();
    h.discover(7);
    h.discover(8);
    h.info(7);
    h.info(8);
    h.remove(7);
    h.format(8);
    h.format(7);

    assert!(h.mirror.find(7).is_none());
    assert_eq!(h.stage(8), Some(Stage::Provisioning));
    assert_eq!(h.sessions_opened(), 1);

    h.ready_for(8);
    assert_eq!(h.stage(8), Some(Stage::Bound));
    h.mirror.shutdown();
    h.assert_all_released();
}

// =========================================================================
// Parameter sync
// =========================================================================

#[test]
fn test_scenario_b_shadow_change_pushed_once() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let (original, _) = h.original(ORIGINAL);
    let blob = ParamBlob::volume_mute(0.5, false);

    h.props_from(h.shadow_observer(), blob.clone());
    assert_eq!(h.graph.pushes(), vec![(original, blob.clone())]);
    let sync = h.mirror.find(ORIGINAL).unwrap().sync.as_ref().unwrap();
    assert!(sync.is_suppressed());
    assert_eq!(sync.last_blob(), Some(&blob));

    // The original echoes what we pushed
    h.props_from(h.original_observer(ORIGINAL), blob);
    assert_eq!(h.graph.pushes().len(), 1);
    let sync = h.mirror.find(ORIGINAL).unwrap().sync.as_ref().unwrap();
    assert!(!sync.is_suppressed());
}

#[test]
fn test_original_change_pushed_to_shadow() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let (shadow, _) = h.graph.bind_observer(SHADOW).unwrap();
    let blob = ParamBlob::volume_mute(0.8, true);

    h.props_from(h.original_observer(ORIGINAL), blob.clone());
    h.props_from(h.shadow_observer(), blob.clone());

    assert_eq!(h.graph.pushes(), vec![(shadow, blob)]);
}

#[test]
fn test_alternating_changes_never_bounce() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let shadow_observer = h.shadow_observer();
    let original_observer = h.original_observer(ORIGINAL);

    for i in 0..5 {
        let blob = ParamBlob::volume_mute(i as f32 / 10.0, false);
        h.props_from(shadow_observer, blob.clone());
        h.props_from(original_observer, blob);
    }

    assert_eq!(h.graph.pushes().len(), 5);
}

#[test]
fn test_empty_props_are_ignored() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);

    h.props_from(h.shadow_observer(), ParamBlob::default());

    assert!(h.graph.pushes().is_empty());
    let sync = h.mirror.find(ORIGINAL).unwrap().sync.as_ref().unwrap();
    assert!(!sync.is_suppressed());
}

// =========================================================================
// Removal
// =========================================================================

#[test]
fn test_scenario_c_removal_before_format() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.remove(ORIGINAL);

    assert!(h.mirror.find(ORIGINAL).is_none());
    assert_eq!(h.sessions_opened(), 0);
    h.assert_all_released();

    // The format arrives late and finds nothing
    h.format(ORIGINAL);
    assert!(h.mirror.is_empty());
    assert_eq!(h.sessions_opened(), 0);
}

#[test]
fn test_scenario_d_removal_mid_provisioning() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    h.info(ORIGINAL);
    h.format(ORIGINAL);
    let (original, _) = h.original(ORIGINAL);
    let (stream, state_observer, _) = h.graph.last_stream().unwrap();
    let (session, connection) = {
        let provision = h.mirror.find(ORIGINAL).unwrap().provision.as_ref().unwrap();
        (provision.session.handle(), provision.connection.handle())
    };
    h.graph.clear_calls();

    h.remove(ORIGINAL);

    assert_eq!(
        h.graph.releases(),
        vec![state_observer, stream, connection, session, original]
    );
    h.assert_all_released();

    // Readiness after removal is discarded
    h.mirror.handle_event(GraphEvent::StreamState {
        observer: state_observer,
        old: StreamState::Connecting,
        new: StreamState::Paused,
    });
    assert!(h.mirror.is_empty());
    assert_eq!(h.binds_to(SHADOW), 0);
}

#[test]
fn test_removal_of_bound_entry_releases_in_reverse_order() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let (original, _) = h.original(ORIGINAL);
    let (shadow, shadow_observer) = h.graph.bind_observer(SHADOW).unwrap();
    let original_observer = h.original_observer(ORIGINAL);
    let (stream, _, _) = h.graph.last_stream().unwrap();
    let (session, connection) = {
        let bundle = h.mirror.find(ORIGINAL).unwrap().shadow.as_ref().unwrap();
        (bundle.session.handle(), bundle.connection.handle())
    };
    h.graph.clear_calls();

    h.remove(ORIGINAL);

    assert_eq!(
        h.graph.releases(),
        vec![
            original_observer,
            shadow_observer,
            shadow,
            stream,
            connection,
            session,
            original
        ]
    );
    h.assert_all_released();
}

#[test]
fn test_removal_is_idempotent() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    h.remove(ORIGINAL);
    let released = h.graph.releases().len();

    h.remove(ORIGINAL);
    h.mirror.on_endpoint_removed(ORIGINAL);

    assert_eq!(h.graph.releases().len(), released);
    h.assert_all_released();
}

#[test]
fn test_stale_params_after_removal_are_dropped() {
    let mut h = Harness::new();
    h.bind(ORIGINAL);
    let shadow_observer = h.shadow_observer();
    let original_observer = h.original_observer(ORIGINAL);
    h.remove(ORIGINAL);

    h.props_from(shadow_observer, ParamBlob::volume_mute(0.1, false));
    h.props_from(original_observer, ParamBlob::volume_mute(0.2, true));

    assert!(h.graph.pushes().is_empty());
    assert_eq!(h.mirror.store.route_count(), 0);
}

#[test]
fn test_rediscovery_after_removal_starts_fresh_pipeline() {
    let mut h = Harness::new();
    h.discover(ORIGINAL);
    let (_, first_observer) = h.original(ORIGINAL);
    h.remove(ORIGINAL);

    h.discover(ORIGINAL);
    let (_, second_observer) = h.original(ORIGINAL);

    assert_ne!(first_observer, second_observer);
    assert_eq!(h.stage(ORIGINAL), Some(Stage::Collecting(Collect::Empty)));
}

#[test]
fn test_shutdown_releases_every_entry() {
    let mut h = Harness::new();
    h.bind(1);
    h.discover(2);
    h.discover(3);
    h.info(3);
    h.format(3);
    assert_eq!(h.mirror.len(), 3);

    h.mirror.shutdown();

    assert!(h.mirror.is_empty());
    h.assert_all_released();
}

// =========================================================================
// Queries
// =========================================================================

#[test]
fn test_stalled_reports_only_pending_entries() {
    let mut h = Harness::new();
    h.bind(1);
    h.discover(2);

    let later = Instant::now() + Duration::from_secs(60);
    let stalled = h.mirror.stalled(later, Duration::from_secs(30));
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].endpoint, 2);
    assert_eq!(stalled[0].stage, Stage::Collecting(Collect::Empty));

    assert!(h.mirror.stalled(Instant::now(), Duration::from_secs(30)).is_empty());
}

#[test]
fn test_snapshot_is_sorted_and_reflects_stages() {
    let mut h = Harness::new();
    h.discover(9);
    h.bind(4);

    let snapshot = h.mirror.snapshot();
    let ids: Vec<_> = snapshot.iter().map(|s| s.endpoint).collect();
    assert_eq!(ids, vec![4, 9]);
    assert_eq!(snapshot[0].stage, Stage::Bound);
    assert_eq!(snapshot[0].process_binary, "app");
    assert_eq!(snapshot[1].shadow, None);
    assert!(!snapshot[1].synced);
}
