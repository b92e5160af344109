//! The PipeWire loop thread
//!
//! Owns every native object, keyed by the handle the mirror allocated for it.
//! Listener callbacks never touch [`LoopState`]: they only send events and
//! record stream node ids, because some of them (stream state changes in
//! particular) fire synchronously while a command is being executed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use dashmap::DashMap;
use pipewire as pw;
use pw::context::Context;
use pw::core::Core;
use pw::main_loop::MainLoop;
use pw::node::{Node, NodeListener};
use pw::proxy::{ProxyListener, ProxyT};
use pw::registry::{GlobalObject, Registry};
use pw::spa::param::ParamType;
use pw::spa::pod::Pod;
use pw::spa::utils::dict::DictRef;
use pw::spa::utils::Direction;
use pw::stream::{Stream, StreamFlags, StreamListener};
use pw::types::ObjectType;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{pod, Command};
use crate::error::{GraphError, GraphResult};
use crate::graph::{
    keys, GraphEvent, Handle, Param, ParamBlob, ParamKind, Properties, StreamSpec, StreamState,
};

/// Node proxy version requested when binding by id
const NODE_VERSION: u32 = 3;

/// Entry point of the loop thread.
///
/// Reports setup success or failure on `ready`, then runs until
/// [`Command::Quit`].
pub(super) fn run(
    events: mpsc::UnboundedSender<GraphEvent>,
    node_ids: Arc<DashMap<Handle, u32>>,
    cmd_rx: pw::channel::Receiver<Command>,
    ready: std::sync::mpsc::Sender<GraphResult<()>>,
) {
    pw::init();

    let setup = match Setup::connect(&events) {
        Ok(setup) => setup,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let Setup {
        mainloop,
        context,
        core,
        core_listener,
        registry,
        registry_listener,
    } = setup;

    let state = Rc::new(RefCell::new(LoopState {
        mainloop: mainloop.clone(),
        events: events.clone(),
        node_ids,
        contexts: HashMap::new(),
        connections: HashMap::new(),
        nodes: HashMap::new(),
        observers: HashMap::new(),
        streams: HashMap::new(),
    }));
    state.borrow_mut().connections.insert(
        Handle::MAIN,
        Connection {
            registry: Some(registry),
            _listener: core_listener,
            core,
        },
    );

    let _receiver = cmd_rx.attach(mainloop.loop_(), {
        let mainloop = mainloop.clone();
        let state = state.clone();
        move |cmd| match cmd {
            Command::Quit => mainloop.quit(),
            cmd => state.borrow_mut().execute(cmd),
        }
    });

    let _ = ready.send(Ok(()));
    debug!("PipeWire loop running");
    mainloop.run();

    state.borrow_mut().teardown();
    drop(registry_listener);
    drop(context);
    debug!("PipeWire loop finished");
}

/// Daemon connection made before the loop starts
struct Setup {
    mainloop: MainLoop,
    context: Context,
    core: Core,
    core_listener: pw::core::Listener,
    registry: Registry,
    registry_listener: pw::registry::Listener,
}

impl Setup {
    fn connect(events: &mpsc::UnboundedSender<GraphEvent>) -> GraphResult<Self> {
        let failed = |what: &str, e: pw::Error| GraphError::ConnectionFailed(format!("{}: {}", what, e));

        let mainloop = MainLoop::new(None).map_err(|e| failed("main loop", e))?;
        let context = Context::new(&mainloop).map_err(|e| failed("context", e))?;
        let core = context.connect(None).map_err(|e| failed("connect", e))?;
        let registry = core.get_registry().map_err(|e| failed("registry", e))?;

        let core_listener = core
            .add_listener_local()
            .error({
                let events = events.clone();
                move |id, seq, res, message| {
                    let _ = events.send(GraphEvent::SessionError {
                        connection: Handle::MAIN,
                        message: format!("{} (id {}, seq {}, res {})", message, id, seq, res),
                    });
                }
            })
            .register();

        let registry_listener = registry
            .add_listener_local()
            .global({
                let events = events.clone();
                move |global| {
                    let _ = events.send(GraphEvent::GlobalAdded {
                        id: global.id,
                        type_: global.type_.to_str().to_string(),
                        props: global.props.map(properties_from_dict).unwrap_or_default(),
                    });
                }
            })
            .global_remove({
                let events = events.clone();
                move |id| {
                    let _ = events.send(GraphEvent::GlobalRemoved { id });
                }
            })
            .register();

        Ok(Self {
            mainloop,
            context,
            core,
            core_listener,
            registry,
            registry_listener,
        })
    }
}

/// A daemon connection; the registry is fetched the first time a node is
/// bound through it.
struct Connection {
    registry: Option<Registry>,
    _listener: pw::core::Listener,
    core: Core,
}

impl Connection {
    fn registry(&mut self) -> GraphResult<&Registry> {
        if self.registry.is_none() {
            let registry = self
                .core
                .get_registry()
                .map_err(|e| GraphError::ConnectionFailed(e.to_string()))?;
            self.registry = Some(registry);
        }
        self.registry
            .as_ref()
            .ok_or_else(|| GraphError::ConnectionFailed("registry unavailable".to_string()))
    }
}

/// Listener registrations named by observer handles
enum Observer {
    Node {
        _listener: NodeListener,
        _proxy: Option<ProxyListener>,
    },
    Stream(StreamListener<()>),
}

struct LoopState {
    mainloop: MainLoop,
    events: mpsc::UnboundedSender<GraphEvent>,
    node_ids: Arc<DashMap<Handle, u32>>,
    contexts: HashMap<Handle, Context>,
    connections: HashMap<Handle, Connection>,
    nodes: HashMap<Handle, Node>,
    observers: HashMap<Handle, Observer>,
    streams: HashMap<Handle, Stream>,
}

impl LoopState {
    fn execute(&mut self, cmd: Command) {
        trace!(?cmd, "PipeWire command");

        match cmd {
            Command::OpenSession {
                session,
                connection,
                app_name,
            } => {
                if let Err(e) = self.open_session(session, connection, &app_name) {
                    let _ = self.events.send(GraphEvent::SessionError {
                        connection,
                        message: e.to_string(),
                    });
                }
            }
            Command::CreateStream {
                connection,
                stream,
                observer,
                spec,
            } => {
                if let Err(e) = self.create_stream(connection, stream, observer, &spec) {
                    let _ = self.events.send(GraphEvent::StreamState {
                        observer,
                        old: StreamState::Unconnected,
                        new: StreamState::Error(e.to_string()),
                    });
                }
            }
            Command::BindNode {
                connection,
                node,
                observer,
                global_id,
            } => {
                if let Err(e) = self.bind_node(connection, node, observer, global_id) {
                    let _ = self.events.send(GraphEvent::BindFailed {
                        observer,
                        global_id,
                        message: e.to_string(),
                    });
                }
            }
            Command::Observe { node, observer } => match self.nodes.get(&node) {
                Some(proxy) => {
                    let listener = node_listener(proxy, observer, &self.events);
                    self.observers.insert(
                        observer,
                        Observer::Node {
                            _listener: listener,
                            _proxy: None,
                        },
                    );
                }
                None => warn!(%node, "Observe on unknown node"),
            },
            Command::SubscribeParams { node, kinds } => match self.nodes.get(&node) {
                Some(proxy) => {
                    let ids: Vec<ParamType> = kinds.iter().map(|kind| param_type(*kind)).collect();
                    proxy.subscribe_params(&ids);
                }
                None => warn!(%node, "Subscribe on unknown node"),
            },
            Command::EnumParams { node, kind } => match self.nodes.get(&node) {
                Some(proxy) => proxy.enum_params(0, Some(param_type(kind)), 0, u32::MAX),
                None => warn!(%node, "Enumerate on unknown node"),
            },
            Command::PushParams { node, blob } => {
                if let Err(e) = self.push_params(node, &blob) {
                    warn!(%node, error = %e, "Failed to push props");
                }
            }
            Command::Release(handle) => self.release(handle),
            Command::Quit => {}
        }
    }

    fn open_session(&mut self, session: Handle, connection: Handle, app_name: &str) -> GraphResult<()> {
        let context = Context::new(&self.mainloop)
            .map_err(|e| GraphError::ConnectionFailed(format!("context: {}", e)))?;

        let mut props = pw::properties::Properties::new();
        props.insert(keys::APP_NAME, app_name);
        let core = context
            .connect(Some(props))
            .map_err(|e| GraphError::ConnectionFailed(e.to_string()))?;

        let listener = core
            .add_listener_local()
            .error({
                let events = self.events.clone();
                move |id, seq, res, message| {
                    let _ = events.send(GraphEvent::SessionError {
                        connection,
                        message: format!("{} (id {}, seq {}, res {})", message, id, seq, res),
                    });
                }
            })
            .register();

        debug!(%session, %connection, app_name, "Session opened");
        self.contexts.insert(session, context);
        self.connections.insert(
            connection,
            Connection {
                registry: None,
                _listener: listener,
                core,
            },
        );
        Ok(())
    }

    fn create_stream(
        &mut self,
        connection: Handle,
        stream_handle: Handle,
        observer: Handle,
        spec: &StreamSpec,
    ) -> GraphResult<()> {
        let conn = self
            .connections
            .get(&connection)
            .ok_or(GraphError::UnknownHandle(connection))?;

        let mut props = pw::properties::Properties::new();
        for (key, value) in &spec.properties {
            props.insert(key.as_str(), value.as_str());
        }
        let stream = Stream::new(&conn.core, &spec.name, props)
            .map_err(|e| GraphError::StreamFailed(e.to_string()))?;

        let listener = stream
            .add_local_listener_with_user_data(())
            .state_changed({
                let events = self.events.clone();
                let node_ids = self.node_ids.clone();
                move |stream, _, old, new| {
                    let new = stream_state(new);
                    if new.is_ready() {
                        node_ids.insert(stream_handle, stream.node_id());
                    }
                    let _ = events.send(GraphEvent::StreamState {
                        observer,
                        old: stream_state(old),
                        new,
                    });
                }
            })
            .register()
            .map_err(|e| GraphError::StreamFailed(e.to_string()))?;

        let bytes = pod::serialize(&pod::enum_format_value(&spec.format))?;
        let mut params = [pod::as_pod(&bytes)?];

        let mut flags = StreamFlags::empty();
        if spec.flags.autoconnect {
            flags |= StreamFlags::AUTOCONNECT;
        }
        if spec.flags.map_buffers {
            flags |= StreamFlags::MAP_BUFFERS;
        }

        stream
            .connect(Direction::Output, None, flags, &mut params)
            .map_err(|e| GraphError::StreamFailed(e.to_string()))?;

        debug!(stream = %stream_handle, name = %spec.name, "Stream connecting");
        self.observers.insert(observer, Observer::Stream(listener));
        self.streams.insert(stream_handle, stream);
        Ok(())
    }

    fn bind_node(
        &mut self,
        connection: Handle,
        node_handle: Handle,
        observer: Handle,
        global_id: u32,
    ) -> GraphResult<()> {
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(GraphError::UnknownHandle(connection))?;
        let registry = conn.registry()?;

        let global = GlobalObject {
            id: global_id,
            permissions: pw::permissions::PermissionFlags::R,
            type_: ObjectType::Node,
            version: NODE_VERSION,
            props: None::<&DictRef>,
        };
        let node: Node = registry.bind(&global).map_err(|e| GraphError::BindFailed {
            global_id,
            reason: e.to_string(),
        })?;

        let listener = node_listener(&node, observer, &self.events);
        let proxy = node
            .upcast_ref()
            .add_listener_local()
            .error({
                let events = self.events.clone();
                move |seq, res, message| {
                    let _ = events.send(GraphEvent::BindFailed {
                        observer,
                        global_id,
                        message: format!("{} (seq {}, res {})", message, seq, res),
                    });
                }
            })
            .register();

        debug!(node = %node_handle, global_id, "Node bound");
        self.observers.insert(
            observer,
            Observer::Node {
                _listener: listener,
                _proxy: Some(proxy),
            },
        );
        self.nodes.insert(node_handle, node);
        Ok(())
    }

    fn push_params(&self, node: Handle, blob: &ParamBlob) -> GraphResult<()> {
        let proxy = self
            .nodes
            .get(&node)
            .ok_or(GraphError::UnknownHandle(node))?;
        let bytes = pod::serialize(&pod::props_value(blob))?;
        proxy.set_param(ParamType::Props, 0, pod::as_pod(&bytes)?);
        Ok(())
    }

    fn release(&mut self, handle: Handle) {
        self.node_ids.remove(&handle);

        if self.observers.remove(&handle).is_some() {
            trace!(%handle, "Observer released");
        } else if let Some(stream) = self.streams.remove(&handle) {
            if let Err(e) = stream.disconnect() {
                debug!(%handle, error = %e, "Stream disconnect failed");
            }
            trace!(%handle, "Stream destroyed");
        } else if self.nodes.remove(&handle).is_some() {
            trace!(%handle, "Node proxy released");
        } else if self.connections.remove(&handle).is_some() {
            trace!(%handle, "Connection closed");
        } else if self.contexts.remove(&handle).is_some() {
            trace!(%handle, "Context destroyed");
        } else {
            trace!(%handle, "Release of unknown handle");
        }
    }

    /// Drop everything left, in dependency order
    fn teardown(&mut self) {
        self.observers.clear();
        self.streams.clear();
        self.nodes.clear();
        self.connections.clear();
        self.contexts.clear();
    }
}

/// Attach an info/param listener to `node` that reports as `observer`
fn node_listener(
    node: &Node,
    observer: Handle,
    events: &mpsc::UnboundedSender<GraphEvent>,
) -> NodeListener {
    node.add_listener_local()
        .info({
            let events = events.clone();
            move |info| {
                if let Some(props) = info.props() {
                    let _ = events.send(GraphEvent::NodeInfo {
                        observer,
                        props: properties_from_dict(props),
                    });
                }
            }
        })
        .param({
            let events = events.clone();
            move |_seq, id, _index, _next, param: Option<&Pod>| {
                let Some(param) = param else {
                    return;
                };
                let decoded = match id {
                    ParamType::Format | ParamType::EnumFormat => {
                        pod::parse_format(param).map(|format| format.map(Param::Format))
                    }
                    ParamType::Props => pod::parse_props(param).map(|blob| Some(Param::Props(blob))),
                    other => Ok(Some(Param::Other(other.as_raw()))),
                };
                match decoded {
                    Ok(Some(param)) => {
                        let _ = events.send(GraphEvent::NodeParam { observer, param });
                    }
                    Ok(None) => trace!(%observer, "Non-audio format ignored"),
                    Err(e) => warn!(%observer, error = %e, "Undecodable node param"),
                }
            }
        })
        .register()
}

fn properties_from_dict(dict: &DictRef) -> Properties {
    dict.iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn param_type(kind: ParamKind) -> ParamType {
    match kind {
        ParamKind::Format => ParamType::Format,
        ParamKind::Props => ParamType::Props,
    }
}

fn stream_state(state: pw::stream::StreamState) -> StreamState {
    match state {
        pw::stream::StreamState::Error(message) => StreamState::Error(message),
        pw::stream::StreamState::Unconnected => StreamState::Unconnected,
        pw::stream::StreamState::Connecting => StreamState::Connecting,
        pw::stream::StreamState::Paused => StreamState::Paused,
        pw::stream::StreamState::Streaming => StreamState::Streaming,
    }
}
