//! The [`Node`] type: lifecycle, option staging, send/subscribe, and the
//! glue between the discovery and transport adapters.
//!
//! A node is always handed out as `Arc<Node>`: the background tasks pumping
//! discovery and transport events hold their own clone of that `Arc` as
//! context, rather than a raw pointer back to the node that spawned them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::advertisement;
use crate::discovery::{DiscoveryAdapter, DiscoveryConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::field::{Field, Message};
use crate::matcher::{self, Verdict};
use crate::options::{OptionValue, OptionsStore};
use crate::peer::{DiscoveryEvent, Peer};
use crate::role::{parse_role, Role};
use crate::subscriptions::{Callback, SubscriptionTable, UserData};
use crate::topic;
use crate::transport::{TransportAdapter, TransportEvent};

/// Callback invoked with a discovered or departed peer.
pub type PeerCallback = Arc<dyn Fn(&Node, &Peer, &UserData) + Send + Sync>;
/// Callback invoked with every raw inbound message, regardless of role.
pub type RawMessageCallback = Arc<dyn Fn(&Node, &Message, &UserData) + Send + Sync>;
/// Callback invoked with a discovery- or transport-layer error string.
pub type ErrorCallback = Arc<dyn Fn(&Node, &str, &UserData) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    added: Mutex<Option<(PeerCallback, UserData)>>,
    removed: Mutex<Option<(PeerCallback, UserData)>>,
    message: Mutex<Option<(RawMessageCallback, UserData)>>,
    error: Mutex<Option<(ErrorCallback, UserData)>>,
}

fn name_registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A single publisher, subscriber, requester, replier, or monitor endpoint.
///
/// The options and subscription mutexes are the node's concurrency contract:
/// every field mutation and every dispatch fan-out goes through one of them.
pub struct Node {
    role: Role,
    name: String,
    instance: String,
    options: OptionsStore,
    subscriptions: SubscriptionTable,
    handlers: Handlers,

    transport: Option<TransportAdapter>,
    transport_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    discovery: Mutex<Option<DiscoveryAdapter>>,

    /// Endpoints a REQ node has successfully connected to, in connection
    /// order; `send` targets the first still-tracked one. See DESIGN.md.
    connected_targets: Mutex<Vec<(String, u16)>>,

    background: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    released: AtomicBool,
}

impl Node {
    /// Creates a node of `role` (one of `"pub"`, `"sub"`, `"req"`, `"rep"`,
    /// `"mon"`) with the given, process-unique `name`.
    pub fn create(role: &str, name: impl Into<String>) -> Result<Arc<Node>> {
        let role = parse_role(role)?;
        let name = name.into();

        {
            let mut registry = name_registry().lock();
            if !registry.insert(name.clone()) {
                return Err(Error::new(ErrorKind::DuplicateName(name)));
            }
        }

        let (transport, transport_rx) = if role == Role::Mon {
            (None, None)
        } else {
            let (transport, rx) = TransportAdapter::new();
            (Some(transport), Some(rx))
        };

        log::debug!("created node '{name}' with role {role}");

        Ok(Arc::new(Node {
            role,
            name,
            instance: Uuid::new_v4().to_string(),
            options: OptionsStore::new(),
            subscriptions: SubscriptionTable::new(),
            handlers: Handlers::default(),
            transport,
            transport_rx: Mutex::new(transport_rx),
            discovery: Mutex::new(None),
            connected_targets: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }))
    }

    /// Builds a [`Node`] with no discovery/transport wiring, for unit tests
    /// in sibling modules that need a `&Node` to pass to a callback.
    #[doc(hidden)]
    pub fn new_for_test(role: Role) -> Node {
        Node {
            role,
            name: format!("test-{}", Uuid::new_v4()),
            instance: Uuid::new_v4().to_string(),
            options: OptionsStore::new(),
            subscriptions: SubscriptionTable::new(),
            handlers: Handlers::default(),
            transport: None,
            transport_rx: Mutex::new(None),
            discovery: Mutex::new(None),
            connected_targets: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    /// This node's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// This node's immutable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of this node's current options. Mutate via
    /// [`Node::set_option`] rather than through the returned value.
    pub fn options(&self) -> crate::options::Options {
        self.options.snapshot()
    }

    /// Applies a named option mutation and, on success, refreshes the
    /// advertisement.
    pub fn set_option(&self, name: &str, value: OptionValue) -> Result<()> {
        self.options.set_option(name, value)?;
        self.refresh_advertisement();
        Ok(())
    }

    /// Merges a JSON advertisement override under the generated fields and
    /// refreshes the published advertisement.
    pub fn advertise(&self, advertisement: Json) -> Result<()> {
        self.options.with_mut(|o| o.advertisement = advertisement);
        self.refresh_advertisement();
        Ok(())
    }

    fn refresh_advertisement(&self) {
        let adv = self.options.with(|o| advertisement::with_name(advertisement::build(self.role, o), &self.name));
        if let Some(discovery) = self.discovery.lock().as_ref() {
            discovery.push_advertisement(adv);
        }
    }

    /// Registers the `added` event handler.
    pub fn on_added(&self, f: PeerCallback, user: UserData) {
        *self.handlers.added.lock() = Some((f, user));
    }

    /// Registers the `removed` event handler.
    pub fn on_removed(&self, f: PeerCallback, user: UserData) {
        *self.handlers.removed.lock() = Some((f, user));
    }

    /// Registers the global `message` event handler, invoked with every raw
    /// inbound message ahead of role-specific routing.
    pub fn on_message(&self, f: RawMessageCallback, user: UserData) {
        *self.handlers.message.lock() = Some((f, user));
    }

    /// Registers the `error` event handler.
    pub fn on_error(&self, f: ErrorCallback, user: UserData) {
        *self.handlers.error.lock() = Some((f, user));
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("node '{}': {message}", self.name);
        if let Some((cb, user)) = self.handlers.error.lock().as_ref() {
            cb(self, &message, user);
        }
    }

    /// Registers a subscription under `user_topic`. Only valid for SUB and
    /// REP nodes.
    pub fn subscribe(&self, user_topic: &str, f: Callback, user: UserData) -> Result<()> {
        if !self.role.accepts_subscriptions() {
            return Err(Error::new(ErrorKind::WrongRole(self.role)));
        }
        let fulltopic = self.fulltopic_for_subscription(user_topic);
        self.subscriptions.subscribe(fulltopic, f, user);
        Ok(())
    }

    /// Removes a subscription. Accepts either the raw user topic or the
    /// fulltopic the namer computes from it — see DESIGN.md for why this
    /// implementation resolves the `subscribe`/`unsubscribe` asymmetry by
    /// trying both.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        if !self.role.accepts_subscriptions() {
            return Err(Error::new(ErrorKind::WrongRole(self.role)));
        }
        let fulltopic = self.fulltopic_for_subscription(topic);
        if self.subscriptions.unsubscribe(&fulltopic) {
            return Ok(());
        }
        self.subscriptions.unsubscribe(topic);
        Ok(())
    }

    fn fulltopic_for_subscription(&self, user_topic: &str) -> String {
        match self.role {
            Role::Sub => {
                let namespace = self.options.with(|o| o.namespace.clone());
                topic::pub_sub_fulltopic(namespace.as_deref(), user_topic)
            }
            _ => topic::req_rep_topic(user_topic),
        }
    }

    /// Builds the reply [`Message`] a REP subscription callback returns.
    /// A thin, documented pass-through kept for symmetry with the rest of
    /// the callback-facing API.
    pub fn reply(fields: Message) -> Message {
        fields
    }

    /// Starts the node: binds the transport (PUB/REP) or publishes and
    /// starts discovery immediately (SUB/REQ/MON).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::AlreadyStarted));
        }

        let discovery_config = self.options.with(|o| DiscoveryConfig {
            name: self.name.clone(),
            instance: self.instance.clone(),
            hostname: o.hostname.clone(),
            hello_interval_ms: o.hello_interval_ms,
            check_interval_ms: o.check_interval_ms,
            node_timeout_ms: o.node_timeout_ms,
            master_timeout_ms: o.master_timeout_ms,
            address: o.address.clone(),
            broadcast: o.broadcast,
            multicast: o.multicast.clone(),
            multicast_ttl: o.multicast_ttl,
            reuse_addr: o.reuse_addr,
            unicast: o.unicast.clone(),
            ignore_instance: o.ignore_instance,
            ignore_process: o.ignore_process,
            key: o.key.clone(),
            masters_required: o.masters_required,
            weight: o.weight,
            client: o.client,
        });
        let (discovery, discovery_rx) = DiscoveryAdapter::new(discovery_config);
        *self.discovery.lock() = Some(discovery);

        self.spawn_discovery_pump(discovery_rx);
        if let Some(rx) = self.transport_rx.lock().take() {
            self.spawn_transport_pump(rx);
        }

        if self.role.binds_listener() {
            let transport =
                self.transport.as_ref().expect("emitter roles always have a transport adapter");
            let (address, port) = self.options.with(|o| (o.address.clone(), o.port));
            transport.bind(address.as_deref(), port).await?;
            // The bind pump (spawn_transport_pump) writes the bound port into
            // options and starts discovery once `TransportEvent::Bind` arrives.
        } else {
            self.refresh_advertisement();
            let discovery = self.discovery.lock().clone();
            if let Some(discovery) = discovery {
                discovery.start().await?;
            }
        }

        Ok(())
    }

    /// Holds only a [`Weak`](std::sync::Weak) back to the node, mirroring
    /// the teacher's `session.rs` match-call pump (`Arc::downgrade(&inner)`):
    /// a strong clone here would let the task outlive every other owner of
    /// the node, since the task itself only exits once its sender side
    /// (owned by the node's own `discovery`/`transport` fields) is dropped.
    fn spawn_discovery_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let node = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(node) = node.upgrade() else { return };
                match event {
                    DiscoveryEvent::Added(peer) => node.handle_peer_added(peer).await,
                    DiscoveryEvent::Removed(peer) => node.handle_peer_removed(peer),
                    DiscoveryEvent::Error(message) => node.report_error(message),
                }
            }
        });
        self.background.lock().push(handle);
    }

    fn spawn_transport_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let node = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(node) = node.upgrade() else { return };
                match event {
                    TransportEvent::Bind(port) => {
                        log::debug!("node '{}' bound listener on port {port}", node.name);
                        node.options.set_bound_port(port);
                        node.refresh_advertisement();
                        // Clone the adapter out from under the lock first: holding
                        // the `parking_lot::MutexGuard` across `.await` would make
                        // this spawned future non-`Send`.
                        let discovery = node.discovery.lock().clone();
                        if let Some(discovery) = discovery {
                            if let Err(err) = discovery.start().await {
                                node.report_error(err.to_string());
                            }
                        }
                    }
                    TransportEvent::Message(message, reply_slot) => {
                        let reply = node.route_inbound(message);
                        reply_slot.reply(reply);
                    }
                    TransportEvent::Error(message) => node.report_error(message),
                }
            }
        });
        self.background.lock().push(handle);
    }

    async fn handle_peer_added(self: &Arc<Self>, peer: Peer) {
        let namespace = self.options.with(|o| o.namespace.clone());
        if matcher::check_advertisement(self.role, &peer, namespace.as_deref()) != Verdict::Accepted {
            log::trace!("node '{}' rejected peer {}", self.name, peer.instance);
            return;
        }

        if self.role.connects_to_peers() {
            let opts = self.options.snapshot();
            let Some(target) = matcher::connect_target(self.role, &opts, &peer) else {
                log::trace!("node '{}' found no topic match for peer {}", self.name, peer.instance);
                return;
            };
            let transport = self.transport.as_ref().expect("consumer roles always have a transport adapter");
            if transport.is_connected(&target.host, target.port).await {
                log::trace!("node '{}' already connected to {}:{}", self.name, target.host, target.port);
                return;
            }
            match transport.connect(&target.host, target.port).await {
                Ok(()) => {
                    log::debug!("node '{}' connected to {}:{}", self.name, target.host, target.port);
                    self.connected_targets.lock().push((target.host, target.port));
                }
                Err(err) => {
                    self.report_error(format!("connect to {}:{} failed: {err}", target.host, target.port));
                    return;
                }
            }
        }

        if let Some((cb, user)) = self.handlers.added.lock().as_ref() {
            cb(self, &peer, user);
        }
    }

    fn handle_peer_removed(self: &Arc<Self>, peer: Peer) {
        let namespace = self.options.with(|o| o.namespace.clone());
        if matcher::check_advertisement(self.role, &peer, namespace.as_deref()) != Verdict::Accepted {
            return;
        }
        if let Some(port) = peer.advertised_port() {
            let host = peer.connect_host(self.options.with(|o| o.use_host_names)).to_string();
            self.connected_targets.lock().retain(|(h, p)| !(h == &host && *p == port));
        }
        if let Some((cb, user)) = self.handlers.removed.lock().as_ref() {
            cb(self, &peer, user);
        }
    }

    /// Routes one inbound AMP message, returning the reply (if any) the
    /// transport should send back on the same connection.
    fn route_inbound(self: &Arc<Self>, message: Message) -> Option<Message> {
        if message.is_empty() {
            log::trace!("node '{}' dropped an empty message", self.name);
            return None;
        }

        if let Some((cb, user)) = self.handlers.message.lock().as_ref() {
            cb(self, &message, user);
        }

        match self.role {
            Role::Sub => {
                let mut message = message;
                let Some(Field::Str(fulltopic)) = message.0.first().cloned() else {
                    log::trace!("node '{}' dropped a non-string-topic SUB message", self.name);
                    return None;
                };
                message.0.remove(0);
                let namespace = self.options.with(|o| o.namespace.clone());
                let stripped = topic::strip_pub_sub_fulltopic(namespace.as_deref(), &fulltopic).to_string();
                // SUB callbacks' return value is discarded; only REP replies.
                self.subscriptions.dispatch(self, &fulltopic, &stripped, &message);
                None
            }
            Role::Rep => {
                let mut message = message;
                let Some(Field::Json(mut value)) = message.0.first().cloned() else {
                    log::trace!("node '{}' dropped a non-JSON REP message", self.name);
                    return None;
                };
                let Some(user_topic) = value.as_object_mut().and_then(|o| o.remove("type")).and_then(|v| {
                    if let Json::String(s) = v {
                        Some(s)
                    } else {
                        None
                    }
                }) else {
                    log::trace!("node '{}' dropped a REP message with no \"type\"", self.name);
                    return None;
                };
                message.0[0] = Field::Json(value);
                self.subscriptions.dispatch(self, &user_topic, &user_topic, &message)
            }
            Role::Pub | Role::Req | Role::Mon => None,
        }
    }

    /// Sends `message` on `topic`. Only valid for PUB, which broadcasts to
    /// every connected subscriber; REQ should use
    /// [`Node::request`](Self::request) instead.
    pub async fn send(&self, topic_name: &str, message: Message) -> Result<()> {
        if self.role != Role::Pub {
            return Err(Error::new(ErrorKind::WrongRole(self.role)));
        }
        let transport = self.transport.as_ref().expect("PUB nodes always have a transport adapter");
        let namespace = self.options.with(|o| o.namespace.clone());
        let fulltopic = topic::pub_sub_fulltopic(namespace.as_deref(), topic_name);

        let mut framed = Message::new().push(fulltopic);
        framed.0.extend(message.0);

        for (host, port, err) in transport.broadcast(&framed).await {
            self.report_error(format!("send to {host}:{port} failed: {err}"));
        }
        Ok(())
    }

    /// Sends a JSON request on `topic` to the first connected replier and
    /// awaits its reply for up to `timeout_ms`. Only valid for REQ.
    pub async fn request(&self, topic_name: &str, body: Json, timeout_ms: u64) -> Result<Message> {
        if self.role != Role::Req {
            return Err(Error::new(ErrorKind::WrongRole(self.role)));
        }
        let transport = self.transport.as_ref().expect("REQ nodes always have a transport adapter");
        let (host, port) = self
            .connected_targets
            .lock()
            .first()
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::Internal("no connected replier".into())))?;

        let mut object = match body {
            Json::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        object.insert("type".into(), Json::String(topic_name.to_string()));
        let request = Message::new().push(Field::Json(Json::Object(object)));

        transport.send_and_await_reply(&host, port, &request, timeout_ms).await
    }

    /// Tears down the node: stops discovery, shuts down the transport
    /// adapter's listener and connections, aborts background pumps, and
    /// clears the subscription table. Idempotent and safe to call more than
    /// once or on a node that was never started.
    pub async fn release(self: &Arc<Self>) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("releasing node '{}'", self.name);
        let discovery = self.discovery.lock().take();
        if let Some(discovery) = discovery {
            discovery.stop().await;
        }
        if let Some(transport) = self.transport.as_ref() {
            transport.shutdown().await;
        }
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.subscriptions.clear();
        name_registry().lock().remove(&self.name);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Best-effort synchronous half of release() for callers that forgot
        // to await it: frees the name so a future `create` can reuse it,
        // drops any callbacks the subscription table still holds, and aborts
        // the discovery/transport pump tasks the same way the teacher's
        // `SessionInner::drop` aborts its D-Bus task (`session.rs`) —
        // `JoinHandle::abort` is synchronous and needs no `.await`. Actually
        // tearing down the discovery socket and transport connections still
        // requires `release().await`, since that's async; this only stops
        // the pumps from holding the node's fields open.
        name_registry().lock().remove(&self.name);
        self.subscriptions.clear();
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
    }
}
