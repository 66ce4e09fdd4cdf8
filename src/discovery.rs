//! Discovery adapter: the UDP hello-beacon protocol.
//!
//! Generalizes a gossip-cluster beacon's socket setup down to a simpler
//! hello/added/removed contract: broadcast or multicast a periodic hello,
//! track peers by instance id, and age them out on a timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value as Json};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::error::{Error, ErrorKind, Result};
use crate::peer::{DiscoveryEvent, Peer};

/// Fallback UDP port the discovery beacon binds to when `options.port` (the
/// transport's TCP listener) leaves no other convention to follow.
///
/// Not part of the public advertisement schema; only discovery datagrams use
/// it. See DESIGN.md for why a fixed port was chosen over a pure-multicast
/// rendezvous.
pub const DEFAULT_DISCOVERY_PORT: u16 = 50692;

const RECV_BUFFER_LEN: usize = 64 * 1024;

struct TrackedPeer {
    peer: Peer,
    first_seen: Instant,
    last_seen: Instant,
    confirmed: bool,
}

struct Inner {
    name: String,
    instance: String,
    hostname: Option<String>,
    hello_interval: Duration,
    check_interval: Duration,
    node_timeout: Duration,
    master_timeout: Duration,
    bind_addr: SocketAddr,
    broadcast: bool,
    multicast: Option<String>,
    multicast_ttl: u32,
    reuse_addr: bool,
    /// Explicit peer addresses to hello directly, in addition to
    /// broadcast/multicast — for segments where those don't reach (e.g. a
    /// sandboxed test network), per the `unicast` option.
    unicast_targets: Vec<SocketAddr>,
    ignore_instance: bool,
    ignore_process: bool,
    /// Discovery-segment key: hellos from a peer advertising a different
    /// `key` are dropped before they're ever tracked, so two otherwise
    /// identical networks sharing a broadcast domain stay invisible to each
    /// other. Distinct from [`crate::options::WIRE_KEY`], the fixed `"$$"`
    /// the peer matcher checks on the *messaging* advertisement.
    key: String,
    masters_required: u32,
    weight: i64,
    client: bool,
    pid: u32,
    advertisement: parking_lot::Mutex<Json>,
    peers: tokio::sync::Mutex<HashMap<String, TrackedPeer>>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Configuration the adapter needs at construction time, lifted from a
/// [`crate::options::Options`] snapshot by the node.
pub struct DiscoveryConfig {
    pub name: String,
    pub instance: String,
    pub hostname: Option<String>,
    pub hello_interval_ms: u64,
    pub check_interval_ms: u64,
    pub node_timeout_ms: u64,
    pub master_timeout_ms: u64,
    pub address: Option<String>,
    pub broadcast: bool,
    pub multicast: Option<String>,
    pub multicast_ttl: u32,
    pub reuse_addr: bool,
    /// Comma-separated `host[:port]` peer list; `:port` defaults to
    /// [`DEFAULT_DISCOVERY_PORT`].
    pub unicast: Option<String>,
    pub ignore_instance: bool,
    pub ignore_process: bool,
    /// Discovery-segment key: hellos from a peer advertising a different
    /// key are dropped before they're tracked. Distinct from the fixed
    /// `"$$"` wire key the peer matcher checks on the messaging
    /// advertisement.
    pub key: String,
    pub masters_required: u32,
    pub weight: i64,
    pub client: bool,
}

/// Parses the `unicast` option's `"host1,host2:port2"` syntax into concrete
/// socket addresses, skipping entries that don't parse rather than failing
/// the whole node (malformed input here isn't worth rejecting `start`).
fn parse_unicast_targets(spec: Option<&str>) -> Vec<SocketAddr> {
    let Some(spec) = spec else { return Vec::new() };
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            if let Ok(addr) = entry.parse::<SocketAddr>() {
                return Some(addr);
            }
            format!("{entry}:{DEFAULT_DISCOVERY_PORT}").parse().ok()
        })
        .collect()
}

/// Runs the hello-beacon protocol on a background task and reports peer
/// churn as [`DiscoveryEvent`]s.
///
/// Cheap to clone; every clone shares the same background task and peer
/// table through the inner `Arc`.
#[derive(Clone)]
pub struct DiscoveryAdapter {
    inner: Arc<Inner>,
}

impl DiscoveryAdapter {
    /// Builds an adapter and its event receiver. Does not bind a socket or
    /// start the background task; call [`start`](Self::start) for that.
    pub fn new(config: DiscoveryConfig) -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bind_ip = config.address.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let bind_addr: SocketAddr = format!("{bind_ip}:{DEFAULT_DISCOVERY_PORT}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], DEFAULT_DISCOVERY_PORT)));

        let inner = Arc::new(Inner {
            name: config.name,
            instance: config.instance,
            hostname: config.hostname,
            hello_interval: Duration::from_millis(config.hello_interval_ms),
            check_interval: Duration::from_millis(config.check_interval_ms),
            node_timeout: Duration::from_millis(config.node_timeout_ms),
            master_timeout: Duration::from_millis(config.master_timeout_ms),
            bind_addr,
            broadcast: config.broadcast,
            multicast: config.multicast,
            multicast_ttl: config.multicast_ttl,
            reuse_addr: config.reuse_addr,
            unicast_targets: parse_unicast_targets(config.unicast.as_deref()),
            ignore_instance: config.ignore_instance,
            ignore_process: config.ignore_process,
            key: config.key,
            masters_required: config.masters_required,
            weight: config.weight,
            client: config.client,
            pid: std::process::id(),
            advertisement: parking_lot::Mutex::new(Json::Object(Default::default())),
            peers: tokio::sync::Mutex::new(HashMap::new()),
            events: tx,
            task: tokio::sync::Mutex::new(None),
        });
        (Self { inner }, rx)
    }

    /// Replaces the advertisement payload sent with every future hello.
    pub fn push_advertisement(&self, advertisement: Json) {
        *self.inner.advertisement.lock() = advertisement;
    }

    /// Binds the hello-beacon socket and spawns the send/receive/sweep loop.
    pub async fn start(&self) -> Result<()> {
        let socket = bind_hello_socket(&self.inner)?;
        let socket = Arc::new(socket);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = run_loop(inner.clone(), socket).await {
                let _ = inner.events.send(DiscoveryEvent::Error(err.to_string()));
            }
        });
        *self.inner.task.lock().await = Some(handle);
        Ok(())
    }

    /// Aborts the background task. Idempotent.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.task.lock().await.take() {
            handle.abort();
        }
    }
}

/// Builds the hello-beacon socket with `socket2` rather than
/// `std::net::UdpSocket::bind`, since setting `SO_REUSEADDR` before bind (so
/// several axon nodes in the same process, or across short-lived restarts,
/// can share the discovery port per the `reuseAddr` option) has no stable
/// equivalent on the plain std socket type.
fn bind_hello_socket(inner: &Inner) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(inner.reuse_addr)?;
    #[cfg(not(target_os = "windows"))]
    if inner.reuse_addr {
        socket.set_reuse_port(true)?;
    }
    if inner.broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&inner.bind_addr.into())?;

    if let Some(group) = &inner.multicast {
        let group: std::net::Ipv4Addr = group
            .parse()
            .map_err(|_| Error::new(ErrorKind::InvalidOptionValue("multicast".into())))?;
        socket.join_multicast_v4(&group, &std::net::Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(inner.multicast_ttl)?;
    }
    Ok(UdpSocket::from_std(socket.into())?)
}

async fn run_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>) -> Result<()> {
    let mut hello_tick = interval(inner.hello_interval);
    let mut check_tick = interval(inner.check_interval);
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        tokio::select! {
            _ = hello_tick.tick() => {
                send_hello(&inner, &socket).await;
            }
            _ = check_tick.tick() => {
                sweep_peers(&inner).await;
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => handle_hello(&inner, &buf[..len], from).await,
                    Err(err) => { let _ = inner.events.send(DiscoveryEvent::Error(err.to_string())); }
                }
            }
        }
    }
}

async fn send_hello(inner: &Inner, socket: &UdpSocket) {
    let advertisement = inner.advertisement.lock().clone();
    let datagram = json!({
        "name": inner.name,
        "instance": inner.instance,
        "hostname": inner.hostname,
        "pid": inner.pid,
        "key": inner.key,
        "mastersRequired": inner.masters_required,
        "weight": inner.weight,
        "client": inner.client,
        "advertisement": advertisement,
    });
    let Ok(bytes) = serde_json::to_vec(&datagram) else { return };

    if inner.broadcast || inner.multicast.is_some() {
        let destination: SocketAddr = if let Some(group) = &inner.multicast {
            format!("{group}:{DEFAULT_DISCOVERY_PORT}").parse().unwrap_or(inner.bind_addr)
        } else {
            SocketAddr::from(([255, 255, 255, 255], DEFAULT_DISCOVERY_PORT))
        };
        if let Err(err) = socket.send_to(&bytes, destination).await {
            let _ = inner.events.send(DiscoveryEvent::Error(err.to_string()));
        }
    }

    for target in &inner.unicast_targets {
        if let Err(err) = socket.send_to(&bytes, target).await {
            let _ = inner.events.send(DiscoveryEvent::Error(err.to_string()));
        }
    }
}

async fn handle_hello(inner: &Inner, datagram: &[u8], from: SocketAddr) {
    let Ok(value) = serde_json::from_slice::<Json>(datagram) else { return };
    let Some(instance) = value.get("instance").and_then(Json::as_str) else { return };

    let peer_key = value.get("key").and_then(Json::as_str).unwrap_or("");
    if peer_key != inner.key {
        return;
    }

    if inner.ignore_instance && instance == inner.instance {
        return;
    }
    if inner.ignore_process {
        if let Some(pid) = value.get("pid").and_then(Json::as_u64) {
            if pid == inner.pid as u64 && from.ip() == inner.bind_addr.ip() {
                return;
            }
        }
    }

    let peer = Peer {
        instance: instance.to_string(),
        address: from.ip().to_string(),
        hostname: value.get("hostname").and_then(Json::as_str).map(str::to_string),
        advertisement: value.get("advertisement").cloned(),
    };

    let now = Instant::now();
    let mut peers = inner.peers.lock().await;
    match peers.get_mut(instance) {
        Some(tracked) => {
            tracked.peer = peer;
            tracked.last_seen = now;
        }
        None => {
            peers.insert(
                instance.to_string(),
                TrackedPeer { peer, first_seen: now, last_seen: now, confirmed: false },
            );
        }
    }
}

async fn sweep_peers(inner: &Inner) {
    let now = Instant::now();
    let mut peers = inner.peers.lock().await;
    let mut added = Vec::new();
    let mut removed = Vec::new();

    peers.retain(|_, tracked| {
        if now.duration_since(tracked.last_seen) >= inner.node_timeout {
            if tracked.confirmed {
                removed.push(tracked.peer.clone());
            }
            return false;
        }
        if !tracked.confirmed && now.duration_since(tracked.first_seen) >= inner.master_timeout {
            tracked.confirmed = true;
            added.push(tracked.peer.clone());
        }
        true
    });
    drop(peers);

    for peer in added {
        let _ = inner.events.send(DiscoveryEvent::Added(peer));
    }
    for peer in removed {
        let _ = inner.events.send(DiscoveryEvent::Removed(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            name: "n".into(),
            instance: "self-instance".into(),
            hostname: Some("h".into()),
            hello_interval_ms: 50,
            check_interval_ms: 50,
            node_timeout_ms: 200,
            master_timeout_ms: 0,
            address: Some("127.0.0.1".into()),
            broadcast: false,
            multicast: None,
            multicast_ttl: 1,
            reuse_addr: true,
            unicast: None,
            ignore_instance: true,
            ignore_process: true,
            key: String::new(),
            masters_required: 0,
            weight: 0,
            client: false,
        }
    }

    #[tokio::test]
    async fn self_hello_is_ignored_by_instance() {
        let (adapter, _rx) = DiscoveryAdapter::new(test_config());
        handle_hello(
            &adapter.inner,
            br#"{"instance":"self-instance","advertisement":{}}"#,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await;
        assert!(adapter.inner.peers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn hello_with_a_different_discovery_key_is_never_tracked() {
        let mut config = test_config();
        config.key = "segment-a".into();
        let (adapter, _rx) = DiscoveryAdapter::new(config);
        handle_hello(
            &adapter.inner,
            br#"{"instance":"other","key":"segment-b","advertisement":{"port":9}}"#,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await;
        assert!(adapter.inner.peers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn hello_with_the_same_discovery_key_is_tracked() {
        let mut config = test_config();
        config.key = "segment-a".into();
        let (adapter, _rx) = DiscoveryAdapter::new(config);
        handle_hello(
            &adapter.inner,
            br#"{"instance":"other","key":"segment-a","advertisement":{"port":9}}"#,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await;
        assert!(adapter.inner.peers.lock().await.contains_key("other"));
    }

    #[tokio::test]
    async fn fresh_peer_is_tracked_but_not_yet_confirmed() {
        let (adapter, _rx) = DiscoveryAdapter::new(test_config());
        handle_hello(
            &adapter.inner,
            br#"{"instance":"other","hostname":"oh","advertisement":{"port":9}}"#,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await;
        let peers = adapter.inner.peers.lock().await;
        assert!(!peers.get("other").unwrap().confirmed);
    }

    #[tokio::test]
    async fn sweep_confirms_after_master_timeout_elapses() {
        let (adapter, mut rx) = DiscoveryAdapter::new(test_config());
        handle_hello(
            &adapter.inner,
            br#"{"instance":"other","advertisement":{"port":9}}"#,
            "127.0.0.1:9".parse().unwrap(),
        )
        .await;
        // master_timeout_ms = 0 in test_config, so the very next sweep confirms it.
        sweep_peers(&adapter.inner).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DiscoveryEvent::Added(p) if p.instance == "other"));
    }

    #[tokio::test]
    async fn stale_confirmed_peer_fires_removed() {
        let (adapter, mut rx) = DiscoveryAdapter::new(test_config());
        {
            let mut peers = adapter.inner.peers.lock().await;
            peers.insert(
                "other".into(),
                TrackedPeer {
                    peer: Peer { instance: "other".into(), address: "a".into(), hostname: None, advertisement: None },
                    first_seen: Instant::now() - Duration::from_secs(10),
                    last_seen: Instant::now() - Duration::from_secs(10),
                    confirmed: true,
                },
            );
        }
        sweep_peers(&adapter.inner).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DiscoveryEvent::Removed(p) if p.instance == "other"));
        assert!(adapter.inner.peers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stale_unconfirmed_peer_never_fires_added() {
        let (adapter, mut rx) = DiscoveryAdapter::new(test_config());
        {
            let mut peers = adapter.inner.peers.lock().await;
            peers.insert(
                "other".into(),
                TrackedPeer {
                    peer: Peer { instance: "other".into(), address: "a".into(), hostname: None, advertisement: None },
                    first_seen: Instant::now() - Duration::from_secs(10),
                    last_seen: Instant::now() - Duration::from_secs(10),
                    confirmed: false,
                },
            );
        }
        sweep_peers(&adapter.inner).await;
        assert!(rx.try_recv().is_err());
    }
}
