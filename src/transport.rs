//! Transport adapter: AMP-over-TCP connection management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::amp;
use crate::error::{Error, ErrorKind, Result};
use crate::field::Message;

/// Events the transport adapter reports to the node.
pub enum TransportEvent {
    /// The listener bound successfully; carries the OS-assigned port.
    Bind(u16),
    /// A framed message arrived on some connection; the returned reply (if
    /// any) is sent back on the same connection.
    Message(Message, ReplySlot),
    /// A connect, accept, or I/O error.
    Error(String),
}

/// A one-shot slot the router fills with the reply to send back, if any.
///
/// Dropping without filling it sends no reply — the SUB and no-op REP cases.
pub struct ReplySlot(oneshot::Sender<Option<Message>>);

impl ReplySlot {
    pub fn reply(self, message: Option<Message>) {
        let _ = self.0.send(message);
    }
}

/// The (host, port) identity `is_connected` tracks, matching whatever the
/// node used to connect or accept.
type Endpoint = (String, u16);

struct Connection {
    writer: Mutex<WriteHalf<TcpStream>>,
}

struct Inner {
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Mutex<HashMap<Endpoint, Arc<Connection>>>,
    reply_waiters: Mutex<HashMap<Endpoint, oneshot::Sender<Message>>>,
    /// Every background task this adapter has spawned: the listener's accept
    /// loop (if bound) and one read loop per connection. `shutdown` aborts
    /// all of them so nothing keeps accepting or reading after teardown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    async fn is_connected(&self, endpoint: &Endpoint) -> bool {
        self.connections.lock().await.contains_key(endpoint)
    }

    /// If a `send_and_await_reply` call is waiting on this endpoint, hands it
    /// `message` and reports it consumed rather than forwarded to the router.
    async fn deliver_as_reply(&self, endpoint: &Endpoint, message: &Message) -> bool {
        if let Some(tx) = self.reply_waiters.lock().await.remove(endpoint) {
            let _ = tx.send(message.clone());
            true
        } else {
            false
        }
    }
}

/// Wraps AMP-over-TCP: one listener (for PUB/REP) and any number of outbound
/// or inbound connections, each read by its own background task.
#[derive(Clone)]
pub struct TransportAdapter {
    inner: Arc<Inner>,
}

impl TransportAdapter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            events: tx,
            connections: Mutex::new(HashMap::new()),
            reply_waiters: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        });
        (Self { inner }, rx)
    }

    /// Binds a TCP listener on `port` (0 = OS-assigned) and spawns the accept
    /// loop. Fires [`TransportEvent::Bind`] once bound.
    pub async fn bind(&self, address: Option<&str>, port: u16) -> Result<()> {
        let bind_addr = format!("{}:{port}", address.unwrap_or("0.0.0.0"));
        let listener = TcpListener::bind(&bind_addr).await?;
        let bound_port = listener.local_addr()?.port();
        let _ = self.inner.events.send(TransportEvent::Bind(bound_port));

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let endpoint = (addr.ip().to_string(), addr.port());
                        register_connection(inner.clone(), stream, endpoint).await;
                    }
                    Err(err) => {
                        let _ = inner.events.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
            }
        });
        self.inner.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Aborts the listener's accept loop and every connection's read loop,
    /// and forgets all tracked connections. Idempotent.
    pub async fn shutdown(&self) {
        for handle in self.inner.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.inner.connections.lock().await.clear();
    }

    /// Whether a connection to `host:port` is already open. Must be
    /// idempotent so the peer matcher never opens a second connection to the
    /// same endpoint.
    pub async fn is_connected(&self, host: &str, port: u16) -> bool {
        self.inner.is_connected(&(host.to_string(), port)).await
    }

    /// Dials out to `host:port`, spawning a reader task on success.
    ///
    /// A no-op if already connected, matching the idempotence the peer
    /// matcher relies on to avoid duplicate connections.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let endpoint = (host.to_string(), port);
        if self.inner.is_connected(&endpoint).await {
            return Ok(());
        }
        let stream = TcpStream::connect((host, port)).await?;
        register_connection(self.inner.clone(), stream, endpoint).await;
        Ok(())
    }

    /// Sends `message` on the connection to `host:port`, without awaiting a reply.
    pub async fn send(&self, host: &str, port: u16, message: &Message) -> Result<()> {
        let conn = self.connection_for(host, port).await?;
        let mut writer = conn.writer.lock().await;
        amp::write_message(&mut *writer, message).await
    }

    /// Sends `message` and awaits a correlated reply for up to `timeout_ms`.
    ///
    /// AMP carries no correlation id; pairing relies on the REQ role issuing
    /// at most one outstanding request per connection at a time.
    pub async fn send_and_await_reply(
        &self,
        host: &str,
        port: u16,
        message: &Message,
        timeout_ms: u64,
    ) -> Result<Message> {
        let endpoint = (host.to_string(), port);
        let conn = self.connection_for(host, port).await?;

        let (tx, rx) = oneshot::channel();
        self.inner.reply_waiters.lock().await.insert(endpoint.clone(), tx);

        let mut writer = conn.writer.lock().await;
        if let Err(err) = amp::write_message(&mut *writer, message).await {
            self.inner.reply_waiters.lock().await.remove(&endpoint);
            return Err(err);
        }
        drop(writer);

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::new(ErrorKind::Internal("connection closed awaiting reply".into()))),
            Err(_) => {
                self.inner.reply_waiters.lock().await.remove(&endpoint);
                Err(Error::new(ErrorKind::Timeout))
            }
        }
    }

    /// Sends `message` to every currently open connection (PUB's fan-out send).
    ///
    /// Per-connection write failures are collected rather than aborting the
    /// whole broadcast early; the caller (the node's router) forwards each
    /// one to the user `error` callback.
    pub async fn broadcast(&self, message: &Message) -> Vec<(String, u16, Error)> {
        let conns: Vec<(Endpoint, Arc<Connection>)> =
            self.inner.connections.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut errors = Vec::new();
        for ((host, port), conn) in conns {
            let mut writer = conn.writer.lock().await;
            if let Err(err) = amp::write_message(&mut *writer, message).await {
                errors.push((host, port, err));
            }
        }
        errors
    }

    async fn connection_for(&self, host: &str, port: u16) -> Result<Arc<Connection>> {
        self.inner
            .connections
            .lock()
            .await
            .get(&(host.to_string(), port))
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::Internal(format!("not connected to {host}:{port}"))))
    }
}

/// Registers `stream` under `endpoint` and spawns its read loop.
///
/// The insert is awaited directly (the caller is always already in an async
/// context) so a `send` issued right after `connect` returns never races the
/// reader task's own bookkeeping.
async fn register_connection(inner: Arc<Inner>, stream: TcpStream, endpoint: Endpoint) {
    let (reader, writer) = tokio::io::split(stream);
    let connection = Arc::new(Connection { writer: Mutex::new(writer) });
    inner.connections.lock().await.insert(endpoint.clone(), connection);
    let handle = tokio::spawn(read_loop(inner.clone(), reader, endpoint));
    inner.tasks.lock().await.push(handle);
}

async fn read_loop(inner: Arc<Inner>, mut reader: ReadHalf<TcpStream>, endpoint: Endpoint) {
    loop {
        match amp::read_message(&mut reader).await {
            Ok(Some(message)) => {
                if inner.deliver_as_reply(&endpoint, &message).await {
                    continue;
                }
                let (tx, rx) = oneshot::channel();
                if inner.events.send(TransportEvent::Message(message, ReplySlot(tx))).is_err() {
                    break;
                }
                if let Ok(Some(reply)) = rx.await {
                    if let Some(conn) = inner.connections.lock().await.get(&endpoint).cloned() {
                        let mut writer = conn.writer.lock().await;
                        let _ = amp::write_message(&mut *writer, &reply).await;
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = inner.events.send(TransportEvent::Error(err.to_string()));
                break;
            }
        }
    }
    inner.connections.lock().await.remove(&endpoint);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_fires_bind_event_with_os_assigned_port() {
        let (transport, mut events) = TransportAdapter::new();
        transport.bind(Some("127.0.0.1"), 0).await.unwrap();
        match events.recv().await.unwrap() {
            TransportEvent::Bind(port) => assert_ne!(port, 0),
            _ => panic!("expected Bind"),
        }
    }

    #[tokio::test]
    async fn connect_then_send_delivers_a_message_event() {
        let (server, mut server_events) = TransportAdapter::new();
        server.bind(Some("127.0.0.1"), 0).await.unwrap();
        let port = match server_events.recv().await.unwrap() {
            TransportEvent::Bind(p) => p,
            _ => panic!("expected Bind"),
        };

        let (client, _client_events) = TransportAdapter::new();
        client.connect("127.0.0.1", port).await.unwrap();
        assert!(client.is_connected("127.0.0.1", port).await);

        client.send("127.0.0.1", port, &Message::new().push("hello")).await.unwrap();

        match server_events.recv().await.unwrap() {
            TransportEvent::Message(msg, reply) => {
                assert_eq!(msg.first().and_then(|f| f.as_str()), Some("hello"));
                reply.reply(None);
            }
            _ => panic!("expected Message"),
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_every_connected_peer() {
        let (server, mut server_events) = TransportAdapter::new();
        server.bind(Some("127.0.0.1"), 0).await.unwrap();
        let port = match server_events.recv().await.unwrap() {
            TransportEvent::Bind(p) => p,
            _ => panic!("expected Bind"),
        };

        let (client_a, _a_events) = TransportAdapter::new();
        let (client_b, _b_events) = TransportAdapter::new();
        client_a.connect("127.0.0.1", port).await.unwrap();
        client_b.connect("127.0.0.1", port).await.unwrap();

        // Let the server accept both before broadcasting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let errors = server.broadcast(&Message::new().push("hello")).await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn send_and_await_reply_times_out_without_a_reply() {
        let (server, mut server_events) = TransportAdapter::new();
        server.bind(Some("127.0.0.1"), 0).await.unwrap();
        let port = match server_events.recv().await.unwrap() {
            TransportEvent::Bind(p) => p,
            _ => panic!("expected Bind"),
        };

        let (client, _client_events) = TransportAdapter::new();
        client.connect("127.0.0.1", port).await.unwrap();

        tokio::spawn(async move {
            if let TransportEvent::Message(_, reply) = server_events.recv().await.unwrap() {
                reply.reply(None); // never fulfilled as a reply on the client side
            }
        });

        let err = client
            .send_and_await_reply("127.0.0.1", port, &Message::new().push("ping"), 50)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_and_forgets_connections() {
        let (server, mut server_events) = TransportAdapter::new();
        server.bind(Some("127.0.0.1"), 0).await.unwrap();
        let port = match server_events.recv().await.unwrap() {
            TransportEvent::Bind(p) => p,
            _ => panic!("expected Bind"),
        };

        let (client, _client_events) = TransportAdapter::new();
        client.connect("127.0.0.1", port).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        server.shutdown().await;
        assert!(server.inner.connections.lock().await.is_empty());

        // The accept loop was aborted, so a fresh connection attempt never
        // gets a peer on the other end.
        let (late_client, _late_events) = TransportAdapter::new();
        let result =
            tokio::time::timeout(Duration::from_millis(200), late_client.connect("127.0.0.1", port)).await;
        assert!(result.is_err() || result.unwrap().is_err());
    }
}
