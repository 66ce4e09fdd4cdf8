//! Exercises the AMP-over-TCP transport adapter through the public
//! `axon::wire` surface, independent of discovery or the `Node` router.

use axon::wire::TransportAdapter;
use axon::{Field, Message};

fn init_logging() {
    let _ = env_logger::try_init();
}

#[tokio::test]
async fn connect_then_send_is_observed_as_a_message_event() {
    init_logging();
    let (server, mut server_events) = TransportAdapter::new();
    server.bind(Some("127.0.0.1"), 0).await.unwrap();
    let port = match server_events.recv().await.unwrap() {
        axon::wire::TransportEvent::Bind(port) => port,
        _ => panic!("expected Bind"),
    };

    let (client, _client_events) = TransportAdapter::new();
    client.connect("127.0.0.1", port).await.unwrap();
    assert!(client.is_connected("127.0.0.1", port).await);

    let message = Message::new().push("hello").push(Field::Int(7));
    client.send("127.0.0.1", port, &message).await.unwrap();

    match server_events.recv().await.unwrap() {
        axon::wire::TransportEvent::Message(received, reply) => {
            assert_eq!(received, message);
            reply.reply(None);
        }
        _ => panic!("expected Message"),
    }
}

#[tokio::test]
async fn send_and_await_reply_round_trips_through_the_connection() {
    init_logging();
    let (server, mut server_events) = TransportAdapter::new();
    server.bind(Some("127.0.0.1"), 0).await.unwrap();
    let port = match server_events.recv().await.unwrap() {
        axon::wire::TransportEvent::Bind(port) => port,
        _ => panic!("expected Bind"),
    };

    tokio::spawn(async move {
        match server_events.recv().await.unwrap() {
            axon::wire::TransportEvent::Message(_request, reply) => {
                reply.reply(Some(Message::new().push("pong")));
            }
            _ => panic!("expected Message"),
        }
    });

    let (client, _client_events) = TransportAdapter::new();
    client.connect("127.0.0.1", port).await.unwrap();
    let request = Message::new().push("ping");
    let reply = client.send_and_await_reply("127.0.0.1", port, &request, 1_000).await.unwrap();
    assert_eq!(reply.first().and_then(Field::as_str), Some("pong"));
}

#[tokio::test]
async fn send_and_await_reply_times_out_when_nobody_answers() {
    init_logging();
    // A listener that accepts the connection but never drains its event
    // stream, so the request arrives and is never replied to.
    let (server, mut server_events) = TransportAdapter::new();
    server.bind(Some("127.0.0.1"), 0).await.unwrap();
    let port = match server_events.recv().await.unwrap() {
        axon::wire::TransportEvent::Bind(port) => port,
        _ => panic!("expected Bind"),
    };

    let (client, _client_events) = TransportAdapter::new();
    client.connect("127.0.0.1", port).await.unwrap();
    let request = Message::new().push("ping");
    let result = client.send_and_await_reply("127.0.0.1", port, &request, 50).await;
    assert_eq!(result.unwrap_err().kind, axon::ErrorKind::Timeout);
}
