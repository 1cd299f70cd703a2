//! End-to-end tests: two channels connected by in-memory endpoints through
//! a shared handle arena.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use txwire::{
    Channel, HandleArena, MemoryEndpoint, Metadata, Role, TransactEndpoint, Transaction,
    TxWireError, FIRST_CALL_ID, STATUS_OK,
};

const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Pair {
    client: Arc<Channel>,
    server: Arc<Channel>,
}

async fn connected_pair() -> Pair {
    let arena = HandleArena::new();
    let client = Channel::new(Role::Client, arena.clone());
    let server = Channel::new(Role::Server, arena.clone());

    let client_endpoint: Arc<MemoryEndpoint> =
        Arc::new(MemoryEndpoint::bind(client.receive_callback()));
    let server_endpoint: Arc<MemoryEndpoint> =
        Arc::new(MemoryEndpoint::bind(server.receive_callback()));
    let client_handle = arena.register(client_endpoint);
    let server_handle = arena.register(server_endpoint.clone());

    let bootstrap: Arc<dyn TransactEndpoint> = server_endpoint;
    let (client_version, server_version) = tokio::join!(
        client.establish(Some(bootstrap), client_handle, ESTABLISH_TIMEOUT),
        server.establish(None, server_handle, ESTABLISH_TIMEOUT),
    );
    assert_eq!(client_version.unwrap(), 1);
    assert_eq!(server_version.unwrap(), 1);

    Pair { client, server }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_round_trip() {
    let pair = connected_pair().await;
    let code = FIRST_CALL_ID;

    let (init_tx, init_rx) = channel();
    let (msg_tx, msg_rx) = channel();
    let (trail_tx, trail_rx) = channel();
    pair.server.receiver().register_initial(
        code,
        Box::new(move |e| {
            init_tx.send(e).ok();
        }),
    );
    pair.server.receiver().register_message(
        code,
        Box::new(move |e| {
            msg_tx.send(e).ok();
        }),
    );
    pair.server.receiver().register_trailing(
        code,
        Box::new(move |e| {
            trail_tx.send(e).ok();
        }),
    );

    let mut request = Transaction::new(code, Role::Client);
    request.set_prefix(
        "Echo",
        vec![(Bytes::from_static(b"k"), Bytes::from_static(b"v"))],
    );
    request.set_message(Bytes::from_static(b"hi"));
    request.set_suffix(Metadata::new());
    pair.client.send(request).unwrap();

    let initial = init_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(initial.route.as_deref(), Some("Echo"));
    assert_eq!(
        initial.metadata,
        vec![(Bytes::from_static(b"k"), Bytes::from_static(b"v"))]
    );
    let request_body = msg_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(request_body, Bytes::from_static(b"hi"));
    let request_end = trail_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(request_end.status, STATUS_OK);

    // Server answers in three logical transactions: prefix, echoed body,
    // suffix with status.
    let (init_tx, init_rx) = channel();
    let (msg_tx, msg_rx) = channel();
    let (trail_tx, trail_rx) = channel();
    pair.client.receiver().register_initial(
        code,
        Box::new(move |e| {
            init_tx.send(e).ok();
        }),
    );
    pair.client.receiver().register_message(
        code,
        Box::new(move |e| {
            msg_tx.send(e).ok();
        }),
    );
    pair.client.receiver().register_trailing(
        code,
        Box::new(move |e| {
            trail_tx.send(e).ok();
        }),
    );

    let mut head = Transaction::new(code, Role::Server);
    head.set_prefix("", Metadata::new());
    pair.server.send(head).unwrap();
    let mut body = Transaction::new(code, Role::Server);
    body.set_message(request_body);
    pair.server.send(body).unwrap();
    let mut end = Transaction::new(code, Role::Server);
    end.set_suffix(vec![(Bytes::from_static(b"t"), Bytes::from_static(b"1"))]);
    end.set_status(STATUS_OK);
    pair.server.send(end).unwrap();

    let initial = init_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(initial.route, None);
    assert_eq!(
        msg_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap(),
        Bytes::from_static(b"hi")
    );
    let trailing = trail_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(trailing.status, STATUS_OK);
    assert_eq!(
        trailing.metadata,
        vec![(Bytes::from_static(b"t"), Bytes::from_static(b"1"))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_message_crosses_the_flow_control_window() {
    let pair = connected_pair().await;
    let code = FIRST_CALL_ID;

    // Well past the 128 KiB window, so progress requires the automatic
    // byte acknowledgements flowing back.
    let payload: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();

    let (trail_tx, trail_rx) = channel();
    pair.server.receiver().register_trailing(
        code,
        Box::new(move |e| {
            trail_tx.send(e).ok();
        }),
    );

    let mut request = Transaction::new(code, Role::Client);
    request.set_prefix("Upload", Metadata::new());
    request.set_message(Bytes::from(payload.clone()));
    request.set_suffix(Metadata::new());
    pair.client.send(request).unwrap();

    // Chunks arrive as individual message events; each consumer is
    // one-shot, so re-register until the payload is complete.
    let (msg_tx, msg_rx) = channel();
    let mut received = Vec::new();
    let mut chunks = 0;
    while received.len() < payload.len() {
        let msg_tx = msg_tx.clone();
        pair.server.receiver().register_message(
            code,
            Box::new(move |e| {
                msg_tx.send(e).ok();
            }),
        );
        let chunk = msg_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap();
        received.extend_from_slice(&chunk);
        chunks += 1;
    }
    assert_eq!(chunks, 19); // ceil(300 KiB / 16 KiB)
    assert_eq!(received, payload);
    assert!(trail_rx.recv_timeout(RECV_TIMEOUT).unwrap().is_ok());

    // The window reopened fully; another stream goes right through.
    let (msg_tx, msg_rx) = channel();
    pair.server.receiver().register_message(
        code + 1,
        Box::new(move |e| {
            msg_tx.send(e).ok();
        }),
    );
    let mut next = Transaction::new(code + 1, Role::Client);
    next.set_message(Bytes::from_static(b"after"));
    pair.client.send(next).unwrap();
    assert_eq!(
        msg_rx.recv_timeout(RECV_TIMEOUT).unwrap().unwrap(),
        Bytes::from_static(b"after")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_succeeds_on_established_channel() {
    let pair = connected_pair().await;
    let first = pair.client.ping().unwrap();
    let second = pair.client.ping().unwrap();
    assert_ne!(first, second);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_teardown_propagates_to_peer() {
    let pair = connected_pair().await;
    pair.client.teardown();

    // Local side refuses immediately.
    let tx = Transaction::new(FIRST_CALL_ID, Role::Client);
    assert!(matches!(
        pair.client.send(tx),
        Err(TxWireError::ChannelClosed)
    ));

    // The SHUTDOWN notice reaches the server asynchronously.
    let mut closed = false;
    for _ in 0..500 {
        let tx = Transaction::new(FIRST_CALL_ID, Role::Server);
        match pair.server.send(tx) {
            Err(TxWireError::ChannelClosed) => {
                closed = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert!(closed, "server never observed the shutdown notice");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_stream_fails_consumers() {
    let pair = connected_pair().await;
    let code = FIRST_CALL_ID;

    let (trail_tx, trail_rx) = channel();
    pair.client.receiver().register_trailing(
        code,
        Box::new(move |e| {
            trail_tx.send(e).ok();
        }),
    );
    pair.client.cancel_stream(code);

    assert!(matches!(
        trail_rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        Err(TxWireError::StreamCancelled(_))
    ));
    let tx = Transaction::new(code, Role::Client);
    assert!(matches!(
        pair.client.send(tx),
        Err(TxWireError::StreamCancelled(_))
    ));
}
