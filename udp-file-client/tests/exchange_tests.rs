//! Integration tests for the at-least-once request exchange.
//!
//! Each test runs a scripted fake server on loopback (see `common`) and a real
//! client socket, so datagrams really cross the UDP stack.

mod common;

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use common::{id_of, ok, text, verb_of, FakeServer, Reply};
use udp_file_client::simulator::{LossySocket, SimulatorConfig};
use udp_file_client::{
    ClientConfig, ClientError, DatagramSocket, FileClient, Request, Router, Status, UdpTransport,
    WireValue,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> ClientConfig {
    ClientConfig {
        retransmit_interval: Duration::from_millis(100),
        deadline: Some(Duration::from_secs(5)),
        ..ClientConfig::default()
    }
}

async fn ephemeral() -> UdpTransport {
    UdpTransport::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind client socket")
}

async fn client_for(server: &FakeServer, config: ClientConfig) -> FileClient<UdpTransport> {
    FileClient::new(ephemeral().await, Router::direct(server.addr), config)
}

// ---------------------------------------------------------------------------
// Basic exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chmod_is_answered() {
    let server = FakeServer::spawn(|req, _| vec![Reply::now(ok(id_of(req), vec![]))]).await;
    let client = client_for(&server, fast_config()).await;

    client.chmod("file", 511).await.expect("chmod");

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(verb_of(&received[0]), "chmod");
    assert_eq!(received[0][2], text("file"));
    assert_eq!(received[0][3], WireValue::Int(511));
}

#[tokio::test]
async fn raw_send_returns_reply_fields() {
    let server = FakeServer::spawn(|req, _| {
        vec![Reply::now(ok(id_of(req), vec![WireValue::Int(1_700_000_000)]))]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    let response = client
        .send(&Request::LastWrite { file: "file".into() })
        .await
        .unwrap();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.result(0), Some(&WireValue::Int(1_700_000_000)));
    assert_eq!(response.id, id_of(&server.received()[0]));
}

#[tokio::test]
async fn server_error_is_surfaced() {
    let server = FakeServer::spawn(|req, _| {
        vec![Reply::now(vec![
            WireValue::Int(id_of(req)),
            text("error"),
            text("mode cannot be changed"),
        ])]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    match client.chmod("file", 511).await {
        Err(ClientError::Server(reason)) => assert_eq!(reason, "mode cannot be changed"),
        other => panic!("expected server error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Retransmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retransmits_identical_request_until_answered() {
    // Ignore the first two copies, answer the third.
    let server = FakeServer::spawn(|req, nth| {
        if nth < 2 {
            vec![]
        } else {
            vec![Reply::now(ok(id_of(req), vec![]))]
        }
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    client.append("file", b"fr").await.expect("append");

    let received = server.received();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|m| m == &received[0]), "copies differ: {received:?}");
    assert_eq!(client.metrics().retransmissions, 2);
}

#[tokio::test]
async fn survives_lost_datagrams() {
    let server = FakeServer::spawn(|req, _| vec![Reply::now(ok(id_of(req), vec![]))]).await;
    let socket = LossySocket::new(
        ephemeral().await,
        SimulatorConfig { drop_first: 2, ..Default::default() },
    );
    let client = FileClient::new(socket, Router::direct(server.addr), fast_config());

    client.write("file", 0, b"fr").await.expect("write");

    assert_eq!(server.received().len(), 1);
    assert!(client.metrics().retransmissions >= 2);
}

#[tokio::test]
async fn silent_server_hits_deadline() {
    let server = FakeServer::spawn(|_, _| vec![]).await;
    let config = ClientConfig {
        deadline: Some(Duration::from_millis(350)),
        ..fast_config()
    };
    let client = client_for(&server, config).await;

    let started = Instant::now();
    let result = client.chmod("file", 511).await;
    assert!(
        matches!(result, Err(ClientError::DeadlineExceeded { .. })),
        "expected DeadlineExceeded, got: {result:?}"
    );
    assert!(started.elapsed() >= Duration::from_millis(350));
    assert!(server.received().len() >= 3, "expected retransmissions before giving up");
}

// ---------------------------------------------------------------------------
// Stale replies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_reply_is_ignored_and_not_cached() {
    let server = FakeServer::spawn(|req, _| {
        let wrong = id_of(req) + 1;
        vec![Reply::now(ok(wrong, vec![text("bogus"), WireValue::Int(99)]))]
    })
    .await;
    let config = ClientConfig {
        deadline: Some(Duration::from_millis(300)),
        ..fast_config()
    };
    let client = client_for(&server, config).await;

    let result = client.read("file", 0, 5).await;
    assert!(matches!(result, Err(ClientError::DeadlineExceeded { .. })), "{result:?}");
    assert!(client.cache().is_empty());
    assert!(client.metrics().stale_replies >= 1);
}

#[tokio::test]
async fn stale_reply_before_real_one() {
    let server = FakeServer::spawn(|req, _| {
        let id = id_of(req);
        vec![
            Reply::now(ok(id + 1, vec![text("bogus"), WireValue::Int(99)])),
            Reply::after(Duration::from_millis(50), ok(id, vec![text("hello"), WireValue::Int(7)])),
        ]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    assert_eq!(client.read("file", 0, 5).await.unwrap(), b"hello");
    let entry = client.cache().get("file").expect("cached");
    assert_eq!(entry.content, b"hello");
    assert_eq!(entry.last_write, WireValue::Int(7));
    assert_eq!(client.metrics().stale_replies, 1);
}

#[tokio::test]
async fn undecodable_datagram_is_skipped() {
    let server = FakeServer::spawn(|req, _| {
        vec![
            Reply::now(vec![text("no id here")]),
            Reply::now(ok(id_of(req), vec![])),
        ]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    client.chmod("file", 420).await.expect("chmod");
    assert_eq!(client.metrics().decode_errors, 1);
}

#[tokio::test]
async fn duplicated_requests_and_replies_are_harmless() {
    let server = FakeServer::spawn(|req, _| vec![Reply::now(ok(id_of(req), vec![]))]).await;
    let socket = LossySocket::new(
        ephemeral().await,
        SimulatorConfig { duplicate_rate: 1.0, ..Default::default() },
    );
    let client = FileClient::new(socket, Router::direct(server.addr), fast_config());

    client.chmod("file", 511).await.expect("first");
    client.chmod("file", 448).await.expect("second");

    // Wait for the last duplicate to land before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received().len(), 4);
    assert!(client.metrics().stale_replies >= 1);
}

// ---------------------------------------------------------------------------
// Server pushes and subscriptions
// ---------------------------------------------------------------------------

fn push(push_id: i64, content: &str) -> Vec<WireValue> {
    vec![WireValue::Int(push_id), text("subscriptionupdate"), text(content)]
}

#[tokio::test]
async fn push_during_other_request_is_acked() {
    let server = FakeServer::spawn(|req, _| {
        if verb_of(req) == "ack" {
            return vec![];
        }
        vec![
            Reply::now(push(4242, "changed")),
            Reply::after(Duration::from_millis(50), ok(id_of(req), vec![])),
        ]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    client.chmod("file", 511).await.expect("chmod");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let acks = server.received_verb("ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0], vec![WireValue::Int(4242), text("ack")]);
}

#[tokio::test]
async fn subscription_stays_open_for_its_duration() {
    let window = Duration::from_millis(1500);
    let server = FakeServer::spawn(|req, _| {
        if verb_of(req) != "subscribe" {
            return vec![];
        }
        vec![
            Reply::now(ok(id_of(req), vec![])),
            Reply::after(Duration::from_millis(300), push(777, "v1")),
            // Same push again, as if our first ack was lost.
            Reply::after(Duration::from_millis(600), push(777, "v1")),
            Reply::after(Duration::from_millis(900), push(778, "v2")),
        ]
    })
    .await;
    // The deadline bounds waiting for the first reply, not the subscription.
    let config = ClientConfig {
        deadline: Some(Duration::from_millis(500)),
        ..fast_config()
    };
    let client = client_for(&server, config).await;

    let started = Instant::now();
    let updates = client.subscribe("file", window).await.expect("subscribe");
    assert!(started.elapsed() >= window, "returned after {:?}", started.elapsed());
    assert_eq!(updates, vec![b"v1".to_vec(), b"v2".to_vec()]);

    let acks: Vec<i64> = server.received_verb("ack").iter().map(|m| id_of(m)).collect();
    assert_eq!(acks, vec![777, 777, 778]);
    assert_eq!(server.received_verb("subscribe").len(), 1);
}

#[tokio::test]
async fn subscription_reply_after_window_returns_at_once() {
    // The first reply only arrives after the requested window is already over.
    let server = FakeServer::spawn(|req, _| {
        vec![Reply::after(Duration::from_millis(250), ok(id_of(req), vec![]))]
    })
    .await;
    let client = client_for(&server, fast_config()).await;

    let started = Instant::now();
    let updates = client
        .subscribe("file", Duration::from_millis(100))
        .await
        .expect("subscribe");
    assert!(updates.is_empty());
    assert!(started.elapsed() < Duration::from_millis(1000));
}

// ---------------------------------------------------------------------------
// Socket errors
// ---------------------------------------------------------------------------

/// Fails the first receives with the queued error kinds, then behaves.
struct FailingRecv {
    inner: UdpTransport,
    failures: Mutex<Vec<io::ErrorKind>>,
}

impl FailingRecv {
    async fn new(failures: Vec<io::ErrorKind>) -> Self {
        Self { inner: ephemeral().await, failures: Mutex::new(failures) }
    }
}

impl DatagramSocket for FailingRecv {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let next = {
            let mut failures = self.failures.lock().unwrap();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        match next {
            Some(kind) => Err(io::Error::new(kind, "injected")),
            None => self.inner.recv_from(buf).await,
        }
    }
}

#[tokio::test]
async fn receive_errors_are_retried_not_surfaced() {
    let server = FakeServer::spawn(|req, _| {
        vec![Reply::after(Duration::from_millis(20), ok(id_of(req), vec![]))]
    })
    .await;
    let socket = FailingRecv::new(vec![io::ErrorKind::Other, io::ErrorKind::ConnectionRefused]).await;
    let client = FileClient::new(socket, Router::direct(server.addr), fast_config());

    client.chmod("file", 1).await.expect("chmod survives receive errors");

    let metrics = client.metrics();
    assert_eq!(metrics.socket_errors, 1);
    assert_eq!(metrics.transient_errors, 1);
}

#[tokio::test]
async fn broken_socket_only_ends_at_deadline() {
    let server = FakeServer::spawn(|req, _| vec![Reply::now(ok(id_of(req), vec![]))]).await;
    let socket = FailingRecv::new(vec![io::ErrorKind::Other; 10_000]).await;
    let config = ClientConfig {
        deadline: Some(Duration::from_millis(200)),
        ..fast_config()
    };
    let client = FileClient::new(socket, Router::direct(server.addr), config);

    let result = client.chmod("file", 1).await;
    assert!(matches!(result, Err(ClientError::DeadlineExceeded { .. })), "{result:?}");

    // Paced between attempts rather than spinning.
    let errors = client.metrics().socket_errors;
    assert!((1..100).contains(&errors), "socket_errors = {errors}");
}

// ---------------------------------------------------------------------------
// Concurrent callers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_calls_do_not_steal_replies() {
    // Answers only the first copy of each id, so a stolen reply is never resent.
    let mut answered = HashSet::new();
    let server = FakeServer::spawn(move |req, _| {
        let id = id_of(req);
        if answered.insert(id) {
            vec![Reply::now(ok(id, vec![]))]
        } else {
            vec![]
        }
    })
    .await;
    let config = ClientConfig {
        deadline: Some(Duration::from_secs(2)),
        ..fast_config()
    };
    let client = client_for(&server, config).await;

    for _ in 0..5 {
        let (first, second) = tokio::join!(client.chmod("f", 1), client.append("g", b"x"));
        first.expect("chmod");
        second.expect("append");
    }

    let metrics = client.metrics();
    assert_eq!(metrics.stale_replies, 0);
    assert_eq!(metrics.retransmissions, 0);
    // Each append reached the server exactly once.
    assert_eq!(server.received_verb("append").len(), 5);
}
