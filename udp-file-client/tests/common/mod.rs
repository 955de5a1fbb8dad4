//! Scripted fake file server for integration tests.
//!
//! Binds a real `tokio::net::UdpSocket` on loopback and runs in a background
//! task.  Every datagram is parsed with the crate's codec, recorded, and
//! handed to a test-supplied handler that decides which replies go back (and
//! after what delay).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use udp_file_client::{codec, WireValue};

/// One datagram for the fake server to send back to the client.
pub struct Reply {
    pub delay: Duration,
    pub message: Vec<WireValue>,
}

impl Reply {
    pub fn now(message: Vec<WireValue>) -> Self {
        Self { delay: Duration::ZERO, message }
    }

    pub fn after(delay: Duration, message: Vec<WireValue>) -> Self {
        Self { delay, message }
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<WireValue>>>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    /// Start a server whose replies are chosen by `handler(request, nth)`,
    /// where `nth` counts datagrams received so far (0-based).
    pub async fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(&[WireValue], usize) -> Vec<Reply> + Send + 'static,
    {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind fake server"));
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let Ok(request) = codec::parse(&buf[..n]) else {
                    continue;
                };
                let nth = {
                    let mut log = log.lock().unwrap();
                    log.push(request.clone());
                    log.len() - 1
                };
                for reply in handler(&request, nth) {
                    let bytes = codec::encode(&reply.message);
                    if reply.delay.is_zero() {
                        let _ = socket.send_to(&bytes, from).await;
                    } else {
                        let socket = socket.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(reply.delay).await;
                            let _ = socket.send_to(&bytes, from).await;
                        });
                    }
                }
            }
        });

        Self { addr, received, handle }
    }

    /// Every datagram received so far, decoded.
    pub fn received(&self) -> Vec<Vec<WireValue>> {
        self.received.lock().unwrap().clone()
    }

    /// Received datagrams whose verb is `verb`.
    pub fn received_verb(&self, verb: &str) -> Vec<Vec<WireValue>> {
        self.received()
            .into_iter()
            .filter(|m| m.get(1).is_some_and(|v| v.is_text(verb)))
            .collect()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn id_of(request: &[WireValue]) -> i64 {
    request[0].as_int().expect("request id")
}

pub fn verb_of(request: &[WireValue]) -> String {
    String::from_utf8_lossy(request[1].as_bytes().expect("verb")).into_owned()
}

pub fn text(s: &str) -> WireValue {
    WireValue::from(s)
}

pub fn ok(id: i64, results: Vec<WireValue>) -> Vec<WireValue> {
    let mut msg = vec![WireValue::Int(id), text("ok")];
    msg.extend(results);
    msg
}

/// One relay step over a hop-chain layer: the hop it names and the remaining
/// layers, if any.
pub fn peel_hop(layer: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut values = codec::parse(layer).expect("hop layer").into_iter();
    let hop = match values.next() {
        Some(WireValue::Bytes(hop)) => hop,
        other => panic!("layer without a hop: {other:?}"),
    };
    let rest = match values.next() {
        Some(WireValue::Bytes(rest)) => Some(rest),
        _ => None,
    };
    (hop, rest)
}
