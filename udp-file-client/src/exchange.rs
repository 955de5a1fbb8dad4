//! At-least-once request/response over an unreliable datagram socket.
//!
//! # Architecture
//!
//! ```text
//!  Request ──▶ codec::encode ──▶ Router::route ──▶ socket.send_to
//!                                                       │
//!      ┌────────────────── tokio::select! ──────────────┘
//!      │  recv_from  → decode → push? ack it
//!      │                      → id ≠ awaited? discard (stale)
//!      │                      → id = awaited? answered (read: fill cache)
//!      │  retransmit timer (fixed interval, unbounded)
//!      │  subscription window (subscribe only, after the first reply)
//!      │  deadline (optional)
//!      ▼
//!  Exchange { response, updates, state }
//! ```
//!
//! Exchanges on one socket run one at a time: a call holds the exchange lock
//! from its first send until it returns, so the receive loop never sees
//! another caller's reply.  Its own id is the only one accepted; duplicates
//! caused by retransmission surface as stale replies on later calls and are
//! dropped.  Server pushes are acked no matter which request is pending.
//!
//! Socket errors never end an exchange.  They are counted and retried; only
//! the optional deadline gives up.

use std::collections::HashSet;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, sleep_until, Instant};

use crate::cache::{CacheEntry, CacheStore};
use crate::codec::{self, WireValue};
use crate::config::ClientConfig;
use crate::message::{
    ack_message, next_request_id, Inbound, Request, RequestId, Response, Status,
};
use crate::routing::Router;
use crate::socket::{is_transient_io_error, DatagramSocket};
use crate::state::ExchangeState;

/// Placeholder for timers that are not armed.  Their `select!` branches are
/// guarded, so they never fire.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Pause after a non-transient receive error so a dead socket does not spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot bind local socket: {0}")]
    Bind(#[from] io::Error),
    #[error("no reply to request {id} after {elapsed:?}")]
    DeadlineExceeded { id: RequestId, elapsed: Duration },
    #[error("server error: {0}")]
    Server(String),
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeMetrics {
    pub requests: u64,        // exchanges started
    pub retransmissions: u64, // timeout-driven resends
    pub stale_replies: u64,   // replies whose id was not awaited
    pub decode_errors: u64,   // datagrams that failed to parse
    pub transient_errors: u64,
    pub socket_errors: u64,   // other receive failures, retried after a pause
    pub acks_sent: u64,
}

/// A finished exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: Response,
    /// Contents of the distinct server pushes received while waiting.
    pub updates: Vec<Vec<u8>>,
    pub state: ExchangeState,
}

/// Sends requests and waits for their replies, retransmitting as needed.
pub struct Exchanger<S> {
    socket: S,
    router: Router,
    cache: CacheStore,
    config: ClientConfig,
    metrics: Mutex<ExchangeMetrics>,
    turn: AsyncMutex<()>,
}

impl<S: DatagramSocket> Exchanger<S> {
    pub fn new(socket: S, router: Router, cache: CacheStore, config: ClientConfig) -> Self {
        Self {
            socket,
            router,
            cache,
            config,
            metrics: Mutex::new(ExchangeMetrics::default()),
            turn: AsyncMutex::new(()),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> ExchangeMetrics {
        *self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, f: impl FnOnce(&mut ExchangeMetrics)) {
        f(&mut self.metrics.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Send `request` and wait for the reply carrying its id.
    ///
    /// Retransmits the identical datagram every `retransmit_interval` until
    /// answered; without a configured deadline this waits forever.  A `read`
    /// reply refreshes the cache entry for its file.  A `subscribe` call stays
    /// open, acking pushes, until its duration has passed since the call began.
    ///
    /// Concurrent callers are served one after another.
    pub async fn send(&self, request: &Request) -> Result<Exchange, ClientError> {
        let _turn = self.turn.lock().await;
        let mut state = ExchangeState::default();
        let id = next_request_id();
        let payload = codec::encode(&request.to_message(id));
        let (dest, wire) = self.router.route(&payload);
        let interval = self.config.retransmit_interval;
        let started = Instant::now();
        self.count(|m| m.requests += 1);

        log::debug!(
            "[rpc] {state} → {} id={} file={:?} via {}",
            request.verb(),
            id,
            request.file(),
            dest
        );
        self.transmit(&wire, dest).await;
        state = ExchangeState::AwaitingResponse;

        let mut answer: Option<Response> = None;
        let mut updates = Vec::new();
        let mut seen_pushes = HashSet::new();
        let mut buf = vec![0u8; self.config.max_datagram];

        let retransmit = sleep_until(started + interval);
        tokio::pin!(retransmit);
        let window_end = sleep_until(started + FAR_FUTURE);
        tokio::pin!(window_end);
        let deadline = sleep_until(started + self.config.deadline.unwrap_or(FAR_FUTURE));
        tokio::pin!(deadline);
        let has_deadline = self.config.deadline.is_some();

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, from) = match result {
                        Ok(v) => v,
                        Err(e) if is_transient_io_error(&e) => {
                            self.count(|m| m.transient_errors += 1);
                            log::debug!("[rpc] transient receive error: {e}");
                            continue;
                        }
                        Err(e) => {
                            self.count(|m| m.socket_errors += 1);
                            log::warn!("[rpc] receive failed, retrying: {e}");
                            sleep(RECV_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let inbound = match self
                        .router
                        .unwrap_inbound(&buf[..n])
                        .map_err(|e| e.to_string())
                        .and_then(|values| Inbound::from_message(values).map_err(|e| e.to_string()))
                    {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            self.count(|m| m.decode_errors += 1);
                            log::debug!("[rpc] ← undecodable datagram from {from}: {e}");
                            continue;
                        }
                    };

                    let response = match inbound {
                        Inbound::Update { push_id, content } => {
                            log::debug!("[rpc] ← subscriptionupdate push={push_id} len={}", content.len());
                            self.ack(push_id).await;
                            if seen_pushes.insert(push_id) {
                                updates.push(content);
                            }
                            continue;
                        }
                        Inbound::Reply(response) => response,
                    };

                    if response.id != id || answer.is_some() {
                        self.count(|m| m.stale_replies += 1);
                        log::debug!("[rpc] ← stale reply id={} (awaiting {id})", response.id);
                        continue;
                    }

                    state = ExchangeState::Answered;
                    log::debug!("[rpc] ← reply id={id} after {:?}", started.elapsed());
                    self.record_read(request, &response);

                    match request.subscription_window() {
                        Some(window) if started.elapsed() < window => {
                            window_end.as_mut().reset(started + window);
                            answer = Some(response);
                        }
                        _ => {
                            debug_assert!(state.is_terminal());
                            return Ok(Exchange { response, updates, state });
                        }
                    }
                }

                _ = &mut retransmit, if answer.is_none() => {
                    self.count(|m| m.retransmissions += 1);
                    log::debug!("[rpc] timeout, retransmitting id={id}");
                    self.transmit(&wire, dest).await;
                    retransmit.as_mut().reset(Instant::now() + interval);
                }

                _ = &mut window_end, if answer.is_some() => {
                    log::debug!("[rpc] subscription id={id} expired");
                    if let Some(response) = answer.take() {
                        state = ExchangeState::Expired;
                        debug_assert!(state.is_terminal());
                        return Ok(Exchange { response, updates, state });
                    }
                }

                _ = &mut deadline, if has_deadline && answer.is_none() => {
                    debug_assert!(!state.is_terminal());
                    log::debug!("[rpc] id={id} gave up in state {state}");
                    return Err(ClientError::DeadlineExceeded { id, elapsed: started.elapsed() });
                }
            }
        }
    }

    /// Send errors are transient by definition here: the retransmit timer
    /// will try again.
    async fn transmit(&self, wire: &[u8], dest: std::net::SocketAddr) {
        if let Err(e) = self.socket.send_to(wire, dest).await {
            self.count(|m| m.transient_errors += 1);
            log::debug!("[rpc] send to {dest} failed: {e}");
        }
    }

    async fn ack(&self, push_id: RequestId) {
        let (dest, wire) = self.router.route(&codec::encode(&ack_message(push_id)));
        self.transmit(&wire, dest).await;
        self.count(|m| m.acks_sent += 1);
        log::debug!("[rpc] → ack push={push_id}");
    }

    /// Cache the bytes of a successful `read` reply.
    fn record_read(&self, request: &Request, response: &Response) {
        let Request::Read { file, offset, length } = request else {
            return;
        };
        if response.status() != Status::Ok {
            log::debug!("[cache] not caching {file:?}: {:?}", response.status());
            return;
        }
        match (response.result(0), response.result(1)) {
            (Some(WireValue::Bytes(content)), Some(token)) => {
                log::debug!("[cache] store {file:?} [{offset}, +{length}) version {token}");
                self.cache.put(
                    file,
                    CacheEntry::new(*offset, *length, content.clone(), token.clone()),
                );
            }
            _ => log::warn!("[cache] read reply for {file:?} lacks content or version"),
        }
    }
}
