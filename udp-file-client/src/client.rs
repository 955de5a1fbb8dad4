use crate::cache::{CacheStats, CacheStore, Lookup};
use crate::codec::WireValue;
use crate::config::ClientConfig;
use crate::exchange::{ClientError, Exchange, ExchangeMetrics, Exchanger};
use crate::message::{Request, Response, Status};
use crate::routing::Router;
use crate::socket::{DatagramSocket, UdpTransport};
use std::net::SocketAddr;
use std::time::Duration;

/// Front door for applications: verb helpers over the reliable exchange, with
/// reads going through the validity-window cache first.
pub struct FileClient<S> {
    exchanger: Exchanger<S>,
    cache: CacheStore,
}

impl FileClient<UdpTransport> {
    /// Bind a UDP socket on `local` and talk to the server described by `router`.
    pub async fn bind(
        local: SocketAddr,
        router: Router,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let socket = UdpTransport::bind(local).await?;
        Ok(Self::new(socket, router, config))
    }
}

impl<S: DatagramSocket> FileClient<S> {
    /// Client with a fresh, empty cache using `config.cache_interval`.
    pub fn new(socket: S, router: Router, config: ClientConfig) -> Self {
        let cache = CacheStore::new(config.cache_interval);
        Self::with_cache(socket, router, config, cache)
    }

    /// Client sharing an existing cache store.
    pub fn with_cache(socket: S, router: Router, config: ClientConfig, cache: CacheStore) -> Self {
        Self {
            exchanger: Exchanger::new(socket, router, cache.clone(), config),
            cache,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn metrics(&self) -> ExchangeMetrics {
        self.exchanger.metrics()
    }

    /// Raw exchange: send any request and return whatever reply answers it.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        Ok(self.exchanger.send(request).await?.response)
    }

    /// Read `length` bytes at `offset`, served from cache when possible.
    ///
    /// - no entry: full read (which fills the cache)
    /// - entry covers the range, inside the window: cached bytes, no network
    /// - entry covers the range, window over: one `lastWrite` round trip; same
    ///   version → cached bytes with a fresh window, otherwise a full read
    /// - entry does not cover the range: full read, replacing the entry
    pub async fn read(&self, file: &str, offset: i64, length: i64) -> Result<Vec<u8>, ClientError> {
        match self.cache.lookup(file, offset, length) {
            Lookup::Fresh(content) => {
                log::debug!("[cache] hit {file:?} [{offset}, +{length})");
                return Ok(content);
            }
            Lookup::Stale { last_write } => {
                let current = self.last_write(file).await?;
                if current == last_write {
                    if let Some(content) = self.cache.revalidate(file, offset, length, &current) {
                        log::debug!("[cache] revalidated {file:?} at version {current}");
                        return Ok(content);
                    }
                }
                log::debug!("[cache] {file:?} changed ({last_write} → {current}); refetching");
            }
            Lookup::Bypass => log::debug!("[cache] {file:?} range not cached; bypassing"),
            Lookup::Miss => log::debug!("[cache] miss {file:?}"),
        }
        self.fetch(file, offset, length).await
    }

    /// Full `read` round trip; the exchange refreshes the cache entry.
    async fn fetch(&self, file: &str, offset: i64, length: i64) -> Result<Vec<u8>, ClientError> {
        let request = Request::Read { file: file.to_string(), offset, length };
        let response = self.checked(&request).await?;
        match response.result(0) {
            Some(WireValue::Bytes(content)) => Ok(content.clone()),
            _ => Err(ClientError::MalformedResponse("read reply has no content")),
        }
    }

    pub async fn write(&self, file: &str, offset: i64, data: &[u8]) -> Result<(), ClientError> {
        let request = Request::Write { file: file.to_string(), offset, data: data.to_vec() };
        self.checked(&request).await.map(drop)
    }

    /// Not idempotent: a retransmitted append may be applied twice by an
    /// at-least-once server.
    pub async fn append(&self, file: &str, data: &[u8]) -> Result<(), ClientError> {
        let request = Request::Append { file: file.to_string(), data: data.to_vec() };
        self.checked(&request).await.map(drop)
    }

    pub async fn chmod(&self, file: &str, mode: i64) -> Result<(), ClientError> {
        let request = Request::Chmod { file: file.to_string(), mode };
        self.checked(&request).await.map(drop)
    }

    /// Current server version token of `file`.
    pub async fn last_write(&self, file: &str) -> Result<WireValue, ClientError> {
        let request = Request::LastWrite { file: file.to_string() };
        let response = self.checked(&request).await?;
        response
            .result(0)
            .cloned()
            .ok_or(ClientError::MalformedResponse("lastWrite reply has no version"))
    }

    /// Stay subscribed to `file` for `duration`; returns the content of every
    /// distinct update pushed in that time.
    pub async fn subscribe(&self, file: &str, duration: Duration) -> Result<Vec<Vec<u8>>, ClientError> {
        let request = Request::Subscribe { file: file.to_string(), duration };
        let Exchange { response, updates, .. } = self.exchanger.send(&request).await?;
        ensure_ok(&response)?;
        Ok(updates)
    }

    async fn checked(&self, request: &Request) -> Result<Response, ClientError> {
        let response = self.send(request).await?;
        ensure_ok(&response)?;
        Ok(response)
    }
}

fn ensure_ok(response: &Response) -> Result<(), ClientError> {
    match response.status() {
        Status::Ok => Ok(()),
        Status::Error(reason) => Err(ClientError::Server(reason)),
        Status::Unknown => Err(ClientError::MalformedResponse("reply has no status")),
    }
}
