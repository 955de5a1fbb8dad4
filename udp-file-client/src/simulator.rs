//! Fault-injecting socket for exercising the retransmission path.
//!
//! Real networks drop and duplicate datagrams.  To test the at-least-once
//! exchange without depending on actual network conditions, [`LossySocket`]
//! wraps any [`DatagramSocket`] and applies a fault model to outbound sends:
//!
//! | Fault        | Description                                         |
//! |--------------|-----------------------------------------------------|
//! | Fixed loss   | Silently drop the first `drop_first` datagrams.     |
//! | Random loss  | Drop a datagram with probability `loss_rate`.       |
//! | Duplication  | Send a datagram twice with `duplicate_rate`.        |
//!
//! Receives pass through untouched.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::socket::DatagramSocket;

/// Configuration for the fault model.  Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub drop_first: u64,
    pub loss_rate: f64,
    pub duplicate_rate: f64,
}

#[derive(Debug)]
pub struct LossySocket<S> {
    inner: S,
    config: SimulatorConfig,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl<S: DatagramSocket> LossySocket<S> {
    pub fn new(inner: S, mut config: SimulatorConfig) -> Self {
        config.loss_rate = config.loss_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);
        Self {
            inner,
            config,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Datagrams handed to the inner socket, duplicates included.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S: DatagramSocket> DatagramSocket for LossySocket<S> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let attempt = self.sent.load(Ordering::Relaxed) + self.dropped.load(Ordering::Relaxed);
        let (lose, duplicate) = {
            let mut rng = rand::rng();
            (
                rng.random_bool(self.config.loss_rate),
                rng.random_bool(self.config.duplicate_rate),
            )
        };

        if attempt < self.config.drop_first || lose {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("[sim] dropped {} bytes to {dest}", buf.len());
            return Ok(buf.len());
        }

        let n = self.inner.send_to(buf, dest).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.inner.send_to(buf, dest).await?;
            self.sent.fetch_add(1, Ordering::Relaxed);
            log::debug!("[sim] duplicated {} bytes to {dest}", buf.len());
        }
        Ok(n)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}
