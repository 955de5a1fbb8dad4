//! Destination selection and relay (onion-style) wrapping.
//!
//! In direct mode every payload goes to the file server unchanged.  In routed
//! mode the payload is paired with a nested hop chain and sent to a randomly
//! chosen relay:
//!
//! ```text
//!  path   = [r1, r2]                    (random, distinct, from the pool)
//!  chain  = [r1, r2, server, r2, r1]    (path, destination, path reversed)
//!
//!  hops   = enc([r1, enc([r2, enc([server, enc([r2, enc([r1])])])])])
//!  wire   = enc([hops, payload])  ──▶ r1
//! ```
//!
//! Each relay would decode one `[hop, rest]` layer and forward the rest to
//! the hop it names.  Only the structure is built here; no layer is encrypted.
//!
//! On the way back the last relay delivers the reply wrapped as a single byte
//! string, which [`Router::unwrap_inbound`] removes.

use std::net::SocketAddr;

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::codec::{self, CodecError, WireValue};

/// Relays used per direction when not configured otherwise.
pub const DEFAULT_HOPS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("relay pool has {have} relay(s), routed mode needs at least {need}")]
    RelayPoolTooSmall { have: usize, need: usize },
    #[error("routed mode needs at least one hop")]
    NoHops,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMode {
    Direct,
    Routed { relays: Vec<SocketAddr>, hops: usize },
}

/// Decides where each datagram goes and what bytes carry it.
#[derive(Debug, Clone)]
pub struct Router {
    server: SocketAddr,
    mode: RouteMode,
}

impl Router {
    pub fn direct(server: SocketAddr) -> Self {
        Self { server, mode: RouteMode::Direct }
    }

    /// Route through `hops` distinct relays drawn from `relays` for every send.
    pub fn routed(
        server: SocketAddr,
        relays: Vec<SocketAddr>,
        hops: usize,
    ) -> Result<Self, RoutingError> {
        if hops == 0 {
            return Err(RoutingError::NoHops);
        }
        let need = hops.max(2);
        if relays.len() < need {
            return Err(RoutingError::RelayPoolTooSmall { have: relays.len(), need });
        }
        Ok(Self { server, mode: RouteMode::Routed { relays, hops } })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn mode(&self) -> &RouteMode {
        &self.mode
    }

    pub fn is_routed(&self) -> bool {
        matches!(self.mode, RouteMode::Routed { .. })
    }

    /// Returns `(first hop, wire bytes)` for an encoded payload.
    pub fn route(&self, payload: &[u8]) -> (SocketAddr, Vec<u8>) {
        match &self.mode {
            RouteMode::Direct => (self.server, payload.to_vec()),
            RouteMode::Routed { relays, hops } => {
                let mut path = relays.clone();
                path.shuffle(&mut rand::rng());
                path.truncate(*hops);

                let chain = hop_chain(&path, self.server);
                log::debug!("[route] chain {:?}", chain);
                let wire = codec::encode(&[
                    WireValue::Bytes(wrap_hops(&chain)),
                    WireValue::from(payload),
                ]);
                (path[0], wire)
            }
        }
    }

    /// Decode a received datagram, stripping the return-path wrapper in routed mode.
    pub fn unwrap_inbound(&self, datagram: &[u8]) -> Result<Vec<WireValue>, CodecError> {
        let values = codec::parse(datagram)?;
        if !self.is_routed() {
            return Ok(values);
        }
        match values.as_slice() {
            [WireValue::Bytes(inner)] => codec::parse(inner),
            _ => Ok(values),
        }
    }
}

/// Outbound path, destination, then the same relays in reverse.
pub fn hop_chain(path: &[SocketAddr], destination: SocketAddr) -> Vec<SocketAddr> {
    path.iter()
        .copied()
        .chain(std::iter::once(destination))
        .chain(path.iter().rev().copied())
        .collect()
}

/// Fold the chain right to left: the innermost hop stands alone, every outer
/// hop is paired with the encoding of everything after it.
pub fn wrap_hops(chain: &[SocketAddr]) -> Vec<u8> {
    let Some((last, outer)) = chain.split_last() else {
        return Vec::new();
    };
    let innermost = codec::encode(&[WireValue::from(last.to_string())]);
    outer.iter().rev().fold(innermost, |inner, hop| {
        codec::encode(&[WireValue::from(hop.to_string()), WireValue::Bytes(inner)])
    })
}
