//! `udp-file-client`: a caching client for a remote file service spoken to
//! over plain UDP.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  read / write / append / chmod / subscribe
//!  ┌───▼───────────────────────────────┐
//!  │  FileClient   (cache manager)     │──▶ CacheStore  (validity window)
//!  └───┬───────────────────────────────┘        ▲
//!      │  Request                               │ read replies
//!  ┌───▼───────────────────────────────┐        │
//!  │  Exchanger  (retransmit, match id,│────────┘
//!  │             ack pushes)           │
//!  └───┬───────────────────────────────┘
//!      │  encoded bytes
//!  ┌───▼──────┐    ┌──────────┐
//!  │  Router  │───▶│  Socket  │  direct, or nested through relays
//!  └──────────┘    └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`codec`]     comma-delimited typed wire format
//! - [`message`]   requests, replies, pushes and acks
//! - [`routing`]   destination choice and relay hop-chain wrapping
//! - [`socket`]    datagram socket abstraction over tokio UDP
//! - [`state`]     exchange state machine types
//! - [`exchange`]  at-least-once request/response loop
//! - [`cache`]     read cache with server-verified invalidation
//! - [`client`]    cache-aware verb API
//! - [`config`]    timers and buffer sizes
//! - [`simulator`] lossy socket wrapper for tests

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod exchange;
pub mod message;
pub mod routing;
pub mod simulator;
pub mod socket;
pub mod state;

pub use cache::{CacheEntry, CacheStore, Lookup};
pub use client::FileClient;
pub use codec::{encode, parse, CodecError, WireValue};
pub use config::ClientConfig;
pub use exchange::{ClientError, Exchange, Exchanger};
pub use message::{Request, Response, Status};
pub use routing::{Router, RoutingError};
pub use socket::{DatagramSocket, UdpTransport};
