//! Entry point for `udp-file-client`.
//!
//! Parses CLI arguments, builds a [`FileClient`] and issues one verb.  All
//! protocol work is delegated to library modules; `main.rs` owns only process
//! setup (logging, argument parsing, address resolution).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use udp_file_client::routing::DEFAULT_HOPS;
use udp_file_client::{ClientConfig, FileClient, Router};

/// Caching file-service client over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address to bind.
    #[arg(short, long, default_value = "127.0.0.1:5005")]
    bind: String,

    /// File server address.
    #[arg(short, long, default_value = "127.0.0.1:5006")]
    server: String,

    /// Route every datagram through the relay pool.
    #[arg(long)]
    routed: bool,

    /// Relay address (repeatable).  Used only with --routed.
    #[arg(long = "relay", default_values = ["localhost:5100", "localhost:5101"])]
    relays: Vec<String>,

    /// Relays per direction in routed mode.
    #[arg(long, default_value_t = DEFAULT_HOPS)]
    hops: usize,

    /// Retransmit interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Cache validity window in seconds.
    #[arg(long, default_value_t = 30)]
    cache_secs: u64,

    /// Give up on a request after this many milliseconds (default: never).
    #[arg(long)]
    deadline_ms: Option<u64>,

    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand)]
enum Verb {
    /// Read LENGTH bytes at OFFSET.
    Read {
        file: String,
        offset: i64,
        length: i64,
        /// Issue the same read N times (later reads may hit the cache).
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Overwrite bytes at OFFSET.
    Write { file: String, offset: i64, data: String },
    /// Append to the end of the file.
    Append { file: String, data: String },
    /// Change the file mode (decimal, e.g. 511 for 0o777).
    Chmod { file: String, mode: i64 },
    /// Print the server's version token for the file.
    LastWrite { file: String },
    /// Subscribe to updates for DURATION_MS milliseconds.
    Subscribe { file: String, duration_ms: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let bind = resolve(&cli.bind).await?;
    let server = resolve(&cli.server).await?;
    let router = if cli.routed {
        let mut relays = Vec::with_capacity(cli.relays.len());
        for relay in &cli.relays {
            relays.push(resolve(relay).await?);
        }
        Router::routed(server, relays, cli.hops)?
    } else {
        Router::direct(server)
    };

    let config = ClientConfig {
        retransmit_interval: Duration::from_millis(cli.timeout_ms),
        cache_interval: Duration::from_secs(cli.cache_secs),
        deadline: cli.deadline_ms.map(Duration::from_millis),
        ..ClientConfig::default()
    };
    log::info!(
        "Client on {bind}, server {server} ({})",
        if router.is_routed() { "routed" } else { "direct" }
    );
    let client = FileClient::bind(bind, router, config).await?;

    match cli.verb {
        Verb::Read { file, offset, length, repeat } => {
            for _ in 0..repeat.max(1) {
                let content = client.read(&file, offset, length).await?;
                println!("{}", String::from_utf8_lossy(&content));
            }
            let stats = client.cache_stats();
            log::info!(
                "cache: {} hit(s), {} miss(es), {} revalidation(s), {} bypass(es)",
                stats.hits,
                stats.misses,
                stats.revalidations,
                stats.bypasses
            );
        }
        Verb::Write { file, offset, data } => client.write(&file, offset, data.as_bytes()).await?,
        Verb::Append { file, data } => client.append(&file, data.as_bytes()).await?,
        Verb::Chmod { file, mode } => client.chmod(&file, mode).await?,
        Verb::LastWrite { file } => println!("{}", client.last_write(&file).await?),
        Verb::Subscribe { file, duration_ms } => {
            let updates = client
                .subscribe(&file, Duration::from_millis(duration_ms))
                .await?;
            for update in updates {
                println!("{}", String::from_utf8_lossy(&update));
            }
        }
    }

    Ok(())
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolving {addr}"))?
        .next()
        .with_context(|| format!("no address for {addr}"))
}
