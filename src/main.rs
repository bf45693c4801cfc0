//! Seeder Address Book bootstrap tool
//!
//! Builds an address book from configured seed peers, waits until enough of
//! them are known, and reports what the book holds.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use seeder_address_book::{AddressBook, AddressBookConfig};

/// Seeder Address Book - bootstrap a peer registry from seed addresses
#[derive(Parser, Debug)]
#[command(name = "seeder-address-book")]
#[command(version)]
#[command(about = "Bootstrap a peer address registry from seed peers", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "address-book.toml")]
    config: PathBuf,

    /// Seed peer as host:port (repeatable, replaces configured seeds)
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Peers that must be known before bootstrap completes
    #[arg(long)]
    min_peers: Option<usize>,

    /// Seconds to wait for min-peers
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print known addresses as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    info!("📒 Seeder Address Book v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        AddressBookConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        AddressBookConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_seed_peers(args.seeds)
        .with_min_peers(args.min_peers)
        .with_bootstrap_timeout(args.timeout_secs);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Network: {:?} (default port {})", config.network, config.network.default_port());
    info!("   Seed peers: {}", config.seed_peers.len());
    info!("   Min peers: {}", config.min_peers);
    info!("   Bootstrap timeout: {}s", config.bootstrap_timeout_secs);

    let book = Arc::new(AddressBook::new());

    // Seeds arrive from independent tasks, the way crawler workers report them
    for seed in &config.seed_peers {
        let book = book.clone();
        let seed = seed.clone();
        tokio::spawn(async move {
            if let Err(e) = book.try_add(&seed) {
                warn!("Skipping seed {:?}: {}", seed, e);
            }
        });
    }

    match tokio::time::timeout(
        config.bootstrap_timeout(),
        book.wait_for_count_async(config.min_peers),
    )
    .await
    {
        Ok(()) => info!("✅ Bootstrap complete"),
        Err(_) => warn!(
            "Bootstrap timed out after {}s with {} of {} peers",
            config.bootstrap_timeout_secs,
            book.len(),
            config.min_peers
        ),
    }

    let stats = book.stats();
    info!(
        "📊 Status: {} peers ({} usable, {} blacklisted, {} IPv4, {} IPv6)",
        stats.total_peers,
        stats.usable_peers(),
        stats.blacklisted_peers,
        stats.ipv4_peers,
        stats.ipv6_peers
    );

    if args.json {
        let listing: Vec<String> = book
            .shuffled_addresses(config.max_addresses_per_listing)
            .iter()
            .map(|na| na.socket_addr().to_string())
            .collect();
        let known = book.addresses();
        let report = serde_json::json!({
            "stats": stats,
            "known": known,
            "listing": listing,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
