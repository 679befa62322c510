//! Lightning DNS Seed
//!
//! Authoritative DNS server that hands out addresses of Lightning Network
//! nodes, so new nodes can bootstrap their first peer connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LIGHTNING DNS SEED                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Poller (per realm)   ←── lightningd `listnodes` over RPC   │
//! │  Network View         ←── fresh nodes, sharded by realm     │
//! │  Sweep                ←── evicts nodes no longer reported   │
//! │  DNS Server (53)      ←── A / AAAA / ANY over UDP and TCP   │
//! │  HTTP API (8080)      ←── health, status and metrics        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod api;
mod clock;
mod config;
mod dns;
mod poller;
mod types;
mod view;

use api::{ApiServer, Metrics};
use clock::SystemClock;
use config::{NetworkSelection, SeedConfig};
use dns::{DnsServer, SeedDnsHandler};
use poller::{LightningRpc, NodeSource, Poller};
use view::NetworkView;

/// Lightning DNS Seed - bootstrap peer discovery for the Lightning Network
#[derive(Parser, Debug)]
#[command(name = "lightning-dns-seed")]
#[command(version)]
#[command(about = "DNS seed serving Lightning Network node addresses", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dns-seed.toml")]
    config: PathBuf,

    /// DNS listen address (requires root or CAP_NET_BIND_SERVICE for port 53)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Zone this seed is authoritative for
    #[arg(long)]
    root_domain: Option<String>,

    /// Seconds between lightningd polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// lightningd base directory
    #[arg(long)]
    lightning_dir: Option<String>,

    /// lightningd RPC socket file name
    #[arg(long)]
    lightning_sock: Option<String>,

    /// Network(s) to serve
    #[arg(long, value_enum)]
    network: Option<NetworkSelection>,

    /// Maximum nodes per answer
    #[arg(long)]
    results: Option<usize>,

    /// HTTP API port for status and metrics
    #[arg(long)]
    api_port: Option<u16>,

    /// Shorthand for --log-level debug
    #[arg(long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to --config and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug".to_string() } else { args.log_level.clone() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into())
        )
        .init();

    info!("⚡ Lightning DNS Seed v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        SeedConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        SeedConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_listen_addr(args.listen)
        .with_root_domain(args.root_domain)
        .with_poll_interval(args.poll_interval)
        .with_lightning_dir(args.lightning_dir)
        .with_lightning_sock(args.lightning_sock)
        .with_network(args.network)
        .with_num_results(args.results)
        .with_api_port(args.api_port);

    config.validate()?;

    if args.init_config {
        config.save(&args.config)?;
        info!("📝 Configuration written to {:?}", args.config);
        return Ok(());
    }

    info!("⚙️  Configuration:");
    info!("   Root domain: {}", config.root_domain);
    info!("   Listen: {}", config.listen_addr);
    info!("   Network: {:?}", config.network);
    info!("   Poll interval: {}s", config.poll_interval_secs);
    info!("   Freshness window: {}s", config.freshness_window_secs);
    info!("   Results per answer: {}", config.num_results);

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let view = Arc::new(NetworkView::new(
        config.freshness_window_secs,
        Arc::new(SystemClock),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    // One poller per served realm; an unreachable lightningd is fatal at startup
    let realms = config.network.realms();
    for (realm, network_name) in &realms {
        view.register_realm(*realm).await;

        let socket_path = config.rpc_socket_path(network_name);
        let mut rpc = LightningRpc::new(
            socket_path.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
        );
        let description = rpc.probe().await.map_err(|e| {
            anyhow::anyhow!("lightningd for {} at {:?} is unreachable: {}", network_name, socket_path, e)
        })?;
        info!("🔌 Realm {} ({}): {}", realm, network_name, description);

        let poller = Poller::new(
            *realm,
            Box::new(rpc),
            view.clone(),
            metrics.clone(),
            Duration::from_secs(config.poll_interval_secs),
        );
        tasks.spawn(poller.run(shutdown_rx.clone()));
    }

    let handler = Arc::new(SeedDnsHandler::new(
        view.clone(),
        metrics.clone(),
        &config.root_domain,
        realms.iter().map(|(realm, _)| *realm).collect(),
        config.num_results,
        config.dns_ttl_secs,
        config.max_udp_payload,
    ));
    let server = DnsServer::bind(
        config.listen_addr,
        handler,
        Duration::from_secs(config.tcp_idle_timeout_secs),
    )
    .await?;

    let api = if config.api_enabled {
        Some(ApiServer::bind(config.clone(), view.clone(), metrics.clone()).await?)
    } else {
        None
    };

    tasks.spawn(server.run(shutdown_rx.clone()));
    if let Some(api) = api {
        tasks.spawn(api.run(shutdown_rx.clone()));
    }

    tasks.spawn(run_maintenance(
        config.clone(),
        view.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal; any service stopping on its own is fatal
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
            Ok(())
        }
        Some(result) = tasks.join_next() => {
            let err = unexpected_exit(result);
            error!("Service exited unexpectedly: {:#}", err);
            Err(err)
        }
    };

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Services did not stop within 5s, aborting");
        tasks.abort_all();
    }

    info!("👋 Lightning DNS Seed shutting down");
    outcome
}

/// The error a service task leaves behind when it stops before shutdown
fn unexpected_exit(result: Result<anyhow::Result<()>, tokio::task::JoinError>) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow::anyhow!("service stopped before shutdown was requested"),
        Ok(Err(e)) => e,
        Err(e) => anyhow::Error::new(e).context("service task failed"),
    }
}

/// Periodic eviction of nodes the upstream stopped reporting
async fn run_maintenance(
    config: Arc<SeedConfig>,
    view: Arc<NetworkView>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }

        let removed = view
            .evict_stale(view.now(), config.freshness_window_secs)
            .await;
        if removed > 0 {
            info!("🧹 Evicted {} stale nodes", removed);
            metrics.add_nodes_evicted(removed as u64);
        }

        let stats = view.stats().await;
        let fresh: usize = stats.iter().map(|s| s.fresh_nodes).sum();
        metrics.set_fresh_nodes(fresh as u64);

        for realm in &stats {
            info!(
                "📊 Realm {}: {} fresh / {} known nodes",
                realm.realm, realm.fresh_nodes, realm.total_nodes
            );
        }
    }

    Ok(())
}
