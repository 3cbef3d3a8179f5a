use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use veil_dns_domain::config::DEFAULT_UPSTREAMS;
use veil_dns_domain::ForwarderConfig;
use veil_dns_infrastructure::dns::engine::{
    CONNECTIONS_PER_UPSTREAM, CONNECTION_TIMEOUT, REFRESH_QUEUE_SIZE,
};
use veil_dns_infrastructure::dns::transport::TlsDialer;
use veil_dns_infrastructure::dns::{
    CoarseClock, DnsServer, ForwardEngine, MessageCache, UpstreamPool,
};

mod bootstrap;
mod debug;

#[derive(Parser)]
#[command(name = "veil-dns")]
#[command(version)]
#[command(about = "Caching DNS forwarder with DNS-over-TLS upstreams")]
struct Cli {
    /// Address to listen on for UDP and TCP DNS. Use `127.0.0.1:53` for the
    /// loopback interface only, `:53` for any interface
    #[arg(short = 'a', long, default_value = ":53")]
    listen: String,

    /// Comma-separated upstream servers, `host:port` or `host:port@ip`
    #[arg(short = 's', long, default_value = DEFAULT_UPSTREAMS)]
    upstreams: String,

    /// Cache capacity in entries; 0 selects the default, negative disables
    /// caching
    #[arg(long, default_value_t = 0)]
    cache_size: i64,

    /// Minimum TTL in seconds sent to clients; upstream TTLs below it are
    /// raised
    #[arg(long, default_value_t = 60)]
    min_ttl: u32,

    /// Track misses on recently evicted cache keys (roughly doubles cache
    /// memory)
    #[arg(long)]
    evict_metrics: bool,

    /// Log file path (append mode); logs go to stdout otherwise
    #[arg(short = 'l', long)]
    log_path: Option<String>,

    /// Print debug log messages
    #[arg(short = 'd', long)]
    verbose: bool,

    /// Localhost port for the JSON debug endpoint; disabled when absent
    #[arg(long)]
    debug_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bootstrap::init_logging(cli.verbose, cli.log_path.as_deref())?;

    let config = ForwarderConfig::from_args(
        &cli.listen,
        &cli.upstreams,
        cli.cache_size,
        cli.min_ttl,
        cli.evict_metrics,
        cli.debug_port,
    )?;
    let listen: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {}", config.listen, e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting veil-dns");

    let clock = Arc::new(CoarseClock::new());
    let cache = Arc::new(MessageCache::new(
        config.cache_size,
        config.evict_metrics,
        config.min_ttl,
        Arc::clone(&clock),
    )?);

    let pools: Vec<Arc<UpstreamPool>> = config
        .upstreams
        .iter()
        .map(|spec| {
            info!(upstream = %spec, "configured upstream");
            let dialer = Arc::new(TlsDialer::new(spec.clone(), CONNECTION_TIMEOUT));
            Arc::new(UpstreamPool::new(CONNECTIONS_PER_UPSTREAM, dialer))
        })
        .collect();

    let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_SIZE);
    let engine = Arc::new(ForwardEngine::new(
        pools.clone(),
        Arc::clone(&cache),
        refresh_tx,
    ));

    if let Some(port) = config.debug_port {
        let state = debug::DebugState {
            cache: Arc::clone(&cache),
            started: Instant::now(),
        };
        tokio::spawn(debug::serve(port, state));
    }

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let server = DnsServer::new(listen, engine, pools, clock, refresh_rx);
    server.run(shutdown).await?;
    Ok(())
}
