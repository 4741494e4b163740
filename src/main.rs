use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ricochet::proxy::{self, ProxyConfig};

#[derive(Parser)]
#[command(name = "ricochet")]
#[command(about = "Caching DNS forwarding proxy", long_about = None)]
struct Args {
    /// Address to listen on for both UDP and TCP
    #[arg(short, long, default_value = "127.0.0.1:53")]
    bind: SocketAddr,

    /// Upstream DNS server (host:port), repeat or comma-separate for several
    #[arg(short, long, value_delimiter = ',', default_value = "8.8.8.8:53")]
    upstream: Vec<SocketAddr>,

    /// Read and write timeout for each exchange, in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Retries against the next upstream after a failed exchange
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Maximum number of cached answers (0 disables the cache)
    #[arg(long, default_value_t = 1 << 20)]
    cache_capacity: usize,

    /// Seconds between stats lines (0 disables them)
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ProxyConfig {
        ProxyConfig {
            bind_addr: self.bind,
            upstreams: self.upstream,
            timeout: Duration::from_millis(self.timeout_ms),
            retry_budget: self.retries,
            cache_capacity: self.cache_capacity,
            stats_interval: (self.stats_interval_secs > 0)
                .then(|| Duration::from_secs(self.stats_interval_secs)),
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(args.into_config()))?;

    Ok(())
}
