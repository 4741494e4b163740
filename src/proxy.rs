//! DNS proxy orchestration.
//!
//! Binds transports and runs the proxy server.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::cache::{AnswerCache, DEFAULT_CAPACITY};
use crate::client::{DEFAULT_TIMEOUT, Exchange, UpstreamClient};
use crate::error::ProxyError;
use crate::resolver::{DEFAULT_RETRY_BUDGET, Resolver};
use crate::transport::Protocol;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::UpstreamPool;

/// Configuration for the DNS proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address both listeners bind to (e.g., 127.0.0.1:53)
    pub bind_addr: SocketAddr,
    /// Upstream DNS servers, tried in round-robin order
    pub upstreams: Vec<SocketAddr>,
    /// Time allowed for each read and each write
    pub timeout: Duration,
    /// Retries after the first failed upstream attempt
    pub retry_budget: usize,
    /// Maximum number of cached answers, 0 disables the cache
    pub cache_capacity: usize,
    /// How often to log and reset the counters, `None` to never
    pub stats_interval: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 53)),
            upstreams: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
            cache_capacity: DEFAULT_CAPACITY,
            stats_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Both listeners, bound to the same address and sharing one resolver.
pub struct Proxy<E = UpstreamClient> {
    udp: UdpTransport,
    tcp: TcpTransport,
    addr: SocketAddr,
    resolver: Arc<Resolver<E>>,
}

impl<E: Exchange + 'static> Proxy<E> {
    /// Bind the UDP socket, then the TCP listener on the same address.
    ///
    /// When `addr` asks for port 0 the TCP listener reuses whatever port
    /// the UDP socket was given.
    pub async fn bind(
        addr: SocketAddr,
        resolver: Arc<Resolver<E>>,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let udp = UdpTransport::bind(addr)
            .await
            .map_err(ProxyError::bind(Protocol::Udp, addr))?;
        let addr = udp
            .local_addr()
            .map_err(ProxyError::bind(Protocol::Udp, addr))?;
        let tcp = TcpTransport::bind(addr, timeout)
            .await
            .map_err(ProxyError::bind(Protocol::Tcp, addr))?;

        Ok(Self {
            udp,
            tcp,
            addr,
            resolver,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve on both listeners until one of them fails.
    pub async fn run(self) -> Result<(), ProxyError> {
        let Self {
            udp,
            tcp,
            addr,
            resolver,
        } = self;

        let udp = async {
            udp.serve(resolver.clone())
                .await
                .map_err(ProxyError::serve(Protocol::Udp, addr))
        };
        let tcp = async {
            tcp.serve(resolver.clone())
                .await
                .map_err(ProxyError::serve(Protocol::Tcp, addr))
        };

        let result = futures::future::try_join(udp, tcp).await.map(|_| ());
        if let Err(e) = &result {
            error!(error = %e, "DNS listener stopped");
        }

        result
    }
}

/// Run the DNS proxy with the given configuration.
///
/// Starts UDP and TCP listeners on the bind address and forwards cache
/// misses to the upstream servers. Runs until a listener fails.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    let pool = UpstreamPool::new(config.upstreams)?;
    let upstream_strs: Vec<_> = pool.servers().iter().map(|a| a.to_string()).collect();

    let resolver = Arc::new(Resolver::new(
        pool,
        AnswerCache::new(config.cache_capacity),
        UpstreamClient::new(config.timeout),
        config.retry_budget,
    ));

    let proxy = Proxy::bind(config.bind_addr, resolver.clone(), config.timeout).await?;

    info!(
        addr = %proxy.local_addr(),
        upstreams = %upstream_strs.join(", "),
        retry_budget = config.retry_budget,
        cache_capacity = config.cache_capacity,
        "DNS proxy listening"
    );

    if let Some(interval) = config.stats_interval {
        tokio::spawn(report_stats(resolver, interval));
    }

    proxy.run().await
}

/// Log the counters every `period`, resetting them each time.
async fn report_stats<E: Exchange>(resolver: Arc<Resolver<E>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let stats = resolver.stats_snapshot_and_reset();
        info!(
            uptime_secs = stats.uptime_secs,
            cache = resolver.cache().len(),
            requests = stats.requests,
            forwarded = stats.forwarded,
            cached = stats.cached,
            failed = stats.failed,
            avg_response_ms = stats.avg_response_ms,
            "stats"
        );
    }
}
