//! Round-robin selection over the configured upstream resolvers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::error::ConfigError;

/// Ordered, fixed set of upstream resolvers with a shared cursor.
///
/// The cursor always stays within `0..len` and is advanced atomically, so
/// concurrent callers never lose or corrupt an update.
pub struct UpstreamPool {
    servers: Vec<SocketAddr>,
    cursor: AtomicUsize,
}

impl UpstreamPool {
    pub fn new(servers: Vec<SocketAddr>) -> Result<Self, ConfigError> {
        if servers.is_empty() {
            return Err(ConfigError::NoUpstreams);
        }

        Ok(Self {
            servers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Return the upstream under the cursor and advance the cursor.
    pub fn next(&self) -> SocketAddr {
        let len = self.servers.len();
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        let server = self.servers[index];

        info!(upstream = %server, index, "Selected upstream");

        server
    }

    /// Index of the upstream the next call to [`next`](Self::next) returns.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }
}
