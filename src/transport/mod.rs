//! Listener loops for the DNS proxy.
//!
//! Provides the UDP and TCP listeners that receive DNS queries from
//! clients, hand them to the [`Resolver`](crate::resolver::Resolver) and
//! write the replies back.

pub mod tcp;
pub mod udp;

/// Largest query datagram accepted from a client.
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::Message;
use tracing::{info, warn};

use crate::dns::Question;
use crate::resolver::{QueryOutcome, Resolution};

/// Transport protocol a query arrived on (and is forwarded over).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger for DNS query events.
pub struct QueryLogger {
    protocol: Protocol,
}

impl QueryLogger {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn log(&self, query: &Message, resolution: &Resolution) {
        match &resolution.outcome {
            QueryOutcome::Cached(_) => self.cached(query, resolution.elapsed),
            QueryOutcome::Forwarded {
                upstream, attempts, ..
            } => self.forwarded(query, resolution.elapsed, *upstream, *attempts),
            QueryOutcome::Failed { attempts } => {
                self.failed(query, resolution.elapsed, *attempts)
            }
        }
    }

    pub fn cached(&self, query: &Message, elapsed: Duration) {
        let (name, qtype) = describe(query);
        info!(
            protocol = self.protocol.as_str(),
            domain = %name,
            qtype = %qtype,
            elapsed_ms = elapsed_ms(elapsed),
            "CACHED"
        );
    }

    pub fn forwarded(&self, query: &Message, elapsed: Duration, upstream: SocketAddr, attempts: usize) {
        let (name, qtype) = describe(query);
        info!(
            protocol = self.protocol.as_str(),
            domain = %name,
            qtype = %qtype,
            elapsed_ms = elapsed_ms(elapsed),
            upstream = %upstream,
            attempts,
            "FORWARDED"
        );
    }

    pub fn failed(&self, query: &Message, elapsed: Duration, attempts: usize) {
        let (name, qtype) = describe(query);
        warn!(
            protocol = self.protocol.as_str(),
            domain = %name,
            qtype = %qtype,
            elapsed_ms = elapsed_ms(elapsed),
            attempts,
            "FAILED, no reply sent"
        );
    }
}

fn describe(query: &Message) -> (String, String) {
    match Question::from_message(query) {
        Some(q) => (q.name().to_string(), q.qtype().to_string()),
        None => ("<none>".to_string(), "-".to_string()),
    }
}

fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Whether a socket error only affects one peer and the loop can go on.
///
/// Anything else is treated as a failure of the listener itself.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
