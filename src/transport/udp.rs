//! UDP transport for DNS queries.
//!
//! Every datagram is decoded and resolved in its own task, so a slow
//! upstream never holds up the receive loop. Replies go back to the
//! sender's address from the listening socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{MAX_DNS_PACKET_SIZE, Protocol, QueryLogger, is_transient};
use crate::client::Exchange;
use crate::resolver::Resolver;

/// Smallest datagram that can hold a DNS header.
const HEADER_LEN: usize = 12;

/// UDP listener for the DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Only returns on a non-transient socket error.
    pub async fn serve<E>(self, resolver: Arc<Resolver<E>>) -> io::Result<()>
    where
        E: Exchange + 'static,
    {
        info!(protocol = "UDP", addr = %self.local_addr()?, "DNS listener started");

        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "UDP recv error");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if len < HEADER_LEN {
                debug!(client = %src, len, "Dropping short UDP packet");
                continue;
            }

            tokio::spawn(handle_packet(
                self.socket.clone(),
                buf[..len].to_vec(),
                src,
                resolver.clone(),
            ));
        }
    }
}

/// Resolve one datagram and send the reply, if any, back to `src`.
async fn handle_packet<E: Exchange>(
    socket: Arc<UdpSocket>,
    packet: Vec<u8>,
    src: SocketAddr,
    resolver: Arc<Resolver<E>>,
) {
    let query = match Message::from_vec(&packet) {
        Ok(q) => q,
        Err(e) => {
            debug!(client = %src, error = %e, "Dropping malformed UDP query");
            return;
        }
    };

    let resolution = resolver.handle(&query, Protocol::Udp).await;
    QueryLogger::new(Protocol::Udp).log(&query, &resolution);

    let Some(reply) = resolution.outcome.reply() else {
        return;
    };

    let bytes = match reply.to_vec() {
        Ok(b) => b,
        Err(e) => {
            warn!(client = %src, error = %e, "Failed to encode UDP reply");
            return;
        }
    };

    if let Err(e) = socket.send_to(&bytes, src).await {
        debug!(client = %src, error = %e, "UDP response error");
    }
}
