//! TCP transport for DNS queries.
//!
//! Each client connection is handled independently and may carry several
//! queries in sequence. TCP DNS messages are prefixed with a 2-byte length.
//! A connection is closed when the client goes quiet for longer than the
//! read timeout, or when a query could not be answered.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Protocol, QueryLogger, is_transient};
use crate::client::Exchange;
use crate::resolver::Resolver;

/// TCP listener for the DNS proxy.
pub struct TcpTransport {
    listener: TcpListener,
    timeout: Duration,
}

impl TcpTransport {
    /// Bind a TCP listener. `timeout` bounds every read and write on
    /// client connections.
    pub async fn bind(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener, timeout })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Only returns on a non-transient accept error.
    pub async fn serve<E>(self, resolver: Arc<Resolver<E>>) -> io::Result<()>
    where
        E: Exchange + 'static,
    {
        info!(protocol = "TCP", addr = %self.local_addr()?, "DNS listener started");

        loop {
            match self.listener.accept().await {
                Ok((client, peer)) => {
                    tokio::spawn(handle_connection(
                        client,
                        peer,
                        resolver.clone(),
                        self.timeout,
                    ));
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "TCP accept error");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Serve queries on one connection until it closes, idles out or fails.
async fn handle_connection<E: Exchange>(
    mut client: TcpStream,
    peer: SocketAddr,
    resolver: Arc<Resolver<E>>,
    io_timeout: Duration,
) {
    let logger = QueryLogger::new(Protocol::Tcp);

    loop {
        let packet = match timeout(io_timeout, read_dns_message(&mut client)).await {
            Ok(Ok(Some(p))) => p,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!(client = %peer, error = %e, "TCP read error");
                return;
            }
            Err(_) => {
                debug!(client = %peer, "Closing idle TCP connection");
                return;
            }
        };

        let query = match Message::from_vec(&packet) {
            Ok(q) => q,
            Err(e) => {
                debug!(client = %peer, error = %e, "Dropping malformed TCP query");
                return;
            }
        };

        let resolution = resolver.handle(&query, Protocol::Tcp).await;
        logger.log(&query, &resolution);

        let Some(reply) = resolution.outcome.reply() else {
            return;
        };

        let bytes = match reply.to_vec() {
            Ok(b) => b,
            Err(e) => {
                warn!(client = %peer, error = %e, "Failed to encode TCP reply");
                return;
            }
        };

        match timeout(io_timeout, write_dns_message(&mut client, &bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client = %peer, error = %e, "TCP write error");
                return;
            }
            Err(_) => {
                debug!(client = %peer, "TCP write timed out");
                return;
            }
        }
    }
}

/// Read one length-prefixed DNS message.
///
/// Returns `None` when the peer closed the connection between messages.
async fn read_dns_message<R>(stream: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match stream.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write one DNS message with its 2-byte length prefix.
async fn write_dns_message<W>(stream: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);

    stream.write_all(&framed).await?;
    stream.flush().await
}
