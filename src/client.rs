//! Single request/reply exchanges with an upstream resolver.
//!
//! The client performs exactly one attempt per call. Picking another
//! upstream and trying again is the resolver's job.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::error::ExchangeError;
use crate::transport::Protocol;

/// Default time allowed for each read and each write of an exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest datagram an upstream can send back.
const MAX_UDP_REPLY_SIZE: usize = u16::MAX as usize;

/// One query/reply cycle against a single upstream.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(
        &self,
        query: &Message,
        server: SocketAddr,
        protocol: Protocol,
    ) -> Result<Message, ExchangeError>;
}

/// Network client talking to upstreams over UDP or TCP.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange_udp(&self, query: &[u8], server: SocketAddr) -> Result<Vec<u8>, ExchangeError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(ExchangeError::io(server))?;
        socket.connect(server).await.map_err(ExchangeError::io(server))?;

        timeout(self.timeout, socket.send(query))
            .await
            .map_err(|_| ExchangeError::Timeout(server))?
            .map_err(ExchangeError::io(server))?;

        let mut buf = vec![0u8; MAX_UDP_REPLY_SIZE];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ExchangeError::Timeout(server))?
            .map_err(ExchangeError::io(server))?;
        buf.truncate(len);

        Ok(buf)
    }

    async fn exchange_tcp(&self, query: &[u8], server: SocketAddr) -> Result<Vec<u8>, ExchangeError> {
        let mut stream = timeout(self.timeout, TcpStream::connect(server))
            .await
            .map_err(|_| ExchangeError::Timeout(server))?
            .map_err(ExchangeError::io(server))?;
        stream.set_nodelay(true).map_err(ExchangeError::io(server))?;

        let framed = frame(query).map_err(ExchangeError::io(server))?;

        timeout(self.timeout, stream.write_all(&framed))
            .await
            .map_err(|_| ExchangeError::Timeout(server))?
            .map_err(ExchangeError::io(server))?;

        let reply = timeout(self.timeout, async {
            let len = stream.read_u16().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        })
        .await
        .map_err(|_| ExchangeError::Timeout(server))?
        .map_err(ExchangeError::io(server))?;

        Ok(reply)
    }
}

/// Prefix `message` with its 2-byte length.
fn frame(message: &[u8]) -> io::Result<Vec<u8>> {
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    Ok(framed)
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl Exchange for UpstreamClient {
    async fn exchange(
        &self,
        query: &Message,
        server: SocketAddr,
        protocol: Protocol,
    ) -> Result<Message, ExchangeError> {
        let bytes = query
            .to_vec()
            .map_err(|source| ExchangeError::Encode { server, source })?;

        let raw = match protocol {
            Protocol::Udp => self.exchange_udp(&bytes, server).await?,
            Protocol::Tcp => self.exchange_tcp(&bytes, server).await?,
        };

        let reply = Message::from_vec(&raw)
            .map_err(|source| ExchangeError::Malformed { server, source })?;

        if reply.id() != query.id() {
            return Err(ExchangeError::IdMismatch {
                server,
                expected: query.id(),
                got: reply.id(),
            });
        }

        debug!(
            upstream = %server,
            protocol = protocol.as_str(),
            bytes = raw.len(),
            answers = reply.answers().len(),
            "Upstream replied"
        );

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{answer, query};
    use crate::transport::MAX_DNS_PACKET_SIZE;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{RData, Record, RecordType};
    use tokio::net::TcpListener;

    /// Answer one UDP query, optionally rewriting the reply id.
    async fn udp_upstream(id_override: Option<u16>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf[..len]).unwrap();
            let mut reply = answer(&request, Ipv4Addr::new(93, 184, 216, 34));
            if let Some(id) = id_override {
                reply.set_id(id);
            }
            socket.send_to(&reply.to_vec().unwrap(), peer).await.unwrap();
        });

        addr
    }

    #[tokio::test]
    async fn udp_exchange_returns_reply() {
        let server = udp_upstream(None).await;
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(0x1234, "example.com.", RecordType::A);

        let reply = client.exchange(&request, server, Protocol::Udp).await.unwrap();

        assert_eq!(reply.id(), 0x1234);
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn udp_exchange_rejects_mismatched_id() {
        let server = udp_upstream(Some(0x9999)).await;
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(0x1234, "example.com.", RecordType::A);

        let err = client.exchange(&request, server, Protocol::Udp).await.unwrap_err();

        assert!(matches!(
            err,
            ExchangeError::IdMismatch {
                expected: 0x1234,
                got: 0x9999,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn udp_exchange_times_out_on_silent_upstream() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = silent.local_addr().unwrap();
        let client = UpstreamClient::new(Duration::from_millis(100));
        let request = query(1, "example.com.", RecordType::A);

        let err = client.exchange(&request, server, Protocol::Udp).await.unwrap_err();

        assert!(matches!(err, ExchangeError::Timeout(addr) if addr == server));
        drop(silent);
    }

    #[tokio::test]
    async fn udp_exchange_rejects_garbage_reply() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
            let (_, peer) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(&[0x12, 0x34, 0x81], peer).await.unwrap();
        });
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(0x1234, "example.com.", RecordType::A);

        let err = client.exchange(&request, server, Protocol::Udp).await.unwrap_err();

        assert!(matches!(err, ExchangeError::Malformed { .. }));
    }

    #[tokio::test]
    async fn udp_exchange_accepts_reply_larger_than_query_buffer() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf[..len]).unwrap();
            let mut reply = answer(&request, Ipv4Addr::new(10, 0, 0, 0));
            let name = request.queries()[0].name().clone();
            for i in 1..=400u16 {
                let ip = Ipv4Addr::new(10, 0, (i >> 8) as u8, i as u8);
                reply.add_answer(Record::from_rdata(name.clone(), 60, RData::A(A::from(ip))));
            }
            let bytes = reply.to_vec().unwrap();
            assert!(bytes.len() > MAX_DNS_PACKET_SIZE);
            socket.send_to(&bytes, peer).await.unwrap();
        });
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(0x2468, "many.example.", RecordType::A);

        let reply = client.exchange(&request, server, Protocol::Udp).await.unwrap();

        assert_eq!(reply.answers().len(), 401);
    }

    #[test]
    fn frame_rejects_oversized_message() {
        let err = frame(&vec![0u8; 70_000]).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn frame_prefixes_length() {
        assert_eq!(frame(b"abc").unwrap(), b"\x00\x03abc");
    }

    #[tokio::test]
    async fn tcp_exchange_uses_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap() as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf).unwrap();
            let reply = answer(&request, Ipv4Addr::new(10, 1, 2, 3)).to_vec().unwrap();
            stream.write_u16(reply.len() as u16).await.unwrap();
            stream.write_all(&reply).await.unwrap();
        });
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(0x0101, "example.com.", RecordType::A);

        let reply = client.exchange(&request, server, Protocol::Tcp).await.unwrap();

        assert_eq!(reply.id(), 0x0101);
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn tcp_exchange_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        drop(listener);
        let client = UpstreamClient::new(Duration::from_secs(1));
        let request = query(1, "example.com.", RecordType::A);

        let err = client.exchange(&request, server, Protocol::Tcp).await.unwrap_err();

        assert!(matches!(
            err,
            ExchangeError::Io { .. } | ExchangeError::Timeout(_)
        ));
    }
}
