//! Error types shared across the proxy.

use std::io;
use std::net::SocketAddr;

use hickory_proto::error::ProtoError;
use thiserror::Error;

use crate::transport::Protocol;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("at least one upstream server must be configured")]
    NoUpstreams,
}

/// Failure of a single request/reply cycle with one upstream.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("timed out talking to {0}")]
    Timeout(SocketAddr),

    #[error("I/O error talking to {server}: {source}")]
    Io {
        server: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("malformed reply from {server}: {source}")]
    Malformed {
        server: SocketAddr,
        #[source]
        source: ProtoError,
    },

    #[error("reply id {got} from {server} does not match query id {expected}")]
    IdMismatch {
        server: SocketAddr,
        expected: u16,
        got: u16,
    },

    #[error("failed to encode query for {server}: {source}")]
    Encode {
        server: SocketAddr,
        #[source]
        source: ProtoError,
    },
}

impl ExchangeError {
    pub fn io(server: SocketAddr) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { server, source }
    }
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        protocol: Protocol,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{protocol} listener on {addr} failed: {source}")]
    Serve {
        protocol: Protocol,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ProxyError {
    pub fn bind(protocol: Protocol, addr: SocketAddr) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Bind {
            protocol,
            addr,
            source,
        }
    }

    pub fn serve(protocol: Protocol, addr: SocketAddr) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Serve {
            protocol,
            addr,
            source,
        }
    }
}
