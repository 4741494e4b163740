//! Ricochet - a caching DNS forwarding proxy.
//!
//! Queries arrive over UDP or TCP, are answered from an in-memory LRU
//! cache when possible, and are otherwise forwarded to a round-robin pool
//! of upstream resolvers with a bounded number of retries.

pub mod cache;
pub mod client;
pub mod dns;
pub mod error;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;
