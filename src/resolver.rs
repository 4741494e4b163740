//! DNS query resolution logic.
//!
//! Handles the core query processing pipeline:
//! 1. Cache lookup by question
//! 2. On a miss, forward to the next upstream, rotating on failure
//! 3. Store successful answers in the cache
//!
//! Transports handle the actual I/O, resolver handles decisions.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hickory_proto::op::Message;
use tracing::warn;

use crate::cache::AnswerCache;
use crate::client::{Exchange, UpstreamClient};
use crate::dns::{self, Question};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::Protocol;
use crate::upstream::UpstreamPool;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_BUDGET: usize = 3;

/// What happened to a query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Answered from the cache, no upstream contacted.
    Cached(Message),
    /// Answered by `upstream` after `attempts` exchanges.
    Forwarded {
        reply: Message,
        upstream: SocketAddr,
        attempts: usize,
    },
    /// Every attempt failed. There is no reply to send.
    Failed { attempts: usize },
}

impl QueryOutcome {
    pub fn reply(&self) -> Option<&Message> {
        match self {
            QueryOutcome::Cached(reply) | QueryOutcome::Forwarded { reply, .. } => Some(reply),
            QueryOutcome::Failed { .. } => None,
        }
    }

}

/// Outcome of [`Resolver::handle`] together with the time it took.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub outcome: QueryOutcome,
    pub elapsed: Duration,
}

/// Resolver handles DNS query processing decisions.
///
/// Shared by both transports. Holds the upstream pool, the answer cache
/// and the client used for upstream exchanges; all of them are safe to
/// use from concurrent queries.
pub struct Resolver<E = UpstreamClient> {
    pool: UpstreamPool,
    cache: AnswerCache,
    client: E,
    retry_budget: usize,
    stats: Stats,
}

impl<E: Exchange> Resolver<E> {
    pub fn new(pool: UpstreamPool, cache: AnswerCache, client: E, retry_budget: usize) -> Self {
        Self {
            pool,
            cache,
            client,
            retry_budget,
            stats: Stats::new(),
        }
    }

    /// Process one inbound query.
    ///
    /// This is the main entry point for transports. A cache hit neither
    /// touches the network nor advances the upstream cursor.
    pub async fn handle(&self, query: &Message, protocol: Protocol) -> Resolution {
        let started = Instant::now();
        let question = Question::from_message(query);

        let cached = question.as_ref().and_then(|q| self.cache.get(q));
        let outcome = match cached {
            Some(answer) => QueryOutcome::Cached(dns::stamp_reply(&answer, query)),
            None => self.forward(query, question, protocol).await,
        };

        let elapsed = started.elapsed();
        match outcome {
            QueryOutcome::Cached(_) => self.stats.record_cached(elapsed),
            QueryOutcome::Forwarded { .. } => self.stats.record_forwarded(elapsed),
            QueryOutcome::Failed { .. } => self.stats.record_failed(elapsed),
        }

        Resolution { outcome, elapsed }
    }

    /// Forward `query` upstream without consulting the cache.
    ///
    /// Makes at most `retry_budget + 1` attempts, each against the next
    /// upstream in the pool. The first successful reply is cached unless
    /// it has the TC bit set.
    pub async fn resolve(&self, query: &Message, protocol: Protocol) -> QueryOutcome {
        self.forward(query, Question::from_message(query), protocol)
            .await
    }

    async fn forward(
        &self,
        query: &Message,
        question: Option<Question>,
        protocol: Protocol,
    ) -> QueryOutcome {
        let mut attempt = 0;

        loop {
            let upstream = self.pool.next();

            match self.client.exchange(query, upstream, protocol).await {
                Ok(reply) => {
                    // A truncated reply only fits the transport it came over.
                    if let Some(question) = question.filter(|_| !reply.truncated()) {
                        self.cache.put(question, reply.clone());
                    }

                    return QueryOutcome::Forwarded {
                        reply,
                        upstream,
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    warn!(upstream = %upstream, attempt, error = %e, "Upstream exchange failed");

                    if attempt >= self.retry_budget {
                        return QueryOutcome::Failed {
                            attempts: attempt + 1,
                        };
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }
}
