use super::dual::DualCache;
use super::metrics::CacheMetrics;
use crate::dns::clock::CoarseClock;
use compact_str::{format_compact, CompactString};
use hickory_proto::op::{Message, ResponseCode};
use std::sync::Arc;
use tracing::debug;

/// Maximum cacheable TTL, 2^31 - 1 seconds per RFC 1035.
const MAX_TTL_SECS: u64 = 2_147_483_647;
/// TTL stamped on answers served past their expiry while a refresh runs.
const STALE_TTL: u32 = 60;

/// A cached response: the normalized message plus its absolute expiry in
/// coarse-clock seconds. The message is never mutated after insertion;
/// readers clone it and rewrite ID and TTLs on their copy.
#[derive(Clone)]
struct CachedAnswer {
    message: Arc<Message>,
    expires_at: u64,
}

/// Outcome of a cache lookup.
///
/// `Stale` carries a response whose TTL has elapsed: it is served to the
/// client with a short TTL while the caller schedules a background refresh.
pub enum Lookup {
    Hit(Message),
    Stale(Message),
    Miss,
}

/// DNS semantics over the dual-store cache: question fingerprinting, ID
/// rewriting, TTL clamping and soft expiry.
pub struct MessageCache {
    inner: DualCache<CachedAnswer>,
    clock: Arc<CoarseClock>,
    min_ttl: u32,
}

/// Canonical text of the first question: lowercased name, class, type.
/// Messages with the same first question share a cache entry regardless of
/// transport or transaction ID.
fn fingerprint(msg: &Message) -> Option<CompactString> {
    let q = msg.queries().first()?;
    Some(format_compact!(
        "{} {} {}",
        q.name().to_lowercase(),
        q.query_class(),
        q.query_type()
    ))
}

impl MessageCache {
    pub fn new(
        capacity: usize,
        evict_metrics: bool,
        min_ttl: u32,
        clock: Arc<CoarseClock>,
    ) -> Result<Self, veil_dns_domain::DomainError> {
        Ok(Self {
            inner: DualCache::new(capacity, evict_metrics)?,
            clock,
            min_ttl,
        })
    }

    /// Looks up a response for `query`'s first question.
    ///
    /// On a fresh hit the stored answer is cloned, its ID rewritten to the
    /// query's, and every answer TTL set to the remaining lifetime clamped
    /// to `[min_ttl, 2^31-1]`. Past expiry the entry is still served once
    /// with a short TTL, as `Stale`, so the caller can refresh it without
    /// making the client wait.
    pub fn lookup(&self, query: &Message) -> Lookup {
        let Some(key) = fingerprint(query) else {
            return Lookup::Miss;
        };
        let Some(entry) = self.inner.get(&key) else {
            debug!(key = %key, "cache miss");
            return Lookup::Miss;
        };
        let mut response = (*entry.message).clone();
        response.set_id(query.id());
        let now = self.clock.now();
        if entry.expires_at < now {
            debug!(key = %key, "cache hit with expired ttl, serving stale");
            for answer in response.answers_mut() {
                answer.set_ttl(STALE_TTL);
            }
            return Lookup::Stale(response);
        }
        let remaining = (entry.expires_at - now).min(MAX_TTL_SECS) as u32;
        let ttl = remaining.max(self.min_ttl);
        for answer in response.answers_mut() {
            answer.set_ttl(ttl);
        }
        debug!(key = %key, ttl, "cache hit");
        Lookup::Hit(response)
    }

    /// Stores `response` under `query`'s first question.
    ///
    /// Error responses are never cached. The expiry is the smallest answer
    /// TTL, with each TTL raised to the policy minimum first; a response
    /// with no answers keeps the RFC maximum. The stored copy has its
    /// truncation flag cleared (name compression is applied by the wire
    /// encoder on the way out).
    pub fn store(&self, query: &Message, response: &Message) {
        let Some(key) = fingerprint(query) else {
            return;
        };
        if response.response_code() != ResponseCode::NoError {
            debug!(key = %key, rcode = ?response.response_code(), "not caching error answer");
            return;
        }
        let now = self.clock.now();
        let mut expires_at = now + MAX_TTL_SECS;
        for answer in response.answers() {
            let ttl = u64::from(answer.ttl().max(self.min_ttl));
            expires_at = expires_at.min(now + ttl);
        }
        let mut normalized = response.clone();
        normalized.set_truncated(false);
        self.inner.put(
            &key,
            CachedAnswer {
                message: Arc::new(normalized),
                expires_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.inner.cap()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.metrics()
    }
}
