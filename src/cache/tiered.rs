//! Composed L0 (sharded SIEVE, in-process) + L1 (Redis, cross-fleet) cache.
//!
//! Mirrors [`super::redis_backend::LayeredCache`]'s L1/L2 promotion shape but
//! adds the soft/hard-expiry tri-state lookup the query pipeline needs for
//! stale-serve and refresh-ahead, and exposes the primitives the sweeper and
//! refresh coordinator need (hit counters, expiry index, distributed lock).

use super::redis_backend::{CachedEntry, RedisCache};
use super::sieve::{SharedSieveCache, SieveLookup};
use super::CacheKey;
use crate::dns::DNSPacket;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Rewrite every record's TTL in place, capped to be at least one second so
/// a response never goes out advertising a zero (or negative) TTL.
fn rewrite_ttls(response: &mut DNSPacket, ttl: Duration) {
    let ttl_secs = ttl.as_secs().max(1).min(u32::MAX as u64) as u32;
    for answer in &mut response.answers {
        answer.ttl = ttl_secs;
    }
    for authority in &mut response.authorities {
        authority.ttl = ttl_secs;
    }
    for additional in &mut response.resources {
        additional.ttl = ttl_secs;
    }
}

/// How close to soft expiry (as a fraction of the original TTL) an entry
/// must be, while still being read often enough, before a read triggers a
/// background refresh instead of just being served.
#[derive(Debug, Clone, Copy)]
pub struct RefreshAheadPolicy {
    /// Fraction of TTL remaining below which a fresh read is "hot enough"
    /// to refresh ahead of expiry (e.g. 0.1 == last 10% of TTL).
    pub hot_fraction: f64,
    /// Minimum hit count within `hit_window` before refresh-ahead kicks in;
    /// guards against refreshing rarely-used entries.
    pub hot_hit_threshold: u64,
    /// Short window over which hit counts are tracked for refresh-ahead
    /// (also the Redis counter TTL for that counter).
    pub hit_window: Duration,
    /// Long window the sweeper checks a fingerprint's hit count against
    /// before proactively refreshing it (`sweep_min_hits`). Tracked under a
    /// separate counter keyed by this window, independent of `hit_window`.
    pub sweep_hit_window: Duration,
    /// Cap on the TTL a stale (past soft-expiry, within grace) entry is
    /// re-served with, so clients don't extend the staleness window.
    pub stale_ttl: Duration,
    /// Grace period added past soft expiry for the L1 tier, mirroring the
    /// L0 `ShardedSieveCache`'s own `max_grace`.
    pub max_grace: Duration,
}

impl Default for RefreshAheadPolicy {
    fn default() -> Self {
        Self {
            hot_fraction: 0.1,
            hot_hit_threshold: 3,
            hit_window: Duration::from_secs(300),
            sweep_hit_window: Duration::from_secs(168 * 3600),
            stale_ttl: Duration::from_secs(300),
            max_grace: Duration::from_secs(3600),
        }
    }
}

pub enum TieredLookup {
    Miss,
    Fresh(DNSPacket),
    /// Fresh, but hot and close enough to soft expiry that the caller
    /// should proactively enqueue a refresh while still serving this.
    FreshHot(DNSPacket),
    /// Within grace; serve this and the caller should enqueue a refresh.
    Stale(DNSPacket),
}

/// Composed cache: L0 SIEVE in-process, optional L1 Redis for cross-fleet
/// sharing. `put` always writes L0; it writes L1 too when present.
pub struct TieredCache {
    l0: SharedSieveCache,
    l1: Option<Arc<RedisCache>>,
    policy: RefreshAheadPolicy,
}

impl TieredCache {
    pub fn new(l0: SharedSieveCache, l1: Option<Arc<RedisCache>>, policy: RefreshAheadPolicy) -> Self {
        Self { l0, l1, policy }
    }

    pub fn l1(&self) -> Option<&Arc<RedisCache>> {
        self.l1.as_ref()
    }

    pub fn policy(&self) -> RefreshAheadPolicy {
        self.policy
    }

    /// L0 first; on miss, consult L1 and promote into L0 when present. Every
    /// returned response has its record TTLs rewritten to reflect elapsed
    /// time: fresh entries get the remaining soft-TTL, stale entries get the
    /// lesser of `stale_ttl` and the time left until hard expiry.
    pub async fn get(&self, key: &CacheKey) -> TieredLookup {
        match self.l0.get(key) {
            SieveLookup::Fresh(mut p, remaining, ttl) => {
                rewrite_ttls(&mut p, remaining);
                return if self.should_refresh_ahead(key, remaining, ttl).await {
                    TieredLookup::FreshHot(p)
                } else {
                    TieredLookup::Fresh(p)
                };
            }
            SieveLookup::Stale(mut p, remaining_to_hard) => {
                self.record_sweep_hit(key).await;
                rewrite_ttls(&mut p, remaining_to_hard.min(self.policy.stale_ttl));
                return TieredLookup::Stale(p);
            }
            SieveLookup::Miss => {}
        }

        let Some(l1) = &self.l1 else {
            return TieredLookup::Miss;
        };
        let Some(entry) = l1.get(key).await else {
            return TieredLookup::Miss;
        };

        let now = SystemTime::now();
        let original_ttl = entry
            .expires_at
            .duration_since(entry.cached_at)
            .unwrap_or(self.policy.max_grace);
        let grace = original_ttl.min(self.policy.max_grace);
        let hard_expiry = entry.expires_at + grace;
        if now >= hard_expiry {
            return TieredLookup::Miss;
        }

        let remaining = entry.expires_at.duration_since(now).unwrap_or(Duration::ZERO);
        debug!("L1 promote to L0: {}", key);
        self.l0.set(key.clone(), entry.packet.clone(), remaining.max(Duration::from_secs(1)));

        let mut response = entry.packet;
        if remaining.is_zero() {
            self.record_sweep_hit(key).await;
            let remaining_to_hard = hard_expiry.duration_since(now).unwrap_or(Duration::ZERO);
            rewrite_ttls(&mut response, remaining_to_hard.min(self.policy.stale_ttl));
            TieredLookup::Stale(response)
        } else {
            rewrite_ttls(&mut response, remaining);
            if self.should_refresh_ahead(key, remaining, original_ttl).await {
                TieredLookup::FreshHot(response)
            } else {
                TieredLookup::Fresh(response)
            }
        }
    }

    /// Increment the long-window hit counter the sweeper's `sweep_min_hits`
    /// check reads, independent of the short `hit_window` counter
    /// `should_refresh_ahead` uses.
    async fn record_sweep_hit(&self, key: &CacheKey) {
        if let Some(l1) = &self.l1 {
            let _ = l1.record_hit(key, self.policy.sweep_hit_window).await;
        }
    }

    /// Write-through: L0 always, L1 when configured, plus the L1 expiry
    /// index so the sweeper can find this entry again.
    pub async fn put(&self, key: CacheKey, response: DNSPacket, ttl: Duration) {
        self.l0.set(key.clone(), response.clone(), ttl);

        if let Some(l1) = &self.l1 {
            let now = SystemTime::now();
            let entry = CachedEntry {
                packet: response,
                expires_at: now + ttl,
                cached_at: now,
            };
            if let Err(e) = l1.set_tiered(&key, entry, now + ttl).await {
                debug!("L1 write failed for {}: {}", key, e);
            }
        }
    }

    /// Record a read for refresh-ahead accounting; returns true when the
    /// entry is hot enough (per [`RefreshAheadPolicy`]) that the caller
    /// should proactively schedule a refresh even though it's still fresh.
    pub async fn should_refresh_ahead(&self, key: &CacheKey, remaining: Duration, ttl: Duration) -> bool {
        let Some(l1) = &self.l1 else {
            return false;
        };
        let hits = l1.record_hit(key, self.policy.hit_window).await.unwrap_or(0);
        if hits < self.policy.hot_hit_threshold {
            return false;
        }
        if ttl.is_zero() {
            return false;
        }
        let remaining_fraction = remaining.as_secs_f64() / ttl.as_secs_f64();
        remaining_fraction <= self.policy.hot_fraction
    }

    pub fn l0_stats(&self) -> super::sieve::SieveStats {
        self.l0.stats()
    }

    pub fn l0(&self) -> &SharedSieveCache {
        &self.l0
    }
}
