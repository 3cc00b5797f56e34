//! In-process L0 cache: sharded, SIEVE-evicted, wire-form response cache.
//!
//! Replaces the naive insertion-order LRU in [`super::DnsCache`] with a
//! scan-resistant eviction policy whose hot read path needs only a shared
//! lock plus a single atomic store. Each shard owns an independent FIFO ring
//! and hand index, so contention is bounded by shard count rather than a
//! single global lock.

use super::CacheKey;
use crate::dns::DNSPacket;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default number of shards; a small multiple of typical core counts.
pub const DEFAULT_SHARDS: usize = 16;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Inline FNV-1a over the fingerprint's components (qname, qtype, qclass),
/// used for shard selection. Chosen over `SipHash` (`DefaultHasher`) for its
/// near-zero per-byte cost on the hot `get`/`set` path.
fn fnv1a_fingerprint(key: &CacheKey) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key.domain.as_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    for &byte in u16::from(key.record_type).to_le_bytes().iter() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    for &byte in u16::from(key.record_class).to_le_bytes().iter() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Cache entry carrying the soft/hard-expiry pair from the data model:
/// `now <= soft_expiry <= hard_expiry`. Past `hard_expiry` the entry is
/// invisible to lookups and is removed opportunistically.
struct SieveEntry {
    key: CacheKey,
    response: DNSPacket,
    ttl: Duration,
    soft_expiry: Instant,
    hard_expiry: Instant,
    visited: AtomicBool,
}

/// Outcome of a [`ShardedSieveCache::get`] lookup.
pub enum SieveLookup {
    /// No entry, or entry past hard expiry.
    Miss,
    /// Entry within soft expiry; fresh. Carries the remaining soft-TTL and
    /// the entry's original TTL, so callers can decide on refresh-ahead.
    Fresh(DNSPacket, Duration, Duration),
    /// Entry past soft expiry but within hard expiry; caller should serve
    /// this and schedule a background refresh. Carries the time remaining
    /// until hard expiry, so the caller can cap the TTL it re-serves with.
    Stale(DNSPacket, Duration),
}

struct Shard {
    /// FIFO ring: index order is insertion order, the `hand` sweeps it for
    /// SIEVE eviction. Evicted/removed slots are left as `None` and
    /// reclaimed lazily; `compact` is run when the slop grows too large.
    entries: Vec<Option<SieveEntry>>,
    index: std::collections::HashMap<CacheKey, usize>,
    hand: usize,
    capacity: usize,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: std::collections::HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
        }
    }

    fn live_len(&self) -> usize {
        self.index.len()
    }

    fn get(&self, key: &CacheKey) -> Option<(Instant, Instant, Duration, DNSPacket)> {
        let idx = *self.index.get(key)?;
        let entry = self.entries[idx].as_ref()?;
        if Instant::now() >= entry.hard_expiry {
            return None;
        }
        entry.visited.store(true, Ordering::Release);
        Some((entry.soft_expiry, entry.hard_expiry, entry.ttl, entry.response.clone()))
    }

    fn remove_expired(&mut self, key: &CacheKey) {
        if let Some(idx) = self.index.remove(key) {
            self.entries[idx] = None;
        }
    }

    /// Returns `true` if inserting this key required evicting an existing
    /// entry (i.e. the shard was at capacity and this is a new key, not a
    /// replace of an existing one).
    fn set(
        &mut self,
        key: CacheKey,
        response: DNSPacket,
        ttl: Duration,
        soft_expiry: Instant,
        hard_expiry: Instant,
    ) -> bool {
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx] = Some(SieveEntry {
                key,
                response,
                ttl,
                soft_expiry,
                hard_expiry,
                // Freshly written data hasn't been read yet, so it starts
                // out unvisited just like a brand-new insert below, and is
                // the next eviction candidate the hand encounters.
                visited: AtomicBool::new(false),
            });
            return false;
        }

        let evicted = if self.live_len() >= self.capacity {
            self.evict_one()
        } else {
            false
        };

        self.entries.push(Some(SieveEntry {
            key: key.clone(),
            response,
            ttl,
            soft_expiry,
            hard_expiry,
            visited: AtomicBool::new(false),
        }));
        let idx = self.entries.len() - 1;
        self.index.insert(key, idx);

        if self.entries.len() > self.capacity * 2 {
            self.compact();
        }

        evicted
    }

    /// SIEVE eviction: starting from `hand`, inspect the slot; if visited,
    /// clear it and advance; if unvisited (or empty/already-removed), evict
    /// and stop. Wraps tail -> head. Unlike a single bounded sweep, this
    /// keeps going past a pass that only clears bits — once every visited
    /// bit in the ring has been cleared, the very next slot encountered is
    /// guaranteed unvisited, so this always removes exactly one entry
    /// (amortized O(1); worst case two passes over the ring). `hand`
    /// persists across calls so each eviction resumes where the last left
    /// off.
    fn evict_one(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let len = self.entries.len();
        // Bounded defensively at 2 full sweeps: after the first pass every
        // visited bit has been cleared, so the second pass's first
        // encountered live entry is always evicted.
        for _ in 0..(2 * len + 1) {
            if self.hand >= len {
                self.hand = 0;
            }
            let pos = self.hand;
            self.hand = (self.hand + 1) % len;

            match &self.entries[pos] {
                None => continue,
                Some(entry) => {
                    if entry.visited.swap(false, Ordering::AcqRel) {
                        continue;
                    }
                    let victim_key = entry.key.clone();
                    self.index.remove(&victim_key);
                    self.entries[pos] = None;
                    return true;
                }
            }
        }

        false
    }

    /// Drop `None` slots and rebuild the index, keeping the entries vector
    /// from growing unbounded with tombstones from replaced/evicted keys.
    fn compact(&mut self) {
        let mut new_entries = Vec::with_capacity(self.capacity);
        let mut new_index = std::collections::HashMap::with_capacity(self.capacity);
        for entry in self.entries.drain(..).flatten() {
            new_index.insert(entry.key.clone(), new_entries.len());
            new_entries.push(Some(entry));
        }
        self.hand = 0;
        self.entries = new_entries;
        self.index = new_index;
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.hand = 0;
    }
}

/// Sharded SIEVE-evicted in-process cache of wire-form DNS responses.
pub struct ShardedSieveCache {
    shards: Vec<RwLock<Shard>>,
    shard_mask: u64,
    max_grace: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
}

impl ShardedSieveCache {
    /// `max_entries` is split evenly across `shard_count` shards (rounded up
    /// to the next power of two so the shard index can be a mask).
    pub fn new(max_entries: usize, shard_count: usize, max_grace: Duration) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let per_shard = (max_entries / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(Shard::new(per_shard)))
            .collect();

        Self {
            shards,
            shard_mask: (shard_count - 1) as u64,
            max_grace,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(max_entries: usize) -> Self {
        Self::new(max_entries, DEFAULT_SHARDS, Duration::from_secs(3600))
    }

    fn shard_for(&self, key: &CacheKey) -> &RwLock<Shard> {
        let idx = (fnv1a_fingerprint(key) & self.shard_mask) as usize;
        &self.shards[idx]
    }

    /// Hot path: shared read lock, single atomic store on hit.
    pub fn get(&self, key: &CacheKey) -> SieveLookup {
        let shard = self.shard_for(key);
        let hit = {
            let guard = shard.read();
            guard.get(key)
        };

        match hit {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                SieveLookup::Miss
            }
            Some((soft_expiry, hard_expiry, ttl, response)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let now = Instant::now();
                if now < soft_expiry {
                    let remaining = soft_expiry - now;
                    SieveLookup::Fresh(response, remaining, ttl)
                } else {
                    self.stale_hits.fetch_add(1, Ordering::Relaxed);
                    let remaining_to_hard = hard_expiry.saturating_duration_since(now);
                    SieveLookup::Stale(response, remaining_to_hard)
                }
            }
        }
    }

    /// Insert or replace an entry. `ttl` is the record's soft TTL; hard
    /// expiry extends it by `grace = min(ttl, max_grace)`.
    pub fn set(&self, key: CacheKey, response: DNSPacket, ttl: Duration) {
        let now = Instant::now();
        let grace = ttl.min(self.max_grace);
        let soft_expiry = now + ttl;
        let hard_expiry = soft_expiry + grace;

        let shard = self.shard_for(&key);
        let evicted = shard.write().set(key, response, ttl, soft_expiry, hard_expiry);
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        let shard = self.shard_for(key);
        shard.write().remove_expired(key);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().live_len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SieveStats {
        SieveStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SieveStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Convenience alias for the `Arc`-wrapped cache as typically shared across
/// the resolver and background tasks.
pub type SharedSieveCache = Arc<ShardedSieveCache>;
