//! Refresh coordination: keeps concurrent proactive/stale refreshes of the
//! same [`CacheKey`] from stampeding the upstream, both within this process
//! and across a fleet sharing the same L1.
//!
//! In-process dedup mirrors [`crate::resolver::DnsResolver`]'s in-flight
//! query join (a `DashMap` guarding a single outstanding task per key); the
//! cross-fleet half layers a Redis `SET NX PX` lock on top so only one node
//! performs the actual upstream fetch while refreshing an entry every other
//! node is also about to serve stale.

use crate::cache::{CacheKey, TieredCache};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How long a distributed lock is held before it's assumed abandoned and
/// another node may take over the refresh.
const LOCK_TTL: Duration = Duration::from_secs(10);

/// Token identifying this process as a lock holder, so a lock release never
/// clobbers a lock some other node has since acquired after ours expired.
fn lock_token() -> String {
    let pid = std::process::id();
    let salt: u64 = rand::rng().random();
    format!("{pid}-{salt:x}")
}

/// Held by whichever task won the right to refresh `key`. Dropping it clears
/// the in-process claim; [`RefreshPermit::release`] also drops the
/// cross-fleet lock, if one was taken.
pub struct RefreshPermit<'a> {
    coordinator: &'a RefreshCoordinator,
    key: CacheKey,
    token: String,
    distributed: bool,
}

impl RefreshPermit<'_> {
    pub async fn release(self) {
        if self.distributed {
            if let Some(l1) = self.coordinator.cache.l1() {
                l1.release_lock(&self.key, &self.token).await;
            }
        }
        self.coordinator.in_flight.remove(&self.key);
    }
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        self.coordinator.in_flight.remove(&self.key);
    }
}

/// Coordinates background refreshes for the tiered cache.
pub struct RefreshCoordinator {
    cache: Arc<TieredCache>,
    in_flight: DashMap<CacheKey, ()>,
}

impl RefreshCoordinator {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            cache,
            in_flight: DashMap::new(),
        }
    }

    /// Attempt to claim the right to refresh `key`. Returns `None` if
    /// another task in this process, or another node in the fleet, already
    /// holds the claim.
    pub async fn try_begin(&self, key: &CacheKey) -> Option<RefreshPermit<'_>> {
        if self.in_flight.insert(key.clone(), ()).is_some() {
            trace!("refresh already in-flight locally for {}", key);
            return None;
        }

        let token = lock_token();
        let distributed = if let Some(l1) = self.cache.l1() {
            if !l1.try_acquire_lock(key, LOCK_TTL, &token).await {
                debug!("refresh lock held by another node for {}", key);
                self.in_flight.remove(key);
                return None;
            }
            true
        } else {
            false
        };

        Some(RefreshPermit {
            coordinator: self,
            key: key.clone(),
            token,
            distributed,
        })
    }
}
