//! Background sweep of the L1 soft-expiry index, refreshing hot entries
//! before they fall past their hard expiry and would otherwise be served
//! stale or missed entirely.
//!
//! Grounded in [`crate::blocking::updater::BlocklistUpdater::start_auto_update`]'s
//! shape: a `tokio::time::interval` with `MissedTickBehavior::Skip` driving a
//! bounded batch of work per tick, logged and counted for observability.

use crate::cache::{CacheKey, TieredCache};
use crate::refresh::RefreshCoordinator;
use crate::resolver::DnsResolver;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Upper bound on fingerprints inspected per sweep tick, so a large backlog
/// of near-expiry entries can't turn one tick into an unbounded burst of
/// upstream refreshes.
const MAX_BATCH: usize = 200;

/// How far into the future to look for entries nearing soft expiry.
const SWEEP_HORIZON: Duration = Duration::from_secs(30);

/// Minimum `sweep_hit_window` hit count a candidate needs before the sweeper
/// will proactively refresh it.
const SWEEP_MIN_HITS: u64 = 1;

/// How far back per-tick samples are kept for the windowed stats below.
const STATS_WINDOW: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy)]
struct SweepSample {
    at: SystemTime,
    batch_size: u64,
    refreshed: u64,
    removed: u64,
}

#[derive(Debug, Default)]
pub struct SweeperStats {
    pub last_sweep_unix: AtomicU64,
    pub last_sweep_count: AtomicU64,
    samples: parking_lot::Mutex<std::collections::VecDeque<SweepSample>>,
}

impl SweeperStats {
    /// Record one sweep tick's outcome, dropping samples older than
    /// [`STATS_WINDOW`] so the 24h aggregates below stay bounded.
    fn record(&self, batch_size: u64, refreshed: u64, removed: u64) {
        let now = SystemTime::now();
        let mut samples = self.samples.lock();
        samples.push_back(SweepSample {
            at: now,
            batch_size,
            refreshed,
            removed,
        });
        while let Some(front) = samples.front() {
            if now.duration_since(front.at).unwrap_or_default() > STATS_WINDOW {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> SweeperSnapshot {
        let samples = self.samples.lock();
        let refreshed_24h = samples.iter().map(|s| s.refreshed).sum();
        let removed_24h = samples.iter().map(|s| s.removed).sum();
        let batch_sizes: Vec<f64> = samples.iter().map(|s| s.batch_size as f64).collect();

        SweeperSnapshot {
            last_sweep_unix: self.last_sweep_unix.load(Ordering::Relaxed),
            last_sweep_count: self.last_sweep_count.load(Ordering::Relaxed),
            refreshed_24h,
            removed_24h,
            batch_size_stddev_24h: stddev(&batch_sizes),
        }
    }
}

fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweeperSnapshot {
    pub last_sweep_unix: u64,
    pub last_sweep_count: u64,
    pub refreshed_24h: u64,
    pub removed_24h: u64,
    pub batch_size_stddev_24h: f64,
}

/// Periodically scans the L1 expiry index for fingerprints nearing soft
/// expiry, and kicks off a background refresh for the ones hot enough to be
/// worth it. Entries that never got hot simply fall through to stale-serve
/// (or expire) without sweeper involvement.
pub struct Sweeper {
    cache: Arc<TieredCache>,
    refresh: Arc<RefreshCoordinator>,
    resolver: Arc<DnsResolver>,
    interval: Duration,
    stats: Arc<SweeperStats>,
}

impl Sweeper {
    pub fn new(
        cache: Arc<TieredCache>,
        refresh: Arc<RefreshCoordinator>,
        resolver: Arc<DnsResolver>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            refresh,
            resolver,
            interval,
            stats: Arc::new(SweeperStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SweeperStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(self: Arc<Self>) {
        let Some(_l1) = self.cache.l1() else {
            debug!("sweeper disabled: no L1 cache configured");
            return;
        };

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("sweeper started: interval={:?}", self.interval);

        loop {
            tick.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!("sweep tick failed: {}", e);
            }
        }
    }

    async fn sweep_once(&self) -> crate::error::Result<()> {
        let Some(l1) = self.cache.l1() else {
            return Ok(());
        };

        let horizon = SystemTime::now() + SWEEP_HORIZON;
        let candidates = l1.expiring_before(horizon, MAX_BATCH).await?;

        let now = Duration::from_secs(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        );
        self.stats
            .last_sweep_unix
            .store(now.as_secs(), Ordering::Relaxed);
        let candidates_len = candidates.len() as u64;
        self.stats
            .last_sweep_count
            .store(candidates_len, Ordering::Relaxed);

        let mut refreshed = 0u64;
        let mut removed = 0u64;

        for redis_key in candidates {
            let Some(entry) = l1.get_by_redis_key(&redis_key).await else {
                l1.remove_from_expiry_index(&redis_key).await;
                removed += 1;
                continue;
            };

            if entry.is_expired() {
                l1.remove_from_expiry_index(&redis_key).await;
                removed += 1;
                continue;
            }

            let Some(key) = CacheKey::parse_from_redis_suffix(&redis_key) else {
                warn!("sweeper: could not parse cache key from {}", redis_key);
                continue;
            };

            let hits = l1.hit_count(&key, self.cache.policy().sweep_hit_window).await;
            if hits < SWEEP_MIN_HITS {
                continue;
            }

            let Some(permit) = self.refresh.try_begin(&key).await else {
                continue;
            };

            match self.resolver.refresh_entry(&key).await {
                Ok(()) => refreshed += 1,
                Err(e) => debug!("sweeper refresh failed for {}: {}", key, e),
            }
            permit.release().await;
        }

        self.stats
            .record(candidates_len, refreshed, removed);

        debug!(
            "sweep complete: inspected={} refreshed={} removed={}",
            self.stats.last_sweep_count.load(Ordering::Relaxed),
            refreshed,
            removed
        );

        Ok(())
    }
}
