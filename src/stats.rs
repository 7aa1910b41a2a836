//! Install statistics and fetch counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Statistics for a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStats {
    /// Partition the resources were stored in.
    pub cache_name: String,
    /// Number of resources fetched and stored.
    pub entries: usize,
    /// Total body bytes stored.
    pub total_bytes: u64,
    /// Time from opening the cache, through resolving and fetching every
    /// resource, to the batch being stored.
    pub elapsed: Duration,
}

impl InstallStats {
    /// Returns the average fetch throughput in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Running counters for fetch handling, shared across concurrent requests.
#[derive(Debug)]
pub struct FetchCounters {
    started: Instant,
    cache_hits: AtomicUsize,
    network_hits: AtomicUsize,
    failures: AtomicUsize,
    bytes_from_cache: AtomicU64,
}

impl Default for FetchCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`FetchCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSnapshot {
    /// Requests answered from a cache partition.
    pub cache_hits: usize,
    /// Requests answered by the network.
    pub network_hits: usize,
    /// Requests that failed.
    pub failures: usize,
    /// Body bytes served from cache.
    pub bytes_from_cache: u64,
    /// Time since the counters were created.
    pub uptime: Duration,
}

impl FetchSnapshot {
    /// Fraction of answered requests served from cache, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let answered = self.cache_hits + self.network_hits;
        if answered == 0 {
            0.0
        } else {
            self.cache_hits as f64 / answered as f64
        }
    }
}

impl std::fmt::Display for FetchSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from cache ({} bytes), {} from network, {} failed, {:.0}% hit ratio, up {}s",
            self.cache_hits,
            self.bytes_from_cache,
            self.network_hits,
            self.failures,
            self.hit_ratio() * 100.0,
            self.uptime.as_secs()
        )
    }
}

impl FetchCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cache_hits: AtomicUsize::new(0),
            network_hits: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            bytes_from_cache: AtomicU64::new(0),
        }
    }

    /// Records a response served from cache.
    pub fn record_cache_hit(&self, bytes: u64) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a response served by the network.
    pub fn record_network_hit(&self) {
        self.network_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed fetch.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self) -> FetchSnapshot {
        FetchSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_hits: self.network_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
        }
    }
}
