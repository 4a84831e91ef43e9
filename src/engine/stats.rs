// Engine counters for cache effectiveness and delivery outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::engine::orchestrator::Phase;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub delivered: u64,
    pub info_failures: u64,
    pub fetch_failures: u64,
    pub persist_failures: u64,
    pub send_failures: u64,
    pub degraded_entries: u64,
    pub downloaded_bytes: u64,
    pub cache_hit_rate: f64,
    pub uptime_secs: u64,
}

pub struct StatsCollector {
    started: Instant,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    delivered: AtomicU64,
    info_failures: AtomicU64,
    fetch_failures: AtomicU64,
    persist_failures: AtomicU64,
    send_failures: AtomicU64,
    degraded_entries: AtomicU64,
    downloaded_bytes: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            info_failures: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            degraded_entries: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry was persisted without its metadata record.
    pub fn record_degraded_entry(&self) {
        self.degraded_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a terminal failure in `phase`.
    pub fn record_failure(&self, phase: Phase) {
        let counter = match phase {
            Phase::InfoExtraction => &self.info_failures,
            Phase::MediaFetch => &self.fetch_failures,
            Phase::Persist => &self.persist_failures,
            Phase::Send => &self.send_failures,
            Phase::Init | Phase::CacheLookup => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let cache_hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        StatsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            delivered: self.delivered.load(Ordering::Relaxed),
            info_failures: self.info_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            degraded_entries: self.degraded_entries.load(Ordering::Relaxed),
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
            cache_hit_rate,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
