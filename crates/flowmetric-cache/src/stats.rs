//! Running cache counters, exposed via the stats endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters; snapshots are taken for the HTTP surface.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot with derived fields filled in by the store.
    #[must_use]
    pub fn snapshot(&self, current_bytes: u64, entry_count: usize) -> CacheStatsSnapshot {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.disk_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = memory_hits + disk_hits + misses;
        CacheStatsSnapshot {
            memory_hits,
            disk_hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            current_bytes,
            entry_count,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (memory_hits + disk_hits) as f64 / lookups as f64
            },
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    /// Lookups answered from memory.
    pub memory_hits: u64,
    /// Lookups answered from disk (promotions).
    pub disk_hits: u64,
    /// Lookups answered by nobody.
    pub misses: u64,
    /// Entries evicted (policy or size cap).
    pub evictions: u64,
    /// Inserts into the memory tier.
    pub sets: u64,
    /// Resident bytes.
    pub current_bytes: u64,
    /// Resident entries.
    pub entry_count: usize,
    /// (memory + disk hits) / lookups.
    pub hit_rate: f64,
}
