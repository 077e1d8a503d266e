//! The two-tier store and its event wiring.

use crate::artifact::{decode_artifact, encode_artifact, write_atomic, Artifact, ArtifactHeader};
use crate::key::CacheKey;
use crate::memory::{MemoryLookup, MemoryTier};
use crate::policy::EvictionPolicy;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use dashmap::DashMap;
use flowmetric_error::{FlowError, Result};
use flowmetric_events::{Event, EventBus, EventType};
use flowmetric_types::MetricsBundle;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Two-tier metrics cache.
///
/// `get` consults memory first, then disk; disk reads and writes are
/// serialized per key so at most one build/load runs concurrently for
/// any key. Collection jobs call [`MetricsCache::persist`]; the server
/// only ever reads and promotes.
pub struct MetricsCache {
    dir: PathBuf,
    memory: MemoryTier,
    stats: CacheStats,
    disk_locks: DashMap<String, Arc<Mutex<()>>>,
    max_artifacts: usize,
}

impl MetricsCache {
    /// Store rooted at `dir`, keeping at most `max_artifacts` files.
    #[must_use]
    pub fn new(
        dir: PathBuf,
        policy: Box<dyn EvictionPolicy>,
        memory_max_bytes: u64,
        max_artifacts: usize,
    ) -> Self {
        Self {
            dir,
            memory: MemoryTier::new(policy, memory_max_bytes),
            stats: CacheStats::default(),
            disk_locks: DashMap::new(),
            max_artifacts,
        }
    }

    /// Lookup. Memory hit → return; dead entry → evict, fall through;
    /// disk hit → promote (with admission) and return; otherwise miss.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<MetricsBundle>> {
        let now = Instant::now();
        let (outcome, evicted) = self.memory.lookup(&key.memory_key(), now);
        self.stats.record_evictions(evicted);

        match outcome {
            MemoryLookup::Hit(payload) => {
                self.stats.record_memory_hit();
                return Some(payload);
            }
            MemoryLookup::Expired | MemoryLookup::Miss => {}
        }

        match self.load_from_disk(key) {
            Ok(Some(payload)) => {
                self.stats.record_disk_hit();
                Some(payload)
            }
            Ok(None) => {
                self.stats.record_miss();
                None
            }
            Err(e) => {
                // Corrupt artifacts are logged and treated as missing.
                warn!(key = %key, error = %e, "artifact unreadable; treating as miss");
                self.stats.record_miss();
                None
            }
        }
    }

    /// Write a new artifact for `key` (atomically, fsynced) and promote
    /// its payload into memory. Returns the artifact path.
    ///
    /// # Errors
    ///
    /// `Internal` on encode or I/O failure.
    pub fn persist(&self, key: &CacheKey, header: ArtifactHeader, payload: MetricsBundle) -> Result<PathBuf> {
        let path = self.artifact_path(key);
        let artifact = Artifact {
            header,
            payload,
        };
        let bytes = encode_artifact(&artifact)?;

        {
            let lock = self.disk_lock(key);
            let _guard = lock.lock();
            write_atomic(&path, &bytes)?;
        }

        let payload = Arc::new(artifact.payload);
        let evicted = self.memory.insert(
            key.memory_key(),
            Arc::clone(&payload),
            bytes.len() as u64,
            Instant::now(),
        );
        self.stats.record_evictions(evicted);
        self.stats.record_set();

        if let Err(e) = self.prune_artifacts() {
            warn!(error = %e, "artifact pruning failed");
        }
        info!(key = %key, bytes = bytes.len(), "artifact persisted");
        Ok(path)
    }

    /// Force a reload of `key` from disk into memory, evicting any
    /// resident entry first. Returns whether an artifact was found.
    ///
    /// # Errors
    ///
    /// `CacheCorrupt` when the artifact exists but cannot be decoded.
    pub fn reload(&self, key: &CacheKey) -> Result<bool> {
        self.memory.remove(&key.memory_key());
        Ok(self.load_from_disk(key)?.is_some())
    }

    /// Drop the memory entry for `key`. The artifact stays on disk.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        debug!(key = %key, "invalidating memory entry");
        self.memory.remove(&key.memory_key())
    }

    /// Drop all memory entries. Returns how many were dropped.
    pub fn clear_memory(&self) -> usize {
        let dropped = self.memory.clear();
        self.stats.record_evictions(dropped as u64);
        dropped
    }

    /// Pre-load the given keys into memory. Returns how many loaded.
    pub fn warm(&self, keys: &[CacheKey]) -> usize {
        let mut warmed = 0;
        for key in keys {
            match self.load_from_disk(key) {
                Ok(Some(_)) => warmed += 1,
                Ok(None) => debug!(key = %key, "warm skipped: no artifact"),
                Err(e) => warn!(key = %key, error = %e, "warm failed"),
            }
        }
        warmed
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats
            .snapshot(self.memory.current_bytes(), self.memory.len())
    }

    /// Subscribe the cache to invalidation events. Handlers are
    /// synchronous: after `publish(DATA_COLLECTED, k)` returns, the next
    /// `get(k)` observes the new artifact.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let cache = Arc::clone(self);
        bus.subscribe(EventType::DataCollected, "cache-reload", move |event| {
            let key = event_key(event)?;
            cache.reload(&key)?;
            Ok(())
        });

        let cache = Arc::clone(self);
        bus.subscribe(EventType::ConfigChanged, "cache-config", move |event| {
            // Scores live inside stored payloads, so any scoring-scope
            // change invalidates everything resident.
            let scope = event.scope.as_deref().unwrap_or("all");
            if matches!(scope, "all" | "performanceWeights" | "scoring") {
                let dropped = cache.clear_memory();
                info!(scope, dropped, "memory tier invalidated by config change");
            }
            Ok(())
        });

        let cache = Arc::clone(self);
        bus.subscribe(EventType::ManualRefresh, "cache-refresh", move |event| {
            // The payload cannot be rebuilt without re-collection, so
            // the key is left absent until the refresh job lands.
            let key = event_key(event)?;
            cache.invalidate(&key);
            Ok(())
        });
    }

    /// Artifact file path for a key.
    #[must_use]
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Delete oldest artifacts beyond the configured ceiling. Returns
    /// how many files were removed.
    ///
    /// # Errors
    ///
    /// `Internal` when the cache directory cannot be read.
    pub fn prune_artifacts(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("metrics_") && n.ends_with(".bin"));
            if !is_artifact {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            artifacts.push((modified, path));
        }

        if artifacts.len() <= self.max_artifacts {
            return Ok(0);
        }
        artifacts.sort_by_key(|(modified, _)| *modified);
        let excess = artifacts.len() - self.max_artifacts;
        let mut removed = 0;
        for (_, path) in artifacts.into_iter().take(excess) {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn disk_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.disk_locks
            .entry(key.memory_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read + decode + promote. `Ok(None)` when the file is absent.
    fn load_from_disk(&self, key: &CacheKey) -> Result<Option<Arc<MetricsBundle>>> {
        let lock = self.disk_lock(key);
        let _guard = lock.lock();

        let path = self.artifact_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let artifact = decode_artifact(&bytes)?;
        let payload = Arc::new(artifact.payload);

        let evicted = self.memory.insert(
            key.memory_key(),
            Arc::clone(&payload),
            bytes.len() as u64,
            Instant::now(),
        );
        self.stats.record_evictions(evicted);
        Ok(Some(payload))
    }
}

fn event_key(event: &Event) -> Result<CacheKey> {
    let range = event
        .range_spec
        .as_deref()
        .ok_or_else(|| FlowError::Validation("event missing range spec".into()))?;
    let environment = event.environment.as_deref().unwrap_or("default");
    let range = range
        .parse()
        .map_err(|e| FlowError::Validation(format!("event range spec: {e}")))?;
    Ok(CacheKey::new(range, environment))
}
