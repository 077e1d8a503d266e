//! Pluggable memory-tier eviction policies.

use crate::memory::MemoryEntry;
use std::time::{Duration, Instant};

/// Decides when a resident entry is dead. The size cap (evict oldest
/// `last_accessed` while over budget) is enforced by the tier itself and
/// applies under every policy.
pub trait EvictionPolicy: Send + Sync {
    /// Whether the entry must be evicted on access.
    fn is_dead(&self, entry: &MemoryEntry, now: Instant) -> bool;

    /// Policy name for stats and logs.
    fn name(&self) -> &'static str;
}

/// Pure LRU: entries never expire; only the size cap evicts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn is_dead(&self, _entry: &MemoryEntry, _now: Instant) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// TTL: an entry is dead once `now - created_at` exceeds the ttl. The
/// LRU size cap still applies.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    ttl: Duration,
}

impl TtlPolicy {
    /// Policy with the given time-to-live.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn is_dead(&self, entry: &MemoryEntry, now: Instant) -> bool {
        now.duration_since(entry.created_at) > self.ttl
    }

    fn name(&self) -> &'static str {
        "ttl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntry;
    use flowmetric_types::{MetricsBundle, MetricsMetadata};
    use std::sync::Arc;

    fn entry(created_at: Instant) -> MemoryEntry {
        MemoryEntry {
            payload: Arc::new(MetricsBundle {
                teams: vec![],
                persons: vec![],
                comparison: vec![],
                metadata: MetricsMetadata {
                    generated_at: chrono::Utc::now(),
                    range_spec: "30d".to_string(),
                    environment: "default".to_string(),
                },
                partial: false,
            }),
            created_at,
            last_accessed: created_at,
            hits: 0,
            size_bytes: 128,
        }
    }

    #[test]
    fn test_lru_never_expires() {
        let policy = LruPolicy;
        let old = Instant::now() - Duration::from_secs(86_400);
        assert!(!policy.is_dead(&entry(old), Instant::now()));
    }

    #[test]
    fn test_ttl_expires_after_ttl() {
        let policy = TtlPolicy::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(!policy.is_dead(&entry(now), now + Duration::from_secs(59)));
        assert!(policy.is_dead(&entry(now), now + Duration::from_secs(61)));
    }
}
