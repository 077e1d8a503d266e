//! Hot in-memory tier.

use crate::policy::EvictionPolicy;
use flowmetric_types::MetricsBundle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One resident entry with its bookkeeping.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// The payload, shared zero-copy with readers.
    pub payload: Arc<MetricsBundle>,
    /// Insertion time.
    pub created_at: Instant,
    /// Last access time (insertions count as access).
    pub last_accessed: Instant,
    /// Access count.
    pub hits: u64,
    /// Encoded payload size used against the byte budget.
    pub size_bytes: u64,
}

/// Outcome of a memory-tier lookup.
pub enum MemoryLookup {
    /// Alive entry.
    Hit(Arc<MetricsBundle>),
    /// A resident entry was dead and has been evicted; fall through to
    /// disk.
    Expired,
    /// Nothing resident.
    Miss,
}

/// The memory tier. One mutex guards all mutations; critical sections
/// are short and never cross I/O.
pub struct MemoryTier {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    policy: Box<dyn EvictionPolicy>,
    max_bytes: u64,
}

impl MemoryTier {
    /// Tier with a policy and a byte budget.
    #[must_use]
    pub fn new(policy: Box<dyn EvictionPolicy>, max_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            max_bytes,
        }
    }

    /// Look up a key, applying the liveness policy. Returns the number
    /// of evictions performed alongside the outcome.
    pub fn lookup(&self, key: &str, now: Instant) -> (MemoryLookup, u64) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return (MemoryLookup::Miss, 0);
        };
        if self.policy.is_dead(entry, now) {
            entries.remove(key);
            return (MemoryLookup::Expired, 1);
        }
        entry.last_accessed = now;
        entry.hits += 1;
        (MemoryLookup::Hit(Arc::clone(&entry.payload)), 0)
    }

    /// Insert (or replace) an entry, then enforce the byte budget by
    /// evicting oldest-accessed entries. Entries larger than the whole
    /// budget are not admitted. Returns evictions performed.
    pub fn insert(&self, key: String, payload: Arc<MetricsBundle>, size_bytes: u64, now: Instant) -> u64 {
        if size_bytes > self.max_bytes {
            return 0;
        }
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            MemoryEntry {
                payload,
                created_at: now,
                last_accessed: now,
                hits: 0,
                size_bytes,
            },
        );
        Self::enforce_budget(&mut entries, self.max_bytes)
    }

    /// Drop one key. Returns whether it was resident.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop everything. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Resident entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Total resident bytes.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.entries.lock().values().map(|e| e.size_bytes).sum()
    }

    /// Resident keys (warm/introspection).
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Policy name for stats.
    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn enforce_budget(entries: &mut HashMap<String, MemoryEntry>, max_bytes: u64) -> u64 {
        let mut evictions = 0;
        while entries.values().map(|e| e.size_bytes).sum::<u64>() > max_bytes {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    entries.remove(&key);
                    evictions += 1;
                }
                None => break,
            }
        }
        evictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{LruPolicy, TtlPolicy};
    use flowmetric_types::MetricsMetadata;
    use std::time::Duration;

    fn bundle() -> Arc<MetricsBundle> {
        Arc::new(MetricsBundle {
            teams: vec![],
            persons: vec![],
            comparison: vec![],
            metadata: MetricsMetadata {
                generated_at: chrono::Utc::now(),
                range_spec: "30d".to_string(),
                environment: "default".to_string(),
            },
            partial: false,
        })
    }

    #[test]
    fn test_hit_bumps_counters() {
        let tier = MemoryTier::new(Box::new(LruPolicy), 1024);
        let now = Instant::now();
        tier.insert("k".to_string(), bundle(), 100, now);

        let (outcome, evicted) = tier.lookup("k", now + Duration::from_secs(1));
        assert!(matches!(outcome, MemoryLookup::Hit(_)));
        assert_eq!(evicted, 0);

        let entries = tier.entries.lock();
        let entry = entries.get("k").unwrap();
        assert_eq!(entry.hits, 1);
        assert!(entry.last_accessed > entry.created_at);
    }

    #[test]
    fn test_miss() {
        let tier = MemoryTier::new(Box::new(LruPolicy), 1024);
        let (outcome, _) = tier.lookup("absent", Instant::now());
        assert!(matches!(outcome, MemoryLookup::Miss));
    }

    #[test]
    fn test_ttl_expiry_falls_through() {
        let tier = MemoryTier::new(Box::new(TtlPolicy::new(Duration::from_secs(10))), 1024);
        let now = Instant::now();
        tier.insert("k".to_string(), bundle(), 100, now);

        let (outcome, evicted) = tier.lookup("k", now + Duration::from_secs(11));
        assert!(matches!(outcome, MemoryLookup::Expired));
        assert_eq!(evicted, 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_size_cap_evicts_oldest_accessed() {
        let tier = MemoryTier::new(Box::new(LruPolicy), 250);
        let base = Instant::now();
        tier.insert("a".to_string(), bundle(), 100, base);
        tier.insert("b".to_string(), bundle(), 100, base + Duration::from_secs(1));
        // Touch "a" so "b" becomes the LRU victim.
        tier.lookup("a", base + Duration::from_secs(2));

        let evicted = tier.insert("c".to_string(), bundle(), 100, base + Duration::from_secs(3));
        assert_eq!(evicted, 1);
        let keys = tier.keys();
        assert!(keys.contains(&"a".to_string()));
        assert!(!keys.contains(&"b".to_string()));
        assert!(keys.contains(&"c".to_string()));
    }

    #[test]
    fn test_oversized_entry_not_admitted() {
        let tier = MemoryTier::new(Box::new(LruPolicy), 100);
        let evicted = tier.insert("big".to_string(), bundle(), 500, Instant::now());
        assert_eq!(evicted, 0);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_clear() {
        let tier = MemoryTier::new(Box::new(LruPolicy), 1024);
        tier.insert("a".to_string(), bundle(), 10, Instant::now());
        tier.insert("b".to_string(), bundle(), 10, Instant::now());
        assert_eq!(tier.clear(), 2);
        assert_eq!(tier.current_bytes(), 0);
    }
}
