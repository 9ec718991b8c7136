//! In-memory counterparts of the kernel maps.
//!
//! These implement the same traits as the BPF maps, so the hook handlers in
//! `sockredir_common::hooks` run unchanged on the host.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sockredir_common::table::{ConfigSource, CorrelationTable, TableError};
use sockredir_common::ProxyConfig;

#[derive(Debug, Clone, Copy)]
struct Slot<V> {
    value: V,
    written: u64,
}

/// Bounded concurrent correlation table.
///
/// Per-key operations are atomic. When a new key arrives at capacity the
/// least recently written entry is evicted, like the kernel's LRU hash. The
/// bound is exact for a single writer; concurrent writers may overshoot it
/// briefly.
pub struct CorrelationMap<K, V> {
    entries: DashMap<K, Slot<V>>,
    capacity: usize,
    clock: AtomicU64,
}

impl<K, V> CorrelationMap<K, V>
where
    K: Eq + Hash + Copy,
    V: Copy,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().written)
            .map(|entry| *entry.key());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl<K, V> CorrelationTable<K, V> for CorrelationMap<K, V>
where
    K: Eq + Hash + Copy,
    V: Copy,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|slot| slot.value)
    }

    fn upsert(&self, key: &K, value: &V) -> Result<(), TableError> {
        let written = self.clock.fetch_add(1, Ordering::Relaxed);

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            *key,
            Slot {
                value: *value,
                written,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<(), TableError> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or(TableError::NOT_FOUND)
    }
}

/// A config record fixed at construction, or absent.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfig(Option<ProxyConfig>);

impl StaticConfig {
    pub fn new(proxy_port: u16, proxy_pid: u64) -> Self {
        Self(Some(ProxyConfig::new(proxy_port, proxy_pid)))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl ConfigSource for StaticConfig {
    fn load(&self) -> Option<ProxyConfig> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_lookup() {
        let table: CorrelationMap<u16, u64> = CorrelationMap::new(8);
        table.upsert(&40000, &7).unwrap();
        assert_eq!(table.lookup(&40000), Some(7));

        table.upsert(&40000, &8).unwrap();
        assert_eq!(table.lookup(&40000), Some(8));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let table: CorrelationMap<u16, u64> = CorrelationMap::new(8);
        table.upsert(&1, &1).unwrap();
        assert_eq!(table.remove(&1), Ok(()));
        assert_eq!(table.remove(&1), Err(TableError::NOT_FOUND));
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_written() {
        let table: CorrelationMap<u64, u64> = CorrelationMap::new(3);
        for cookie in 1..=3 {
            table.upsert(&cookie, &cookie).unwrap();
        }
        // Rewriting 1 makes 2 the oldest.
        table.upsert(&1, &10).unwrap();
        table.upsert(&4, &4).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(&2), None);
        assert_eq!(table.lookup(&1), Some(10));
        assert_eq!(table.lookup(&4), Some(4));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let table: CorrelationMap<u64, u64> = CorrelationMap::new(2);
        table.upsert(&1, &1).unwrap();
        table.upsert(&2, &2).unwrap();
        table.upsert(&2, &3).unwrap();
        assert_eq!(table.lookup(&1), Some(1));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_zero_capacity_holds_one_entry() {
        let table: CorrelationMap<u64, u64> = CorrelationMap::new(0);
        assert_eq!(table.capacity(), 1);

        table.upsert(&1, &1).unwrap();
        table.upsert(&2, &2).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&2), Some(2));
    }

    #[test]
    fn test_static_config() {
        assert_eq!(
            StaticConfig::new(15001, 9).load(),
            Some(ProxyConfig::new(15001, 9))
        );
        assert_eq!(StaticConfig::missing().load(), None);
    }
}
