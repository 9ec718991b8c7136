use aya_ebpf::{
    macros::map,
    maps::{Array, LruHashMap},
};
use sockredir_common::table::{ConfigSource, CorrelationTable, TableError};
use sockredir_common::{Endpoint, ProxyConfig, MAX_CONNECTIONS};

/// Configuration array (single entry at index 0), written by the loader.
#[map]
pub static CONFIG: Array<ProxyConfig> = Array::with_max_entries(1, 0);

/// Original destination keyed by socket cookie.
#[map]
pub static SOCKETS: LruHashMap<u64, Endpoint> = LruHashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// Local source port of a redirected socket to its cookie.
#[map]
pub static PORTS: LruHashMap<u16, u64> = LruHashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// Cookie of the proxy's accepted socket to the cookie of its client.
#[map]
pub static PEERS: LruHashMap<u64, u64> = LruHashMap::with_max_entries(MAX_CONNECTIONS, 0);

/// `CorrelationTable` over a BPF LRU hash map.
pub struct BpfTable<K: 'static, V: 'static>(pub &'static LruHashMap<K, V>);

impl<K, V: Copy> CorrelationTable<K, V> for BpfTable<K, V> {
    #[inline(always)]
    fn lookup(&self, key: &K) -> Option<V> {
        unsafe { self.0.get(key).copied() }
    }

    #[inline(always)]
    fn upsert(&self, key: &K, value: &V) -> Result<(), TableError> {
        self.0.insert(key, value, 0).map_err(|e| TableError(e as i64))
    }

    #[inline(always)]
    fn remove(&self, key: &K) -> Result<(), TableError> {
        self.0.remove(key).map_err(|e| TableError(e as i64))
    }
}

pub struct BpfConfig;

impl ConfigSource for BpfConfig {
    #[inline(always)]
    fn load(&self) -> Option<ProxyConfig> {
        CONFIG.get(0).copied()
    }
}
