//! Seams between the hook handlers and the shared state they use.
//!
//! In the kernel these are BPF maps; on the host they are in-memory maps.
//! Every operation is atomic per key and nothing spans more than one key.

use crate::ProxyConfig;

/// Errno-style failure code reported by a table operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableError(pub i64);

impl TableError {
    pub const NOT_FOUND: TableError = TableError(-2);
    pub const FULL: TableError = TableError(-7);
}

/// A concurrent key-value store shared by all hook invocations.
pub trait CorrelationTable<K, V> {
    fn lookup(&self, key: &K) -> Option<V>;

    /// Insert or overwrite.
    fn upsert(&self, key: &K, value: &V) -> Result<(), TableError>;

    fn remove(&self, key: &K) -> Result<(), TableError>;
}

/// Source of the singleton configuration record.
pub trait ConfigSource {
    fn load(&self) -> Option<ProxyConfig>;
}
