use crate::core::bucket::BucketState;
use std::time::SystemTime;

mod memory;

pub use memory::{MemoryStore, MemoryStoreBuilder};

#[cfg(test)]
mod tests;

/// Storage backend for bucket state
///
/// Keys are opaque strings; the server fuses them as `"{type}/{key}"`.
/// Every operation is single-key. Implementations are not required to be
/// thread-safe: the caller owning the engine serializes access (the
/// server does this with a single-writer actor), which is what makes
/// same-key operations linearizable.
///
/// Entries carry an expiry timestamp. An expired entry must read back as
/// absent; reclaiming its memory may happen lazily.
pub trait Store {
    /// Get the live state for a key, or `None` if absent or expired
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<BucketState>, String>;

    /// Insert or replace the state for a key, expiring at `expires_at`
    fn set(
        &mut self,
        key: &str,
        state: BucketState,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<(), String>;

    /// Delete the state for a key, returning whether a live entry existed
    fn remove(&mut self, key: &str) -> Result<bool, String>;

    /// Collect up to `limit` live entries whose key starts with `prefix`
    fn scan_prefix(
        &self,
        prefix: &str,
        limit: usize,
        now: SystemTime,
    ) -> Result<Vec<(String, BucketState)>, String>;
}
