use super::Store;
use crate::core::bucket::BucketState;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Embedded bucket store with periodic expiry sweeps
///
/// Entries are swept at a fixed interval rather than on every operation,
/// keeping the hot path to a single map access. An entry's expiry is the
/// instant its bucket refills to capacity, so the sweep only ever drops
/// state that reads identically to an absent key.
///
/// When built with a snapshot path, [`MemoryStore::persist`] writes the
/// live entries to disk and [`MemoryStoreBuilder::build`] reloads them,
/// giving bucket state continuity across restarts.
pub struct MemoryStore {
    data: AHashMap<String, Entry>,
    path: Option<PathBuf>,
    // Track when the next sweep is due
    next_cleanup: SystemTime,
    cleanup_interval: Duration,
}

#[derive(Clone, Serialize, Deserialize)]
struct Entry {
    state: BucketState,
    expires_at: SystemTime,
}

impl Entry {
    fn live(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }
}

/// On-disk snapshot format, MessagePack-encoded
#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<(String, Entry)>,
}

/// Builder for configuring a MemoryStore
pub struct MemoryStoreBuilder {
    capacity: usize,
    cleanup_interval: Duration,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a store with default capacity and no snapshot path
    pub fn new() -> Self {
        Self::builder().build().expect("in-memory build cannot fail")
    }

    /// Create a new builder
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            path: None,
        }
    }

    /// Number of entries currently held, including not-yet-swept expired ones
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write live entries to the snapshot path, if one was configured
    ///
    /// The snapshot is written to a sibling temp file and renamed into
    /// place so a crash mid-write never leaves a torn snapshot.
    pub fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let now = SystemTime::now();
        let snapshot = Snapshot {
            entries: self
                .data
                .iter()
                .filter(|(_, entry)| entry.live(now))
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
        };

        let bytes = rmp_serde::to_vec(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load(path: &Path, now: SystemTime) -> io::Result<AHashMap<String, Entry>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AHashMap::new()),
            Err(e) => return Err(e),
        };

        let snapshot: Snapshot = rmp_serde::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(snapshot
            .entries
            .into_iter()
            .filter(|(_, entry)| entry.live(now))
            .collect())
    }

    fn maybe_clean_expired(&mut self, now: SystemTime) {
        if now >= self.next_cleanup {
            self.data.retain(|_, entry| entry.live(now));
            self.next_cleanup = now + self.cleanup_interval;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<BucketState>, String> {
        match self.data.get(key) {
            Some(entry) if entry.live(now) => Ok(Some(entry.state.clone())),
            _ => Ok(None),
        }
    }

    fn set(
        &mut self,
        key: &str,
        state: BucketState,
        expires_at: SystemTime,
        now: SystemTime,
    ) -> Result<(), String> {
        // Sweep periodically, not on every operation
        self.maybe_clean_expired(now);

        self.data
            .insert(key.to_string(), Entry { state, expires_at });
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, String> {
        let now = SystemTime::now();
        match self.data.remove(key) {
            Some(entry) => Ok(entry.live(now)),
            None => Ok(false),
        }
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        limit: usize,
        now: SystemTime,
    ) -> Result<Vec<(String, BucketState)>, String> {
        let mut out: Vec<(String, BucketState)> = self
            .data
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.live(now))
            .map(|(key, entry)| (key.clone(), entry.state.clone()))
            .collect();

        // Deterministic order for bounded results
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.truncate(limit);
        Ok(out)
    }
}

impl MemoryStoreBuilder {
    /// Expected number of unique keys; the map allocates 30% extra to
    /// reduce rehashing
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Interval between expiry sweeps
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Snapshot file path; loaded on build, written by `persist`
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build the store, loading the snapshot if a path was configured
    pub fn build(self) -> io::Result<MemoryStore> {
        let now = SystemTime::now();

        let mut data = match &self.path {
            Some(path) => MemoryStore::load(path, now)?,
            None => AHashMap::new(),
        };
        let current_len = data.len();
        data.reserve(
            ((self.capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize).saturating_sub(current_len),
        );

        Ok(MemoryStore {
            data,
            path: self.path,
            next_cleanup: now + self.cleanup_interval,
            cleanup_interval: self.cleanup_interval,
        })
    }
}
