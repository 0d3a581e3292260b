//! Bucket-type registry
//!
//! The registry maps type names to immutable [`BucketType`] values. A
//! [`RegistryHandle`] publishes a whole registry at a time: readers
//! resolve against the snapshot current at dispatch time, and `replace`
//! swaps the pointer atomically, so no request ever observes a mix of
//! old and new definitions. In-flight requests keep the snapshot they
//! resolved; the next request sees the new one.

use crate::config::{BucketTypeConfig, ConfigError, OverrideConfig};
use ahash::AHashMap;
use bucketd::BucketParams;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named rate-limit configuration template, immutable once published
#[derive(Debug)]
pub struct BucketType {
    pub name: String,
    pub size: u64,
    pub per_interval: u64,
    /// Refill interval in milliseconds
    pub interval: u64,
    /// TAKE always conforms and never touches storage
    pub unlimited: bool,
    /// Ordered; the first matching override wins
    pub overrides: Vec<Override>,
}

/// Compiled per-key override
///
/// Overrides re-bind the rate triple for selected keys. They never
/// change which storage entry a key uses, so matching one cannot grow
/// storage cardinality.
#[derive(Debug)]
pub struct Override {
    key: Option<String>,
    pattern: Option<Regex>,
    size: Option<u64>,
    per_interval: Option<u64>,
    interval: Option<u64>,
}

impl Override {
    fn matches(&self, key: &str) -> bool {
        if let Some(exact) = &self.key {
            if exact == key {
                return true;
            }
        }
        if let Some(pattern) = &self.pattern {
            if pattern.is_match(key) {
                return true;
            }
        }
        false
    }
}

impl BucketType {
    pub fn base_params(&self) -> BucketParams {
        BucketParams::new(self.size, self.per_interval, self.interval)
    }

    /// Rate parameters for `key` after override resolution
    pub fn effective_params(&self, key: &str) -> BucketParams {
        for over in &self.overrides {
            if over.matches(key) {
                return BucketParams::new(
                    over.size.unwrap_or(self.size),
                    over.per_interval.unwrap_or(self.per_interval),
                    over.interval.unwrap_or(self.interval),
                );
            }
        }
        self.base_params()
    }
}

/// An immutable bucket-type mapping
#[derive(Debug, Default)]
pub struct Registry {
    buckets: AHashMap<String, Arc<BucketType>>,
}

impl Registry {
    /// Validate and compile a declarative bucket-type set
    ///
    /// Any failure rejects the whole set; a partially valid registry is
    /// never produced.
    pub fn build(buckets: &BTreeMap<String, BucketTypeConfig>) -> Result<Registry, ConfigError> {
        let mut compiled = AHashMap::with_capacity(buckets.len());

        for (name, config) in buckets {
            if name.is_empty() {
                return Err(ConfigError::EmptyBucketName);
            }
            validate_field(name, "size", config.size)?;
            validate_field(name, "per_interval", config.per_interval)?;
            validate_field(name, "interval", config.interval)?;

            let overrides = config
                .overrides
                .iter()
                .map(|over| compile_override(name, over))
                .collect::<Result<Vec<_>, _>>()?;

            compiled.insert(
                name.clone(),
                Arc::new(BucketType {
                    name: name.clone(),
                    size: config.size,
                    per_interval: config.per_interval,
                    interval: config.interval,
                    unlimited: config.unlimited,
                    overrides,
                }),
            );
        }

        Ok(Registry { buckets: compiled })
    }

    pub fn get(&self, name: &str) -> Option<Arc<BucketType>> {
        self.buckets.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

fn validate_field(bucket: &str, field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidBucketField {
            bucket: bucket.to_string(),
            field,
        });
    }
    Ok(())
}

fn compile_override(bucket: &str, config: &OverrideConfig) -> Result<Override, ConfigError> {
    if config.key.is_none() && config.matches.is_none() {
        return Err(ConfigError::EmptyOverride {
            bucket: bucket.to_string(),
        });
    }

    for (field, value) in [
        ("size", config.size),
        ("per_interval", config.per_interval),
        ("interval", config.interval),
    ] {
        if let Some(value) = value {
            validate_field(bucket, field, value)?;
        }
    }

    // Patterns match the whole key, never a substring
    let pattern = config
        .matches
        .as_deref()
        .map(|raw| Regex::new(&format!("^(?:{raw})$")))
        .transpose()
        .map_err(|source| ConfigError::InvalidPattern {
            bucket: bucket.to_string(),
            source,
        })?;

    Ok(Override {
        key: config.key.clone(),
        pattern,
        size: config.size,
        per_interval: config.per_interval,
        interval: config.interval,
    })
}

/// Shared handle to the currently published registry
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<Arc<Registry>>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        RegistryHandle {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Resolve a bucket type against the current snapshot
    pub fn get(&self, name: &str) -> Option<Arc<BucketType>> {
        self.inner.read().get(name)
    }

    /// The current snapshot, pinned for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<Registry> {
        self.inner.read().clone()
    }

    /// Atomically publish a new registry
    pub fn replace(&self, registry: Registry) {
        *self.inner.write() = Arc::new(registry);
    }
}
