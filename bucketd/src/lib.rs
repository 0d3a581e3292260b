//! # bucketd
//!
//! Token-bucket rate limiting engine with pluggable storage.
//!
//! This crate implements the evaluation core used by `bucketd-server`:
//! a drift-free token bucket keyed by opaque strings, generic over a
//! [`Store`] backend. It contains no I/O and no async code; callers pass
//! an explicit timestamp into every operation, which keeps the math
//! deterministic and testable.
//!
//! ## Semantics
//!
//! Each key owns a bucket of at most `size` tokens, refilled at
//! `per_interval` tokens per `interval` milliseconds. Tokens are tracked
//! as `f64` so sub-interval requests never lose fractional refill to
//! rounding:
//!
//! ```text
//! delta  = max(0, now - last_drip)
//! tokens = min(size, tokens + delta * per_interval / interval)
//! ```
//!
//! The exact `now` used for the computation is stored back as
//! `last_drip`, so repeated small reads do not drift.
//!
//! ## Example
//!
//! ```
//! use bucketd::{BucketEngine, BucketParams, MemoryStore};
//! use std::time::SystemTime;
//!
//! let mut engine = BucketEngine::new(MemoryStore::new());
//! let params = BucketParams::new(10, 10, 1_000);
//!
//! let now = SystemTime::now();
//! let outcome = engine.take("ip/1.2.3.4", &params, 1, now).unwrap();
//! assert!(outcome.conformant);
//! assert_eq!(outcome.view.remaining, 9);
//! ```
//!
//! ## Storage
//!
//! The bundled [`MemoryStore`] is an in-process map with periodic expiry
//! sweeps and optional snapshot persistence. A bucket that has refilled
//! to capacity carries no information, so entries expire at the instant
//! their bucket would be full; an expired or absent entry reads back as a
//! full bucket.

pub mod core;

pub use crate::core::bucket::{
    BucketEngine, BucketParams, BucketState, BucketView, PutAmount, TakeOutcome,
};
pub use crate::core::store::{MemoryStore, MemoryStoreBuilder, Store};
pub use crate::core::BucketError;
