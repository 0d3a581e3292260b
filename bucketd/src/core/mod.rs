//! Core components of the bucketd rate limiting library
//!
//! - [`bucket`]: the token-bucket engine and its arithmetic
//! - [`store`]: storage backends for bucket state

pub mod bucket;
pub mod store;


use thiserror::Error;

/// Errors that can occur during bucket operations
#[derive(Debug, Error)]
pub enum BucketError {
    /// Bucket parameters are invalid (size, per_interval, or interval is zero)
    #[error("invalid bucket parameters")]
    InvalidParams,
    /// The storage backend failed
    #[error("store error: {0}")]
    Store(String),
}
