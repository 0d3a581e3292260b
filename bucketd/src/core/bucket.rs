//! Token-bucket engine
//!
//! This module provides [`BucketEngine`], the evaluation core for all
//! bucket operations. The engine is generic over a [`Store`] and keeps no
//! state of its own; every operation takes an explicit timestamp so
//! behavior is reproducible under test.

use super::store::Store;
use super::BucketError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Effective rate parameters for one bucket instance
///
/// These are the values left after the owning bucket type's overrides have
/// been resolved: the burst capacity and the refill rate expressed as
/// `per_interval` tokens per `interval` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    /// Maximum tokens the bucket holds (burst capacity)
    pub size: u64,
    /// Tokens refilled per `interval`
    pub per_interval: u64,
    /// Refill interval in milliseconds
    pub interval: u64,
}

impl BucketParams {
    pub fn new(size: u64, per_interval: u64, interval: u64) -> Self {
        BucketParams {
            size,
            per_interval,
            interval,
        }
    }

    fn validate(&self) -> Result<(), BucketError> {
        if self.size == 0 || self.per_interval == 0 || self.interval == 0 {
            return Err(BucketError::InvalidParams);
        }
        Ok(())
    }

    /// Refill rate in tokens per millisecond
    fn rate_per_ms(&self) -> f64 {
        self.per_interval as f64 / self.interval as f64
    }

    /// Time until a bucket holding `tokens` refills to capacity
    fn time_to_full(&self, tokens: f64) -> Duration {
        let missing = (self.size as f64 - tokens).max(0.0);
        Duration::from_secs_f64(missing / self.rate_per_ms() / 1000.0)
    }

    /// Time until a bucket holding `tokens` accumulates `need` tokens,
    /// or `None` if `need` exceeds capacity and never will exist
    fn time_to_tokens(&self, tokens: f64, need: f64) -> Option<Duration> {
        if need > self.size as f64 {
            return None;
        }
        let missing = (need - tokens).max(0.0);
        Some(Duration::from_secs_f64(missing / self.rate_per_ms() / 1000.0))
    }
}

/// Persisted state of one bucket instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Current token count; fractional so sub-interval refill never
    /// accumulates rounding loss
    pub tokens: f64,
    /// Timestamp of the last refill computation
    pub last_drip: SystemTime,
    /// Token level measured just before the most recent non-conformant
    /// take, kept for observability
    pub before_drop: Option<f64>,
}

impl BucketState {
    fn full(params: &BucketParams, now: SystemTime) -> Self {
        BucketState {
            tokens: params.size as f64,
            last_drip: now,
            before_drop: None,
        }
    }

    /// Drift-free refill: credit elapsed time at the bucket's rate,
    /// clamp to capacity, and record the evaluation time as the new
    /// `last_drip`.
    fn refill(&mut self, params: &BucketParams, now: SystemTime) {
        let elapsed = now
            .duration_since(self.last_drip)
            .unwrap_or(Duration::ZERO);
        let added = elapsed.as_secs_f64() * 1000.0 * params.rate_per_ms();
        self.tokens = (self.tokens + added).min(params.size as f64);
        self.last_drip = now;
    }

    fn is_full(&self, params: &BucketParams) -> bool {
        self.tokens >= params.size as f64
    }
}

/// Read-only view of a bucket after an operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketView {
    /// Whole tokens remaining
    pub remaining: u64,
    /// Burst capacity
    pub limit: u64,
    /// Instant at which the bucket refills to capacity
    pub reset: SystemTime,
}

/// Result of a take operation
#[derive(Debug, Clone)]
pub struct TakeOutcome {
    /// Whether the requested count was granted
    pub conformant: bool,
    pub view: BucketView,
    /// On a deny, the minimum time after which the requested count will
    /// exist; `None` when the count exceeds capacity and never will
    pub retry_after: Option<Duration>,
}

/// Amount semantics for a put operation
#[derive(Debug, Clone, Copy)]
pub enum PutAmount {
    /// Add this many tokens, clamped to capacity
    Count(u64),
    /// Fill the bucket to capacity
    Fill,
}

/// Token-bucket engine over a generic [`Store`]
///
/// All operations are single-key and synchronous. Callers that need
/// linearizability across concurrent requests (the server does) put a
/// single-writer task in front of the engine; the engine itself assumes
/// exclusive access through `&mut self`.
pub struct BucketEngine<S: Store> {
    store: S,
}

impl<S: Store> BucketEngine<S> {
    pub fn new(store: S) -> Self {
        BucketEngine { store }
    }

    /// Access the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Take `count` tokens from the bucket under `key`
    ///
    /// Refills from elapsed time first, then debits if enough tokens
    /// exist. A deny leaves the token count untouched but still persists
    /// the refreshed `last_drip` and records the pre-drop level.
    pub fn take(
        &mut self,
        key: &str,
        params: &BucketParams,
        count: u64,
        now: SystemTime,
    ) -> Result<TakeOutcome, BucketError> {
        params.validate()?;

        let mut state = self.load(key, params, now)?;
        state.refill(params, now);

        let conformant = state.tokens >= count as f64;
        if conformant {
            state.tokens -= count as f64;
        } else {
            state.before_drop = Some(state.tokens);
        }

        let retry_after = if conformant {
            None
        } else {
            params.time_to_tokens(state.tokens, count as f64)
        };

        let view = self.commit(key, state, params, now)?;
        Ok(TakeOutcome {
            conformant,
            view,
            retry_after,
        })
    }

    /// Return `amount` tokens to the bucket under `key`
    ///
    /// The result is clamped to `[0, size]`; a put can momentarily
    /// compute past capacity in memory but never commits more than
    /// `size` tokens.
    pub fn put(
        &mut self,
        key: &str,
        params: &BucketParams,
        amount: PutAmount,
        now: SystemTime,
    ) -> Result<BucketView, BucketError> {
        params.validate()?;

        let mut state = self.load(key, params, now)?;
        state.refill(params, now);

        state.tokens = match amount {
            PutAmount::Fill => params.size as f64,
            PutAmount::Count(n) => (state.tokens + n as f64).min(params.size as f64),
        };

        self.commit(key, state, params, now)
    }

    /// Observe the bucket under `key` without mutating anything
    ///
    /// Refill is applied to a copy; nothing is persisted. An absent key
    /// reads as a full bucket.
    pub fn status(
        &self,
        key: &str,
        params: &BucketParams,
        now: SystemTime,
    ) -> Result<BucketView, BucketError> {
        params.validate()?;

        let mut state = self.load(key, params, now)?;
        state.refill(params, now);
        Ok(Self::view(&state, params, now))
    }

    /// Observe every bucket whose key starts with `prefix`, up to `limit`
    /// entries, read-only
    ///
    /// Rate parameters are resolved per matched key through `params_for`,
    /// so per-key overrides apply to scanned instances exactly as they do
    /// to singular operations.
    pub fn status_prefix<F>(
        &self,
        prefix: &str,
        limit: usize,
        now: SystemTime,
        params_for: F,
    ) -> Result<Vec<(String, BucketView)>, BucketError>
    where
        F: Fn(&str) -> BucketParams,
    {
        let entries = self
            .store
            .scan_prefix(prefix, limit, now)
            .map_err(BucketError::Store)?;

        entries
            .into_iter()
            .map(|(key, mut state)| {
                let params = params_for(&key);
                params.validate()?;
                state.refill(&params, now);
                let view = Self::view(&state, &params, now);
                Ok((key, view))
            })
            .collect()
    }

    /// Delete the persisted state for `key`
    ///
    /// Returns whether an entry existed. A subsequent take sees a full
    /// bucket.
    pub fn reset(&mut self, key: &str) -> Result<bool, BucketError> {
        self.store.remove(key).map_err(BucketError::Store)
    }

    fn load(
        &self,
        key: &str,
        params: &BucketParams,
        now: SystemTime,
    ) -> Result<BucketState, BucketError> {
        let stored = self.store.get(key, now).map_err(BucketError::Store)?;
        Ok(stored.unwrap_or_else(|| BucketState::full(params, now)))
    }

    /// Persist `state`, or drop the entry entirely when the bucket is
    /// full again. A full bucket is indistinguishable from an absent
    /// one, so the entry's expiry is the instant it refills to capacity.
    fn commit(
        &mut self,
        key: &str,
        state: BucketState,
        params: &BucketParams,
        now: SystemTime,
    ) -> Result<BucketView, BucketError> {
        let view = Self::view(&state, params, now);

        if state.is_full(params) {
            self.store.remove(key).map_err(BucketError::Store)?;
        } else {
            let expires_at = now + params.time_to_full(state.tokens);
            self.store
                .set(key, state, expires_at, now)
                .map_err(BucketError::Store)?;
        }

        Ok(view)
    }

    fn view(state: &BucketState, params: &BucketParams, now: SystemTime) -> BucketView {
        BucketView {
            remaining: state.tokens.floor() as u64,
            limit: params.size,
            reset: now + params.time_to_full(state.tokens),
        }
    }
}
