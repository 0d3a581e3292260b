//! Lightweight metrics collection
//!
//! Atomic counters with no allocation on the hot path. There is no
//! metrics wire surface; the server logs a structured summary on
//! shutdown and the counters are reachable for embedders and tests.

use crate::types::Method;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Longest key the denied-keys table will track
const MAX_KEY_LENGTH: usize = 256;

/// How many denied keys the summary reports
const TOP_DENIED_KEYS: usize = 10;

/// Tracks the most frequently denied keys with bounded memory
struct TopDeniedKeys {
    counts: HashMap<String, u64>,
    max_size: usize,
}

impl TopDeniedKeys {
    fn new(max_size: usize) -> Self {
        Self {
            counts: HashMap::with_capacity(max_size * 2),
            max_size,
        }
    }

    fn update(&mut self, key: &str) {
        if key.len() > MAX_KEY_LENGTH {
            return;
        }

        *self.counts.entry(key.to_string()).or_insert(0) += 1;

        if self.counts.len() > self.max_size * 3 {
            self.truncate();
        }
    }

    fn truncate(&mut self) {
        let mut entries: Vec<_> = self.counts.drain().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(self.max_size);
        self.counts = entries.into_iter().collect();
    }

    fn top(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(self.max_size);
        entries
    }
}

/// Core metrics collected by the server
pub struct Metrics {
    start_time: Instant,

    pub total_requests: AtomicU64,
    pub take_requests: AtomicU64,
    pub put_requests: AtomicU64,
    pub wait_requests: AtomicU64,
    pub status_requests: AtomicU64,
    pub reset_requests: AtomicU64,

    /// Non-conformant takes
    pub denied_requests: AtomicU64,
    /// Error responses of any kind
    pub error_responses: AtomicU64,

    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,

    top_denied: Mutex<TopDeniedKeys>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            take_requests: AtomicU64::new(0),
            put_requests: AtomicU64::new(0),
            wait_requests: AtomicU64::new(0),
            status_requests: AtomicU64::new(0),
            reset_requests: AtomicU64::new(0),
            denied_requests: AtomicU64::new(0),
            error_responses: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            top_denied: Mutex::new(TopDeniedKeys::new(TOP_DENIED_KEYS)),
        }
    }

    pub fn record_request(&self, method: Method) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match method {
            Method::Take => &self.take_requests,
            Method::Put => &self.put_requests,
            Method::Wait => &self.wait_requests,
            Method::Status => &self.status_requests,
            Method::Reset => &self.reset_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self, key: &str) {
        self.denied_requests.fetch_add(1, Ordering::Relaxed);
        self.top_denied.lock().update(key);
    }

    pub fn record_error(&self) {
        self.error_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn top_denied_keys(&self) -> Vec<(String, u64)> {
        self.top_denied.lock().top()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log a structured summary; called once at shutdown
    pub fn log_summary(&self) {
        tracing::info!(
            uptime_secs = self.uptime().as_secs(),
            total_requests = self.total_requests.load(Ordering::Relaxed),
            denied = self.denied_requests.load(Ordering::Relaxed),
            errors = self.error_responses.load(Ordering::Relaxed),
            connections = self.total_connections.load(Ordering::Relaxed),
            "server metrics"
        );
        for (key, count) in self.top_denied_keys() {
            tracing::info!(key = %key, denials = count, "top denied key");
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
