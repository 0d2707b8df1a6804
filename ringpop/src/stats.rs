//! Stats emission.
//!
//! The coordinator only decides *what* is reported; storage and export belong
//! to the [`StatsReporter`] implementation handed to the builder.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "ringpop";

/// Sink for counters, gauges and timers keyed by a hierarchical name.
pub trait StatsReporter: Send + Sync {
    fn incr_counter(&self, key: &str, value: i64);
    fn update_gauge(&self, key: &str, value: i64);
    /// Backends report timers in milliseconds.
    fn record_timer(&self, key: &str, duration: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsReporter for NoopStats {
    fn incr_counter(&self, _key: &str, _value: i64) {}
    fn update_gauge(&self, _key: &str, _value: i64) {}
    fn record_timer(&self, _key: &str, _duration: Duration) {}
}

/// Keeps the latest values in memory so they can be read back synchronously.
///
/// Counters accumulate, gauges hold the last value, timers hold the last
/// sample in milliseconds.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    values: Mutex<HashMap<String, i64>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).copied()
    }

    /// Value for `key`, zero if it was never reported.
    pub fn value(&self, key: &str) -> i64 {
        self.get(key).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.values.lock().clone()
    }
}

impl StatsReporter for InMemoryStats {
    fn incr_counter(&self, key: &str, value: i64) {
        *self.values.lock().entry(key.to_string()).or_insert(0) += value;
    }

    fn update_gauge(&self, key: &str, value: i64) {
        self.values.lock().insert(key.to_string(), value);
    }

    fn record_timer(&self, key: &str, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.values.lock().insert(key.to_string(), millis);
    }
}

/// Forwards to the installed `metrics` recorder. Timers become histogram
/// samples in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsStats;

impl StatsReporter for MetricsStats {
    fn incr_counter(&self, key: &str, value: i64) {
        if let Ok(value) = u64::try_from(value) {
            metrics::counter!(key.to_string()).increment(value);
        }
    }

    fn update_gauge(&self, key: &str, value: i64) {
        metrics::gauge!(key.to_string()).set(value as f64);
    }

    fn record_timer(&self, key: &str, duration: Duration) {
        metrics::histogram!(key.to_string()).record(duration.as_secs_f64() * 1000.0);
    }
}

/// Builds `<namespace>.<identity>.<path>` keys.
#[derive(Debug, Clone)]
pub struct StatsKeys {
    prefix: String,
}

impl StatsKeys {
    pub fn new(namespace: &str, identity: &str) -> Self {
        Self {
            prefix: format!("{}.{}", namespace, sanitize(identity)),
        }
    }

    pub fn key(&self, path: &str) -> String {
        format!("{}.{}", self.prefix, path)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn sanitize(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c == '.' || c == ':' { '_' } else { c })
        .collect()
}
