//! System Metrics
//!
//! Track agent usage, error classes and cache effectiveness.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    count: u64,
    total_ms: u64,
}

/// System metrics tracker
pub struct SystemMetrics {
    agent_usage: Mutex<HashMap<String, u64>>,
    error_counts: Mutex<HashMap<String, u64>>,
    agent_timings: Mutex<HashMap<String, Timing>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub agent_usage: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
    pub avg_elapsed_ms: HashMap<String, f64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Counters stay usable even if a writer panicked mid-update
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SystemMetrics {
    pub fn new() -> Self {
        Self {
            agent_usage: Mutex::new(HashMap::new()),
            error_counts: Mutex::new(HashMap::new()),
            agent_timings: Mutex::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn record_agent_run(&self, agent: &str, elapsed: Duration) {
        *lock(&self.agent_usage).entry(agent.to_string()).or_insert(0) += 1;
        let mut timings = lock(&self.agent_timings);
        let timing = timings.entry(agent.to_string()).or_default();
        timing.count += 1;
        timing.total_ms += elapsed.as_millis() as u64;
    }

    pub fn record_error(&self, error_class: &str) {
        *lock(&self.error_counts).entry(error_class.to_string()).or_insert(0) += 1;
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_agent_usage(&self) -> HashMap<String, u64> {
        lock(&self.agent_usage).clone()
    }

    pub fn get_error_counts(&self) -> HashMap<String, u64> {
        lock(&self.error_counts).clone()
    }

    pub fn average_elapsed_ms(&self, agent: &str) -> Option<f64> {
        lock(&self.agent_timings)
            .get(agent)
            .filter(|t| t.count > 0)
            .map(|t| t.total_ms as f64 / t.count as f64)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let avg_elapsed_ms = lock(&self.agent_timings)
            .iter()
            .filter(|(_, t)| t.count > 0)
            .map(|(agent, t)| (agent.clone(), t.total_ms as f64 / t.count as f64))
            .collect();
        MetricsSnapshot {
            agent_usage: self.get_agent_usage(),
            error_counts: self.get_error_counts(),
            avg_elapsed_ms,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_uses_run_count() {
        let metrics = SystemMetrics::new();
        metrics.record_agent_run("sql", Duration::from_millis(100));
        metrics.record_agent_run("sql", Duration::from_millis(200));
        metrics.record_agent_run("sql", Duration::from_millis(300));
        assert_eq!(metrics.average_elapsed_ms("sql"), Some(200.0));
        assert_eq!(metrics.get_agent_usage().get("sql"), Some(&3));
        assert_eq!(metrics.average_elapsed_ms("general"), None);
    }

    #[test]
    fn test_snapshot_counts_cache_and_errors() {
        let metrics = SystemMetrics::new();
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(false);
        metrics.record_error("ExecutionError");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.error_counts.get("ExecutionError"), Some(&1));
    }
}
