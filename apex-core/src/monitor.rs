//! Per-rule and engine-level performance metrics

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency statistics for one rule.
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatsSnapshot {
    /// Evaluations observed
    pub count: u64,
    /// Times the rule triggered
    pub triggered: u64,
    /// Times the rule did not trigger
    pub failed: u64,
    /// Times evaluation errored
    pub errors: u64,
    /// Kind of the most recent error, when any
    pub last_error_kind: Option<String>,
    /// Minimum latency in microseconds
    pub min_us: f64,
    /// Maximum latency in microseconds
    pub max_us: f64,
    /// Mean latency in microseconds
    pub mean_us: f64,
    /// Median latency in microseconds
    pub p50_us: f64,
    /// 95th percentile latency in microseconds
    pub p95_us: f64,
    /// 99th percentile latency in microseconds
    pub p99_us: f64,
}

/// Lookup cache counters supplied by the provider at snapshot time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
}

impl CacheStats {
    /// Hit ratio in [0, 1]; zero when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Immutable view over everything the monitor has observed.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total evaluations observed
    pub total_evaluations: u64,
    /// Evaluations currently in flight
    pub concurrent_evaluations: usize,
    /// Evaluations per second over the sliding window
    pub throughput_per_sec: f64,
    /// Recovered failures observed
    pub recovered_errors: u64,
    /// Per-rule statistics
    pub rules: HashMap<String, RuleStatsSnapshot>,
    /// Lookup cache counters
    pub cache: CacheStats,
}

struct RuleStats {
    samples_us: RwLock<Vec<f64>>,
    triggered: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
    last_error_kind: RwLock<Option<String>>,
}

impl RuleStats {
    fn new() -> Self {
        RuleStats {
            samples_us: RwLock::new(Vec::new()),
            triggered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error_kind: RwLock::new(None),
        }
    }
}

/// Observes every rule and engine evaluation.
pub struct PerformanceMonitor {
    rules: DashMap<Arc<str>, Arc<RuleStats>>,
    total_evaluations: AtomicU64,
    recovered_errors: AtomicU64,
    concurrent: AtomicUsize,
    window: Mutex<VecDeque<Instant>>,
    window_size: Duration,
}

impl PerformanceMonitor {
    /// Monitor with a 60-second throughput window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// Monitor with a custom throughput window.
    pub fn with_window(window_size: Duration) -> Self {
        PerformanceMonitor {
            rules: DashMap::new(),
            total_evaluations: AtomicU64::new(0),
            recovered_errors: AtomicU64::new(0),
            concurrent: AtomicUsize::new(0),
            window: Mutex::new(VecDeque::new()),
            window_size,
        }
    }

    fn stats(&self, rule_id: &Arc<str>) -> Arc<RuleStats> {
        self.rules
            .entry(rule_id.clone())
            .or_insert_with(|| Arc::new(RuleStats::new()))
            .clone()
    }

    /// Record one rule evaluation.
    pub fn record_rule(&self, rule_id: &Arc<str>, triggered: bool, elapsed: Duration) {
        let stats = self.stats(rule_id);
        stats.samples_us.write().push(elapsed.as_secs_f64() * 1_000_000.0);
        if triggered {
            stats.triggered.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a recovered failure for a rule.
    pub fn record_rule_error(&self, rule_id: &Arc<str>, kind: &str) {
        let stats = self.stats(rule_id);
        stats.errors.fetch_add(1, Ordering::Relaxed);
        *stats.last_error_kind.write() = Some(kind.to_string());
        self.recovered_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one engine-level evaluation completing.
    pub fn record_evaluation(&self) {
        self.total_evaluations.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back(now);
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window_size {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// RAII guard tracking the concurrent-evaluation gauge.
    pub fn evaluation_guard(&self) -> EvaluationGuard<'_> {
        self.concurrent.fetch_add(1, Ordering::Relaxed);
        EvaluationGuard { monitor: self }
    }

    /// Immutable snapshot of everything observed so far.
    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let mut rules = HashMap::new();
        for entry in self.rules.iter() {
            let (id, stats) = entry.pair();
            let mut samples = stats.samples_us.read().clone();
            samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let count = samples.len() as u64;
            let (min_us, max_us, mean_us) = if samples.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                (
                    samples[0],
                    samples[samples.len() - 1],
                    samples.iter().sum::<f64>() / samples.len() as f64,
                )
            };
            rules.insert(
                id.to_string(),
                RuleStatsSnapshot {
                    count,
                    triggered: stats.triggered.load(Ordering::Relaxed),
                    failed: stats.failed.load(Ordering::Relaxed),
                    errors: stats.errors.load(Ordering::Relaxed),
                    last_error_kind: stats.last_error_kind.read().clone(),
                    min_us,
                    max_us,
                    mean_us,
                    p50_us: percentile(&samples, 0.50),
                    p95_us: percentile(&samples, 0.95),
                    p99_us: percentile(&samples, 0.99),
                },
            );
        }

        let throughput = {
            let window = self.window.lock();
            let seconds = self.window_size.as_secs_f64();
            if seconds > 0.0 {
                window.len() as f64 / seconds
            } else {
                0.0
            }
        };

        MetricsSnapshot {
            total_evaluations: self.total_evaluations.load(Ordering::Relaxed),
            concurrent_evaluations: self.concurrent.load(Ordering::Relaxed),
            throughput_per_sec: throughput,
            recovered_errors: self.recovered_errors.load(Ordering::Relaxed),
            rules,
            cache,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the concurrent-evaluation gauge on drop.
pub struct EvaluationGuard<'a> {
    monitor: &'a PerformanceMonitor,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.monitor.concurrent.fetch_sub(1, Ordering::Relaxed);
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_stats_accumulate() {
        let monitor = PerformanceMonitor::new();
        let id: Arc<str> = Arc::from("r1");
        monitor.record_rule(&id, true, Duration::from_micros(100));
        monitor.record_rule(&id, false, Duration::from_micros(300));
        monitor.record_rule_error(&id, "NULL_DEREFERENCE");

        let snapshot = monitor.snapshot(CacheStats::default());
        let stats = &snapshot.rules["r1"];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.triggered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.last_error_kind.as_deref(), Some("NULL_DEREFERENCE"));
        assert!(stats.min_us <= stats.p50_us && stats.p50_us <= stats.max_us);
        assert!(stats.p95_us <= stats.max_us);
    }

    #[test]
    fn concurrent_gauge_tracks_guards() {
        let monitor = PerformanceMonitor::new();
        {
            let _a = monitor.evaluation_guard();
            let _b = monitor.evaluation_guard();
            assert_eq!(monitor.snapshot(CacheStats::default()).concurrent_evaluations, 2);
        }
        assert_eq!(monitor.snapshot(CacheStats::default()).concurrent_evaluations, 0);
    }

    #[test]
    fn cache_hit_ratio() {
        let cache = CacheStats { hits: 3, misses: 1 };
        assert!((cache.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn percentile_selection() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&samples, 0.50), 6.0);
        assert_eq!(percentile(&samples, 0.95), 10.0);
        assert_eq!(percentile(&samples, 0.0), 1.0);
    }
}
