//! Per-operation-kind counters and latency accumulators.
//!
//! A [`StatsRegistry`] is constructed explicitly and shared by reference
//! (usually behind an `Arc`). Every update is a single atomic operation, so
//! any number of concurrent attempts may record into it without blocking
//! and without losing or double-counting events.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters for one operation kind
#[derive(Debug, Default)]
pub struct OperationStats {
    attempts_started: AtomicU64,
    attempts_in_progress: AtomicI64,
    sends_in_progress: AtomicI64,
    send_successes: AtomicU64,
    send_failures: AtomicU64,
    send_latency_nanos: AtomicU64,
    successes: AtomicU64,
    total_failures: AtomicU64,
    timeouts: AtomicU64,
    total_latency_nanos: AtomicU64,
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Opaque start-of-attempt marker returned by [`StatsRegistry::start_attempt`].
///
/// A token dropped without [`StatsRegistry::end_attempt`] (for example when
/// the attempt's future is cancelled) settles itself as a failed attempt.
#[derive(Debug)]
pub struct AttemptToken {
    kind: &'static str,
    stats: Arc<OperationStats>,
    started: Instant,
    send_recorded: bool,
    finished: bool,
}

impl AttemptToken {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn finish(&mut self, timed_out: bool, failed: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        let stats = &self.stats;
        if !self.send_recorded {
            // The attempt never reached the send phase's end
            stats.sends_in_progress.fetch_sub(1, Ordering::Relaxed);
        }
        stats.attempts_in_progress.fetch_sub(1, Ordering::Relaxed);
        stats
            .total_latency_nanos
            .fetch_add(nanos(self.started.elapsed()), Ordering::Relaxed);

        if timed_out {
            stats.timeouts.fetch_add(1, Ordering::Relaxed);
            stats.total_failures.fetch_add(1, Ordering::Relaxed);
        } else if failed {
            stats.total_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.successes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for AttemptToken {
    fn drop(&mut self) {
        self.finish(false, true);
    }
}

/// Serializable view of one operation kind's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub kind: String,
    pub attempts_started: u64,
    pub attempts_in_progress: i64,
    pub sends_in_progress: i64,
    pub send_successes: u64,
    pub send_failures: u64,
    pub send_latency_micros: u64,
    pub successes: u64,
    /// Attempts that did not succeed, timeouts included
    pub total_failures: u64,
    pub timeouts: u64,
    pub total_latency_micros: u64,
}

/// Registry of [`OperationStats`] keyed by operation kind
#[derive(Debug, Default)]
pub struct StatsRegistry {
    kinds: DashMap<&'static str, Arc<OperationStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, kind: &'static str) -> Arc<OperationStats> {
        if let Some(stats) = self.kinds.get(kind) {
            return Arc::clone(stats.value());
        }
        Arc::clone(self.kinds.entry(kind).or_default().value())
    }

    pub fn start_attempt(&self, kind: &'static str) -> AttemptToken {
        let stats = self.entry(kind);
        stats.attempts_started.fetch_add(1, Ordering::Relaxed);
        stats.attempts_in_progress.fetch_add(1, Ordering::Relaxed);
        stats.sends_in_progress.fetch_add(1, Ordering::Relaxed);
        AttemptToken {
            kind,
            stats,
            started: Instant::now(),
            send_recorded: false,
            finished: false,
        }
    }

    /// Record the end of the send phase; later calls for the same token are ignored
    pub fn end_send_attempt(&self, token: &mut AttemptToken, failed: bool) {
        if token.send_recorded {
            return;
        }
        token.send_recorded = true;

        let stats = &token.stats;
        stats.sends_in_progress.fetch_sub(1, Ordering::Relaxed);
        stats
            .send_latency_nanos
            .fetch_add(nanos(token.started.elapsed()), Ordering::Relaxed);
        if failed {
            stats.send_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.send_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the end of the attempt, consuming its token
    pub fn end_attempt(&self, mut token: AttemptToken, timed_out: bool, failed: bool) {
        token.finish(timed_out, failed);
    }

    pub fn snapshot(&self, kind: &str) -> Option<StatsSnapshot> {
        self.kinds
            .get(kind)
            .map(|entry| Self::snapshot_of(entry.key(), entry.value()))
    }

    /// Snapshots of every kind seen so far, sorted by kind
    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        let mut snapshots: Vec<StatsSnapshot> = self
            .kinds
            .iter()
            .map(|entry| Self::snapshot_of(entry.key(), entry.value()))
            .collect();
        snapshots.sort_by(|a, b| a.kind.cmp(&b.kind));
        snapshots
    }

    fn snapshot_of(kind: &str, stats: &OperationStats) -> StatsSnapshot {
        StatsSnapshot {
            kind: kind.to_string(),
            attempts_started: stats.attempts_started.load(Ordering::Relaxed),
            attempts_in_progress: stats.attempts_in_progress.load(Ordering::Relaxed),
            sends_in_progress: stats.sends_in_progress.load(Ordering::Relaxed),
            send_successes: stats.send_successes.load(Ordering::Relaxed),
            send_failures: stats.send_failures.load(Ordering::Relaxed),
            send_latency_micros: stats.send_latency_nanos.load(Ordering::Relaxed) / 1_000,
            successes: stats.successes.load(Ordering::Relaxed),
            total_failures: stats.total_failures.load(Ordering::Relaxed),
            timeouts: stats.timeouts.load(Ordering::Relaxed),
            total_latency_micros: stats.total_latency_nanos.load(Ordering::Relaxed) / 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_registry_is_empty() {
        let registry = StatsRegistry::new();
        assert!(registry.snapshot("size").is_none());
        assert!(registry.snapshots().is_empty());
    }

    #[test]
    fn test_successful_attempt() {
        let registry = StatsRegistry::new();
        let mut token = registry.start_attempt("size");

        let during = registry.snapshot("size").unwrap();
        assert_eq!(during.attempts_in_progress, 1);
        assert_eq!(during.sends_in_progress, 1);

        registry.end_send_attempt(&mut token, false);
        registry.end_attempt(token, false, false);

        let after = registry.snapshot("size").unwrap();
        assert_eq!(after.attempts_started, 1);
        assert_eq!(after.attempts_in_progress, 0);
        assert_eq!(after.sends_in_progress, 0);
        assert_eq!(after.send_successes, 1);
        assert_eq!(after.successes, 1);
        assert_eq!(after.total_failures, 0);
    }

    #[test]
    fn test_timeouts_count_as_failures() {
        let registry = StatsRegistry::new();
        let mut token = registry.start_attempt("get");
        registry.end_send_attempt(&mut token, false);
        registry.end_attempt(token, true, false);

        let snapshot = registry.snapshot("get").unwrap();
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.total_failures, 1);
        assert_eq!(snapshot.successes, 0);
    }

    #[test]
    fn test_send_recorded_once() {
        let registry = StatsRegistry::new();
        let mut token = registry.start_attempt("put");
        registry.end_send_attempt(&mut token, true);
        registry.end_send_attempt(&mut token, true);
        registry.end_attempt(token, false, true);

        let snapshot = registry.snapshot("put").unwrap();
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.sends_in_progress, 0);
    }

    #[test]
    fn test_attempt_without_send_balances_gauges() {
        let registry = StatsRegistry::new();
        let token = registry.start_attempt("remove");
        registry.end_attempt(token, false, true);

        let snapshot = registry.snapshot("remove").unwrap();
        assert_eq!(snapshot.sends_in_progress, 0);
        assert_eq!(snapshot.attempts_in_progress, 0);
        assert_eq!(snapshot.send_successes + snapshot.send_failures, 0);
    }

    #[test]
    fn test_dropped_token_counts_as_failure() {
        let registry = StatsRegistry::new();
        let token = registry.start_attempt("get");
        drop(token);

        let snapshot = registry.snapshot("get").unwrap();
        assert_eq!(snapshot.attempts_in_progress, 0);
        assert_eq!(snapshot.sends_in_progress, 0);
        assert_eq!(snapshot.total_failures, 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let registry = Arc::new(StatsRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        let mut token = registry.start_attempt("size");
                        registry.end_send_attempt(&mut token, false);
                        registry.end_attempt(token, false, i % 10 == 0);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let snapshot = registry.snapshot("size").unwrap();
        assert_eq!(snapshot.attempts_started, 8_000);
        assert_eq!(snapshot.total_failures, 800);
        assert_eq!(snapshot.successes, 7_200);
        assert_eq!(snapshot.attempts_in_progress, 0);
    }

    #[test]
    fn test_snapshots_sorted_by_kind() {
        let registry = StatsRegistry::new();
        for kind in ["size", "get", "ping"] {
            let token = registry.start_attempt(kind);
            registry.end_attempt(token, false, false);
        }
        let kinds: Vec<String> = registry.snapshots().into_iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["get", "ping", "size"]);
    }
}
