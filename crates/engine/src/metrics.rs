//! Lock-free counters for the observability surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use herald_core::metric_names::*;
use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Every counter the service exposes.
///
/// Shared as `Arc<Metrics>` between the ingestor, gate, reconciliation engine
/// and decision sink.
#[derive(Debug, Default)]
pub struct Metrics {
    pub publish_sent: Counter,
    pub publish_suppressed: Counter,
    pub publish_sent_after_escalation: Counter,
    pub publish_fail_open: Counter,
    pub webhook_ingested: Counter,
    pub webhook_dropped: Counter,
    pub reconciliation_triggered: Counter,
    pub reconciliation_failed: Counter,
    pub decisions_dropped: Counter,
    pub store_lookups: Counter,
    pub store_misses: Counter,
}

impl Metrics {
    /// Record the result of one online-set lookup made by the gate.
    pub fn record_lookup(&self, hit: bool) {
        self.store_lookups.inc();
        if !hit {
            self.store_misses.inc();
        }
    }

    /// Misses over lookups; `0.0` before the first lookup.
    pub fn cache_miss_rate(&self) -> f64 {
        let lookups = self.store_lookups.get();
        if lookups == 0 {
            return 0.0;
        }
        self.store_misses.get() as f64 / lookups as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = BTreeMap::from([
            (PUBLISH_SENT, self.publish_sent.get()),
            (PUBLISH_SUPPRESSED, self.publish_suppressed.get()),
            (
                PUBLISH_SENT_AFTER_ESCALATION,
                self.publish_sent_after_escalation.get(),
            ),
            (PUBLISH_FAIL_OPEN, self.publish_fail_open.get()),
            (WEBHOOK_INGESTED, self.webhook_ingested.get()),
            (WEBHOOK_DROPPED, self.webhook_dropped.get()),
            (RECONCILIATION_TRIGGERED, self.reconciliation_triggered.get()),
            (RECONCILIATION_FAILED, self.reconciliation_failed.get()),
            (DECISIONS_DROPPED, self.decisions_dropped.get()),
        ]);
        let gauges = BTreeMap::from([(STORE_CACHE_MISS_RATE, self.cache_miss_rate())]);
        MetricsSnapshot { counters, gauges }
    }
}

/// Point-in-time copy of [`Metrics`], keyed by canonical metric name.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub gauges: BTreeMap<&'static str, f64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.get(name).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_rate_is_zero_without_lookups() {
        let metrics = Metrics::default();
        assert_eq!(metrics.cache_miss_rate(), 0.0);
    }

    #[test]
    fn miss_rate_tracks_lookups() {
        let metrics = Metrics::default();
        metrics.record_lookup(true);
        metrics.record_lookup(false);
        metrics.record_lookup(false);
        metrics.record_lookup(true);
        assert_eq!(metrics.cache_miss_rate(), 0.5);
    }

    #[test]
    fn snapshot_uses_canonical_names() {
        let metrics = Metrics::default();
        metrics.publish_sent.add(3);
        metrics.webhook_dropped.inc();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(PUBLISH_SENT), 3);
        assert_eq!(snapshot.counter(WEBHOOK_DROPPED), 1);
        assert_eq!(snapshot.counter(RECONCILIATION_FAILED), 0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["counters"]["publish.sent"], 3);
        assert!(json["gauges"]["store.cache_miss_rate"].is_number());
    }
}
