//! Canonical counter names exposed by the metrics snapshot.
//!
//! These names are part of the observability surface; dashboards and alerts
//! key on them, so they must not change casually.

/// Messages transmitted on a cache hit or in fail-open mode.
pub const PUBLISH_SENT: &str = "publish.sent";

/// Messages not transmitted because the recipient was believed offline.
pub const PUBLISH_SUPPRESSED: &str = "publish.suppressed";

/// Critical messages transmitted after ground truth confirmed presence.
pub const PUBLISH_SENT_AFTER_ESCALATION: &str = "publish.sent_after_escalation";

/// Subset of `publish.sent` decided while the gate was degraded.
pub const PUBLISH_FAIL_OPEN: &str = "publish.fail_open";

/// Presence events successfully applied to the online set.
pub const WEBHOOK_INGESTED: &str = "webhook.ingested";

/// Presence events lost to queue overflow, validation or store timeouts.
pub const WEBHOOK_DROPPED: &str = "webhook.dropped";

/// Ground-truth reconciliation queries started.
pub const RECONCILIATION_TRIGGERED: &str = "reconciliation.triggered";

/// Reconciliation attempts that failed and were scheduled for retry.
pub const RECONCILIATION_FAILED: &str = "reconciliation.failed";

/// Gate decisions dropped before reaching the observability sink.
pub const DECISIONS_DROPPED: &str = "decisions.dropped";

/// Fraction of gate lookups that did not find the recipient online.
pub const STORE_CACHE_MISS_RATE: &str = "store.cache_miss_rate";
