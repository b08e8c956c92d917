//! Gating engine configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::ConfigError;

/// Largest accepted `ONLINE_TTL_SECS` (30 days). Keeps `confirmed_at + ttl`
/// within chrono's range.
pub const MAX_ONLINE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Tunables for the online set, ingestor, reconciliation engine, publish gate
/// and decision log.
///
/// All fields have defaults suitable for a single-node deployment. Override
/// via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeraldConfig {
    /// How long a presence claim stays valid without reconfirmation.
    pub online_ttl_secs: u64,
    /// Period of the scheduled reconciliation sweep.
    pub reconciliation_interval_secs: u64,
    /// Minimum time between two ground-truth queries for one channel.
    pub reconciliation_min_spacing_secs: u64,
    /// Upper bound on concurrently outstanding ground-truth queries.
    pub max_concurrent_reconciliations: usize,
    /// Channels idle for longer than this are skipped by the sweep.
    pub activity_window_secs: u64,
    pub ingest_queue_capacity: usize,
    pub ingest_store_timeout_millis: u64,
    /// Budget for the gate's online-set lookup before failing open.
    pub store_read_timeout_millis: u64,
    pub critical_escalation_timeout_millis: u64,
    /// Budget for a reconciliation `here_now` query.
    pub ground_truth_timeout_millis: u64,
    pub reconciliation_retry_base_millis: u64,
    pub reconciliation_retry_max_millis: u64,
    pub decision_buffer_capacity: usize,
    pub decision_batch_size: usize,
    pub decision_flush_interval_millis: u64,
    pub store_sweep_interval_secs: u64,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            online_ttl_secs: 300,
            reconciliation_interval_secs: 300,
            reconciliation_min_spacing_secs: 5,
            max_concurrent_reconciliations: 8,
            activity_window_secs: 600,
            ingest_queue_capacity: 4096,
            ingest_store_timeout_millis: 250,
            store_read_timeout_millis: 50,
            critical_escalation_timeout_millis: 500,
            ground_truth_timeout_millis: 2000,
            reconciliation_retry_base_millis: 1000,
            reconciliation_retry_max_millis: 60_000,
            decision_buffer_capacity: 8192,
            decision_batch_size: 256,
            decision_flush_interval_millis: 1000,
            store_sweep_interval_secs: 60,
        }
    }
}

impl HeraldConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default  |
    /// |--------------------------------------|----------|
    /// | `ONLINE_TTL_SECS`                    | `300`    |
    /// | `RECONCILIATION_INTERVAL_SECS`       | `300`    |
    /// | `RECONCILIATION_MIN_SPACING_SECS`    | `5`      |
    /// | `MAX_CONCURRENT_RECONCILIATIONS`     | `8`      |
    /// | `ACTIVITY_WINDOW_SECS`               | `600`    |
    /// | `INGEST_QUEUE_CAPACITY`              | `4096`   |
    /// | `INGEST_STORE_TIMEOUT_MILLIS`        | `250`    |
    /// | `STORE_READ_TIMEOUT_MILLIS`          | `50`     |
    /// | `CRITICAL_ESCALATION_TIMEOUT_MILLIS` | `500`    |
    /// | `GROUND_TRUTH_TIMEOUT_MILLIS`        | `2000`   |
    /// | `RECONCILIATION_RETRY_BASE_MILLIS`   | `1000`   |
    /// | `RECONCILIATION_RETRY_MAX_MILLIS`    | `60000`  |
    /// | `DECISION_BUFFER_CAPACITY`           | `8192`   |
    /// | `DECISION_BATCH_SIZE`                | `256`    |
    /// | `DECISION_FLUSH_INTERVAL_MILLIS`     | `1000`   |
    /// | `STORE_SWEEP_INTERVAL_SECS`          | `60`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let online_ttl_secs = parse_or(&lookup, "ONLINE_TTL_SECS", d.online_ttl_secs)?;
        if online_ttl_secs > MAX_ONLINE_TTL_SECS {
            return Err(ConfigError::Invalid {
                var: "ONLINE_TTL_SECS",
                value: online_ttl_secs.to_string(),
            });
        }

        Ok(Self {
            online_ttl_secs,
            reconciliation_interval_secs: parse_or(
                &lookup,
                "RECONCILIATION_INTERVAL_SECS",
                d.reconciliation_interval_secs,
            )?,
            reconciliation_min_spacing_secs: parse_or(
                &lookup,
                "RECONCILIATION_MIN_SPACING_SECS",
                d.reconciliation_min_spacing_secs,
            )?,
            max_concurrent_reconciliations: parse_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                d.max_concurrent_reconciliations,
            )?
            .max(1),
            activity_window_secs: parse_or(&lookup, "ACTIVITY_WINDOW_SECS", d.activity_window_secs)?,
            ingest_queue_capacity: parse_or(
                &lookup,
                "INGEST_QUEUE_CAPACITY",
                d.ingest_queue_capacity,
            )?
            .max(1),
            ingest_store_timeout_millis: parse_or(
                &lookup,
                "INGEST_STORE_TIMEOUT_MILLIS",
                d.ingest_store_timeout_millis,
            )?,
            store_read_timeout_millis: parse_or(
                &lookup,
                "STORE_READ_TIMEOUT_MILLIS",
                d.store_read_timeout_millis,
            )?,
            critical_escalation_timeout_millis: parse_or(
                &lookup,
                "CRITICAL_ESCALATION_TIMEOUT_MILLIS",
                d.critical_escalation_timeout_millis,
            )?,
            ground_truth_timeout_millis: parse_or(
                &lookup,
                "GROUND_TRUTH_TIMEOUT_MILLIS",
                d.ground_truth_timeout_millis,
            )?,
            reconciliation_retry_base_millis: parse_or(
                &lookup,
                "RECONCILIATION_RETRY_BASE_MILLIS",
                d.reconciliation_retry_base_millis,
            )?,
            reconciliation_retry_max_millis: parse_or(
                &lookup,
                "RECONCILIATION_RETRY_MAX_MILLIS",
                d.reconciliation_retry_max_millis,
            )?,
            decision_buffer_capacity: parse_or(
                &lookup,
                "DECISION_BUFFER_CAPACITY",
                d.decision_buffer_capacity,
            )?
            .max(1),
            decision_batch_size: parse_or(&lookup, "DECISION_BATCH_SIZE", d.decision_batch_size)?
                .max(1),
            decision_flush_interval_millis: parse_or(
                &lookup,
                "DECISION_FLUSH_INTERVAL_MILLIS",
                d.decision_flush_interval_millis,
            )?,
            store_sweep_interval_secs: parse_or(
                &lookup,
                "STORE_SWEEP_INTERVAL_SECS",
                d.store_sweep_interval_secs,
            )?,
        })
    }

    pub fn online_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.online_ttl_secs.min(MAX_ONLINE_TTL_SECS) as i64)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_secs.max(1))
    }

    pub fn reconciliation_min_spacing(&self) -> Duration {
        Duration::from_secs(self.reconciliation_min_spacing_secs)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }

    pub fn ingest_store_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_store_timeout_millis)
    }

    pub fn store_read_timeout(&self) -> Duration {
        Duration::from_millis(self.store_read_timeout_millis)
    }

    pub fn critical_escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.critical_escalation_timeout_millis)
    }

    pub fn ground_truth_timeout(&self) -> Duration {
        Duration::from_millis(self.ground_truth_timeout_millis)
    }

    pub fn decision_flush_interval(&self) -> Duration {
        Duration::from_millis(self.decision_flush_interval_millis.max(1))
    }

    pub fn store_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store_sweep_interval_secs.max(1))
    }

    pub fn retry_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.reconciliation_retry_base_millis),
            max_delay: Duration::from_millis(self.reconciliation_retry_max_millis),
            multiplier: 2.0,
        }
    }
}

/// Parse `var` from `lookup`, falling back to `default` when it is unset.
pub fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
