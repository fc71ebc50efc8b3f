// Rollup tiers and the tables they read from and write to.

use serde::Serialize;

/// Rollup granularity. `Second` is the slice-aligned cluster tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
}

/// Whether a tier summarises one host or the whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Host,
    Cluster,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hourly",
            Resolution::Day => "daily",
        }
    }

    /// The tier whose rows this tier consumes. `None` means raw samples.
    pub fn source(&self) -> Option<Resolution> {
        match self {
            Resolution::Second => None,
            Resolution::Minute => None,
            Resolution::Hour => Some(Resolution::Minute),
            Resolution::Day => Some(Resolution::Hour),
        }
    }

    /// Cluster tiers chain from the slice tier upward.
    pub fn cluster_source(&self) -> Option<Resolution> {
        match self {
            Resolution::Second => None,
            Resolution::Minute => Some(Resolution::Second),
            Resolution::Hour => Some(Resolution::Minute),
            Resolution::Day => Some(Resolution::Hour),
        }
    }

    /// Table holding per-host rows for this tier. There is no host "second" tier.
    pub fn host_table(&self) -> Option<&'static str> {
        match self {
            Resolution::Second => None,
            Resolution::Minute => Some("metric_record_minute"),
            Resolution::Hour => Some("metric_record_hourly"),
            Resolution::Day => Some("metric_record_daily"),
        }
    }

    pub fn cluster_table(&self) -> &'static str {
        match self {
            Resolution::Second => "metric_aggregate",
            Resolution::Minute => "metric_aggregate_minute",
            Resolution::Hour => "metric_aggregate_hourly",
            Resolution::Day => "metric_aggregate_daily",
        }
    }
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Host => "host",
            Level::Cluster => "cluster",
        }
    }
}

/// Checkpoint key for one aggregator, e.g. `cluster_second`.
pub fn aggregator_id(level: Level, resolution: Resolution) -> String {
    format!("{}_{}", level.as_str(), resolution.as_str())
}
