// Aggregate rows: per-host summaries and cross-host cluster summaries.

use serde::Serialize;

use super::sample::SeriesKey;

/// Identity of one HostAggregate row: series identity plus period start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetricKey {
    pub metric_name: String,
    pub app_id: String,
    pub instance_id: Option<String>,
    pub host_name: String,
    pub timestamp: i64,
}

impl HostMetricKey {
    pub fn from_series(key: &SeriesKey, timestamp: i64) -> Self {
        Self {
            metric_name: key.metric_name.clone(),
            app_id: key.app_id.clone(),
            instance_id: key.instance_id.clone(),
            host_name: key.host_name.clone(),
            timestamp,
        }
    }

    /// Same identity, moved to another period.
    pub fn at(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// Summary of one metric on one host over one period. Persisted rows have `count > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HostAggregate {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl HostAggregate {
    pub fn from_value(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    /// Folds another summary of the same identity into this one.
    pub fn merge(&mut self, other: &HostAggregate) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Identity for cross-host aggregation; deliberately carries no host name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetricKey {
    pub metric_name: String,
    pub app_id: String,
    pub instance_id: Option<String>,
    pub timestamp: i64,
}

impl ClusterMetricKey {
    pub fn new(
        metric_name: impl Into<String>,
        app_id: impl Into<String>,
        instance_id: Option<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            app_id: app_id.into(),
            instance_id,
            timestamp,
        }
    }

    pub fn from_series(key: &SeriesKey, timestamp: i64) -> Self {
        Self::new(
            key.metric_name.clone(),
            key.app_id.clone(),
            key.instance_id.clone(),
            timestamp,
        )
    }

    pub fn at(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// Summary of one metric across the hosts reporting it. Persisted rows have
/// `number_of_hosts >= 1` and `min <= sum / number_of_hosts <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAggregate {
    pub sum: f64,
    pub number_of_hosts: u32,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
}

impl ClusterAggregate {
    pub fn from_host_value(value: f64) -> Self {
        Self {
            sum: value,
            number_of_hosts: 1,
            min: value,
            max: value,
            deviation: None,
        }
    }

    /// Adds one more host's value for the same slice.
    pub fn add_host_value(&mut self, value: f64) {
        self.sum += value;
        self.number_of_hosts += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn average(&self) -> f64 {
        if self.number_of_hosts == 0 {
            0.0
        } else {
            self.sum / f64::from(self.number_of_hosts)
        }
    }
}

/// Combinable partial produced by the store-side rollup of cluster rows:
/// `host_total / rows` hosts at a per-host mean of `sum_of_sums / host_total`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterPartial {
    pub sum_of_sums: f64,
    pub rows: u64,
    pub host_total: u64,
    pub min: f64,
    pub max: f64,
}

impl ClusterPartial {
    pub fn merge(&mut self, other: &ClusterPartial) {
        self.sum_of_sums += other.sum_of_sums;
        self.rows += other.rows;
        self.host_total += other.host_total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Average per-period host count, with `sum` rebuilt from the per-host mean
    /// so that `sum / number_of_hosts` stays inside `[min, max]`.
    /// `None` when no rows contributed.
    pub fn finish(&self) -> Option<ClusterAggregate> {
        if self.rows == 0 {
            return None;
        }
        let rows = self.rows as f64;
        let hosts = (self.host_total as f64 / rows).round().max(1.0) as u32;
        let mean = if self.host_total > 0 {
            self.sum_of_sums / self.host_total as f64
        } else {
            self.sum_of_sums / rows / f64::from(hosts)
        };
        let mean = mean.max(self.min).min(self.max);
        Some(ClusterAggregate {
            sum: mean * f64::from(hosts),
            number_of_hosts: hosts,
            min: self.min,
            max: self.max,
            deviation: None,
        })
    }
}
