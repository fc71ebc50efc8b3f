// Raw samples as produced by ingestion, and the per-identity series built from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// App id carried by host-scoped metrics (cpu, memory, disk) rather than by an application.
pub const HOST_APP_ID: &str = "HOST";

/// How a metric accumulates; selects the interpolation rule for missing slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    /// Monotonically accumulating value (e.g. bytes sent).
    Counter,
    /// Instantaneous value that moves freely (e.g. free memory).
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "COUNTER",
            MetricKind::Gauge => "GAUGE",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown metric kind: {0:?}")]
pub struct ParseKindError(pub String);

impl FromStr for MetricKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COUNTER" => Ok(MetricKind::Counter),
            "GAUGE" => Ok(MetricKind::Gauge),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Identity of one per-host series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesKey {
    pub metric_name: String,
    pub app_id: String,
    pub instance_id: Option<String>,
    pub host_name: String,
}

impl SeriesKey {
    pub fn new(
        metric_name: impl Into<String>,
        app_id: impl Into<String>,
        instance_id: Option<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            app_id: app_id.into(),
            instance_id,
            host_name: host_name.into(),
        }
    }

    pub fn is_host_scoped(&self) -> bool {
        self.app_id.eq_ignore_ascii_case(HOST_APP_ID)
    }
}

/// One raw measurement. Read-only to the aggregators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub key: SeriesKey,
    pub timestamp: i64,
    pub value: f64,
    pub kind: MetricKind,
}

/// Timestamp-ordered points of a single series; lives for one aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub key: SeriesKey,
    pub kind: MetricKind,
    pub points: Vec<(i64, f64)>,
}

impl TimeSeries {
    pub fn new(key: SeriesKey, kind: MetricKind) -> Self {
        Self {
            key,
            kind,
            points: Vec::new(),
        }
    }

    /// Appends a point, keeping timestamp order. Equal timestamps keep insertion order.
    pub fn push(&mut self, timestamp: i64, value: f64) {
        let at = self.points.partition_point(|(ts, _)| *ts <= timestamp);
        self.points.insert(at, (timestamp, value));
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Groups samples into one series per identity. The kind of the last sample wins.
pub fn group_series(samples: impl IntoIterator<Item = RawSample>) -> Vec<TimeSeries> {
    let mut by_key: BTreeMap<SeriesKey, TimeSeries> = BTreeMap::new();
    for s in samples {
        let series = by_key
            .entry(s.key.clone())
            .or_insert_with(|| TimeSeries::new(s.key, s.kind));
        series.kind = s.kind;
        series.push(s.timestamp, s.value);
    }
    by_key.into_values().collect()
}
