// Host tiers: one HostAggregate per series identity per window.
// Minute folds raw samples; hourly and daily fold the tier below.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::Aggregatable;
use crate::metric_store::MetricStore;
use crate::models::{HostAggregate, HostMetricKey, RawSample, Resolution};

pub struct HostAggregator {
    store: Arc<MetricStore>,
    resolution: Resolution,
}

impl HostAggregator {
    pub fn new(store: Arc<MetricStore>, resolution: Resolution) -> anyhow::Result<Self> {
        anyhow::ensure!(
            resolution.host_table().is_some(),
            "no host tier at {} resolution",
            resolution.as_str()
        );
        Ok(Self { store, resolution })
    }
}

impl Aggregatable for HostAggregator {
    async fn do_work(&self, start: i64, end: i64) -> anyhow::Result<bool> {
        let rows = match self.resolution.source() {
            None => rollup_samples(self.store.get_raw_samples(start, end).await?, start),
            Some(source) => rollup_host_rows(
                self.store.get_host_aggregates(source, start, end).await?,
                start,
            ),
        };
        let written = self.store.save_host_aggregates(self.resolution, &rows).await?;
        debug!(
            resolution = self.resolution.as_str(),
            start,
            end,
            rows = written,
            "host rollup"
        );
        Ok(true)
    }
}

/// Folds raw samples into per-identity summaries stamped with `period_start`.
pub fn rollup_samples(
    samples: impl IntoIterator<Item = RawSample>,
    period_start: i64,
) -> BTreeMap<HostMetricKey, HostAggregate> {
    let mut out: BTreeMap<HostMetricKey, HostAggregate> = BTreeMap::new();
    for s in samples {
        if !s.value.is_finite() {
            continue;
        }
        let key = HostMetricKey::from_series(&s.key, period_start);
        let value = HostAggregate::from_value(s.value);
        out.entry(key)
            .and_modify(|agg| agg.merge(&value))
            .or_insert(value);
    }
    out
}

/// Folds lower-tier host rows into one row per identity stamped with `period_start`.
pub fn rollup_host_rows(
    rows: impl IntoIterator<Item = (HostMetricKey, HostAggregate)>,
    period_start: i64,
) -> BTreeMap<HostMetricKey, HostAggregate> {
    let mut out: BTreeMap<HostMetricKey, HostAggregate> = BTreeMap::new();
    for (key, row) in rows {
        out.entry(key.at(period_start))
            .and_modify(|agg| agg.merge(&row))
            .or_insert(row);
    }
    out
}
