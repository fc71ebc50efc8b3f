// Cluster time tiers (minute, hourly, daily): store-side GROUP BY over the
// cluster tier below, then merge partials that share a key and finalise.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::Aggregatable;
use crate::metric_store::MetricStore;
use crate::models::{ClusterAggregate, ClusterMetricKey, ClusterPartial, Resolution};

pub struct ClusterTimeAggregator {
    store: Arc<MetricStore>,
    resolution: Resolution,
    source: Resolution,
}

impl ClusterTimeAggregator {
    pub fn new(store: Arc<MetricStore>, resolution: Resolution) -> anyhow::Result<Self> {
        let Some(source) = resolution.cluster_source() else {
            anyhow::bail!(
                "{} is the slicing tier, not a time rollup",
                resolution.as_str()
            );
        };
        Ok(Self {
            store,
            resolution,
            source,
        })
    }
}

impl Aggregatable for ClusterTimeAggregator {
    async fn do_work(&self, start: i64, end: i64) -> anyhow::Result<bool> {
        let partials = self
            .store
            .rollup_cluster_aggregates(self.source, start, end)
            .await?;
        let rows = fold_partials(partials);
        let written = self
            .store
            .save_cluster_aggregates(self.resolution, &rows)
            .await?;
        debug!(
            resolution = self.resolution.as_str(),
            start,
            end,
            rows = written,
            "cluster rollup"
        );
        Ok(true)
    }
}

/// Merges partials by key and finalises each into a ClusterAggregate.
/// Keys whose partials carried no rows are dropped.
pub fn fold_partials(
    partials: impl IntoIterator<Item = (ClusterMetricKey, ClusterPartial)>,
) -> BTreeMap<ClusterMetricKey, ClusterAggregate> {
    let mut merged: BTreeMap<ClusterMetricKey, ClusterPartial> = BTreeMap::new();
    for (key, partial) in partials {
        merged
            .entry(key)
            .and_modify(|p| p.merge(&partial))
            .or_insert(partial);
    }
    merged
        .into_iter()
        .filter_map(|(key, p)| p.finish().map(|agg| (key, agg)))
        .collect()
}
