// Finest cluster tier: slice every host series, then fold hosts per slice end.
// Input comes from any SeriesSource (the metric store or the live cache).

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::Aggregatable;
use crate::metric_store::MetricStore;
use crate::models::{
    ClusterAggregate, ClusterMetricKey, HOST_APP_ID, Resolution, TimeSeries, group_series,
};
use crate::slicer::{slice_series, time_slices};

/// Per-app count of reporting hosts, emitted at the last slice of each window.
pub const LIVE_HOSTS_METRIC: &str = "live_hosts";

/// Where per-host series for a time range come from.
pub trait SeriesSource: Send + Sync {
    /// Every series with at least one sample in `[from, to)`, points restricted to that range.
    fn load_series(
        &self,
        from: i64,
        to: i64,
    ) -> impl Future<Output = anyhow::Result<Vec<TimeSeries>>> + Send;
}

impl SeriesSource for MetricStore {
    async fn load_series(&self, from: i64, to: i64) -> anyhow::Result<Vec<TimeSeries>> {
        Ok(group_series(self.get_raw_samples(from, to).await?))
    }
}

#[derive(Debug, Clone)]
pub struct SliceSettings {
    pub slice_width_ms: i64,
    /// Extra range read on both sides of the window for boundary fills.
    pub lookback_ms: i64,
    /// Apps that also get a rollup of their hosts' HOST metrics.
    pub app_ids: Vec<String>,
}

pub struct ClusterSecondAggregator<S> {
    source: Arc<S>,
    store: Arc<MetricStore>,
    settings: SliceSettings,
}

impl<S: SeriesSource> ClusterSecondAggregator<S> {
    pub fn new(source: Arc<S>, store: Arc<MetricStore>, settings: SliceSettings) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }
}

impl<S: SeriesSource> Aggregatable for ClusterSecondAggregator<S> {
    async fn do_work(&self, start: i64, end: i64) -> anyhow::Result<bool> {
        let lookback = self.settings.lookback_ms;
        let series = self
            .source
            .load_series(
                start.saturating_sub(lookback),
                end.saturating_add(lookback),
            )
            .await?;
        let rows = aggregate_slices(
            &series,
            start,
            end,
            self.settings.slice_width_ms,
            &self.settings.app_ids,
        );
        let written = self
            .store
            .save_cluster_aggregates(Resolution::Second, &rows)
            .await?;
        debug!(start, end, series = series.len(), rows = written, "cluster slice aggregation");
        Ok(true)
    }
}

/// Cluster rows for `[start, end)`, one per (metric, app, instance, slice end).
///
/// Every series contributes one value per slice (interpolated where needed), so a
/// host counts toward `number_of_hosts` for every slice once it has any data in
/// the loaded range. HOST-scoped series are additionally folded under each app in
/// `app_ids` that the same host reported, and each app gets a `live_hosts` row.
pub fn aggregate_slices(
    series: &[TimeSeries],
    start: i64,
    end: i64,
    slice_width: i64,
    app_ids: &[String],
) -> BTreeMap<ClusterMetricKey, ClusterAggregate> {
    let mut out = BTreeMap::new();
    let slices = time_slices(start, end, slice_width);
    let Some(last_slice) = slices.last() else {
        return out;
    };

    let mut hosts_by_app: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for s in series.iter().filter(|s| !s.is_empty()) {
        hosts_by_app
            .entry(s.key.app_id.as_str())
            .or_default()
            .insert(s.key.host_name.as_str());
    }

    for s in series {
        let values = slice_series(s, &slices);
        if values.is_empty() {
            continue;
        }
        let extra_apps: Vec<&str> = if s.key.is_host_scoped() {
            app_ids
                .iter()
                .map(String::as_str)
                .filter(|app| !app.eq_ignore_ascii_case(HOST_APP_ID))
                .filter(|app| {
                    hosts_by_app
                        .get(app)
                        .is_some_and(|hosts| hosts.contains(s.key.host_name.as_str()))
                })
                .collect()
        } else {
            Vec::new()
        };

        for (&ts, &value) in &values {
            add_host_value(&mut out, ClusterMetricKey::from_series(&s.key, ts), value);
            for app in &extra_apps {
                let key = ClusterMetricKey::new(
                    s.key.metric_name.clone(),
                    *app,
                    s.key.instance_id.clone(),
                    ts,
                );
                add_host_value(&mut out, key, value);
            }
        }
    }

    for (app, hosts) in &hosts_by_app {
        let n = hosts.len() as f64;
        out.insert(
            ClusterMetricKey::new(LIVE_HOSTS_METRIC, *app, None, last_slice.end),
            ClusterAggregate {
                sum: n,
                number_of_hosts: 1,
                min: n,
                max: n,
                deviation: None,
            },
        );
    }
    out
}

fn add_host_value(
    out: &mut BTreeMap<ClusterMetricKey, ClusterAggregate>,
    key: ClusterMetricKey,
    value: f64,
) {
    out.entry(key)
        .and_modify(|agg| agg.add_host_value(value))
        .or_insert_with(|| ClusterAggregate::from_host_value(value));
}
