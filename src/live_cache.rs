// Recent samples per series, fed by ingestion and read by the slicing tier.
// A missing key or an empty range reads as None, never as a zero series.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::aggregator::SeriesSource;
use crate::models::{MetricKind, RawSample, SeriesKey, TimeSeries};

#[derive(Debug)]
struct CachedSeries {
    kind: MetricKind,
    /// Keyed by timestamp; a later put at the same timestamp replaces the value.
    points: BTreeMap<i64, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveSampleCache {
    series: Arc<RwLock<HashMap<SeriesKey, CachedSeries>>>,
}

impl LiveSampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: SeriesKey, timestamp: i64, value: f64, kind: MetricKind) {
        let mut series = self.series.write().await;
        insert_point(&mut series, key, timestamp, value, kind);
    }

    /// Puts a batch of samples under one write lock.
    pub async fn put_samples(&self, samples: &[RawSample]) {
        let mut series = self.series.write().await;
        for s in samples {
            insert_point(&mut series, s.key.clone(), s.timestamp, s.value, s.kind);
        }
    }

    /// Points of `key` in `[start, end)`.
    pub async fn get_series(&self, key: &SeriesKey, start: i64, end: i64) -> Option<TimeSeries> {
        let series = self.series.read().await;
        series.get(key).and_then(|cached| to_series(key, cached, start, end))
    }

    /// Every series with at least one point in `[start, end)`, in key order.
    pub async fn snapshot(&self, start: i64, end: i64) -> Vec<TimeSeries> {
        let series = self.series.read().await;
        let mut out: Vec<TimeSeries> = series
            .iter()
            .filter_map(|(key, cached)| to_series(key, cached, start, end))
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Drops points older than `timestamp`, and series left empty. Returns points removed.
    pub async fn evict_before(&self, timestamp: i64) -> usize {
        let mut series = self.series.write().await;
        let mut removed = 0;
        series.retain(|_, cached| {
            let kept = cached.points.split_off(&timestamp);
            removed += cached.points.len();
            cached.points = kept;
            !cached.points.is_empty()
        });
        removed
    }

    /// Number of series held.
    pub async fn len(&self) -> usize {
        self.series.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.series.read().await.is_empty()
    }
}

fn insert_point(
    series: &mut HashMap<SeriesKey, CachedSeries>,
    key: SeriesKey,
    timestamp: i64,
    value: f64,
    kind: MetricKind,
) {
    let entry = series.entry(key).or_insert_with(|| CachedSeries {
        kind,
        points: BTreeMap::new(),
    });
    entry.kind = kind;
    entry.points.insert(timestamp, value);
}

fn to_series(key: &SeriesKey, cached: &CachedSeries, start: i64, end: i64) -> Option<TimeSeries> {
    if end <= start {
        return None;
    }
    let points: Vec<(i64, f64)> = cached
        .points
        .range(start..end)
        .map(|(&ts, &v)| (ts, v))
        .collect();
    if points.is_empty() {
        return None;
    }
    Some(TimeSeries {
        key: key.clone(),
        kind: cached.kind,
        points,
    })
}

impl SeriesSource for LiveSampleCache {
    async fn load_series(&self, from: i64, to: i64) -> anyhow::Result<Vec<TimeSeries>> {
        Ok(self.snapshot(from, to).await)
    }
}
