// Shared test helpers
#![allow(dead_code)]

use rollupd::metric_store::MetricStore;
use rollupd::models::*;
use tempfile::TempDir;

/// Store on a throwaway database; keep the TempDir alive for the test's duration.
/// Write batches of 2 rows so multi-transaction writes get exercised.
pub async fn temp_store() -> (TempDir, MetricStore, String) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.db");
    let path_str = path.to_str().unwrap().to_string();
    let store = MetricStore::connect(&path_str, 2, 2).await.unwrap();
    store.init().await.unwrap();
    (dir, store, path_str)
}

pub fn key(metric: &str, app: &str, host: &str) -> SeriesKey {
    SeriesKey::new(metric, app, None, host)
}

pub fn sample(metric: &str, app: &str, host: &str, ts: i64, value: f64, kind: MetricKind) -> RawSample {
    RawSample {
        key: key(metric, app, host),
        timestamp: ts,
        value,
        kind,
    }
}

pub fn gauge(metric: &str, app: &str, host: &str, ts: i64, value: f64) -> RawSample {
    sample(metric, app, host, ts, value, MetricKind::Gauge)
}

pub fn series(metric: &str, host: &str, kind: MetricKind, points: &[(i64, f64)]) -> TimeSeries {
    series_for_app(metric, HOST_APP_ID, host, kind, points)
}

pub fn series_for_app(
    metric: &str,
    app: &str,
    host: &str,
    kind: MetricKind,
    points: &[(i64, f64)],
) -> TimeSeries {
    let mut s = TimeSeries::new(key(metric, app, host), kind);
    for &(ts, v) in points {
        s.push(ts, v);
    }
    s
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

pub fn assert_all_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert_close(*a, *e);
    }
}
