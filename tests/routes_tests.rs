// HTTP status endpoints

use std::sync::Arc;

use axum_test::TestServer;
use rollupd::aggregator::{AggregatorStatus, AggregatorStatusSnapshot};
use rollupd::routes;

fn test_app() -> axum::Router {
    routes::app(vec![
        Arc::new(AggregatorStatus::new("host_minute", 300_000)),
        Arc::new(AggregatorStatus::new("cluster_second", 120_000)),
    ])
}

#[tokio::test]
async fn test_root_endpoint() {
    let server = TestServer::new(test_app());
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("rollupd: metrics aggregation running");
}

#[tokio::test]
async fn test_version_endpoint() {
    let server = TestServer::new(test_app());
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("rollupd"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_aggregators_endpoint_lists_status() {
    let server = TestServer::new(test_app());
    let response = server.get("/api/aggregators").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], "host_minute");
    assert_eq!(list[0]["sleepIntervalMs"], 300_000);
    assert_eq!(list[0]["lastAggregatedEndTime"], -1);
    assert_eq!(list[1]["id"], "cluster_second");
    assert_eq!(list[1]["windowsAggregated"], 0);
}

#[test]
fn test_status_snapshot_serializes_camel_case() {
    let snap = AggregatorStatusSnapshot {
        id: "cluster_daily".into(),
        sleep_interval_ms: 86_400_000,
        last_aggregated_end_time: 0,
        windows_aggregated: 3,
        failed_windows: 1,
    };
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["failedWindows"], 1);
    assert_eq!(json["sleepIntervalMs"], 86_400_000);
}
