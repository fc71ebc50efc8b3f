// MetricStore tests: raw reads, idempotent writes, malformed rows, checkpoints, pruning

mod common;

use std::collections::BTreeMap;

use common::{assert_close, gauge, sample, temp_store};
use rollupd::checkpoint::{CheckpointStore, NO_CHECKPOINT};
use rollupd::metric_store::MetricStore;
use rollupd::models::{
    ClusterAggregate, ClusterMetricKey, HostAggregate, HostMetricKey, MetricKind, RawSample,
    Resolution, SeriesKey,
};
use sqlx::sqlite::SqlitePool;

async fn side_pool(path: &str) -> SqlitePool {
    SqlitePool::connect(&format!("sqlite:{}", path)).await.unwrap()
}

#[tokio::test]
async fn raw_samples_read_half_open_in_time_order() {
    let (_dir, store, _) = temp_store().await;
    store
        .insert_samples(&[
            gauge("cpu", "HOST", "h1", 60_000, 3.0),
            gauge("cpu", "HOST", "h1", 0, 1.0),
            gauge("cpu", "HOST", "h2", 30_000, 2.0),
            gauge("cpu", "HOST", "h1", 120_000, 9.0),
        ])
        .await
        .unwrap();

    let got = store.get_raw_samples(0, 120_000).await.unwrap();

    let ts: Vec<i64> = got.iter().map(|s| s.timestamp).collect();
    assert_eq!(ts, vec![0, 30_000, 60_000]);
}

#[tokio::test]
async fn instance_id_round_trips() {
    let (_dir, store, _) = temp_store().await;
    let with_instance = RawSample {
        key: SeriesKey::new("bytes_in", "kafka", Some("topic-a".into()), "h1"),
        timestamp: 1_000,
        value: 10.0,
        kind: MetricKind::Counter,
    };
    store
        .insert_samples(&[with_instance.clone(), gauge("cpu", "HOST", "h1", 1_000, 1.0)])
        .await
        .unwrap();

    let got = store.get_raw_samples(0, 2_000).await.unwrap();

    assert_eq!(got.len(), 2);
    assert!(got.contains(&with_instance));
    let cpu = got.iter().find(|s| s.key.metric_name == "cpu").unwrap();
    assert_eq!(cpu.key.instance_id, None);
    assert_eq!(cpu.kind, MetricKind::Gauge);
}

#[tokio::test]
async fn repeated_writes_do_not_duplicate() {
    let (_dir, store, _) = temp_store().await;
    let samples = vec![
        sample("rx", "HOST", "h1", 0, 1.0, MetricKind::Counter),
        sample("rx", "HOST", "h1", 10_000, 2.0, MetricKind::Counter),
        sample("rx", "HOST", "h1", 20_000, 3.0, MetricKind::Counter),
    ];
    store.insert_samples(&samples).await.unwrap();
    store.insert_samples(&samples).await.unwrap();
    assert_eq!(store.get_raw_samples(0, 60_000).await.unwrap().len(), 3);

    let key = ClusterMetricKey::new("rx", "HOST", None, 30_000);
    let rows: BTreeMap<_, _> = [(
        key.clone(),
        ClusterAggregate {
            sum: 6.0,
            number_of_hosts: 3,
            min: 1.0,
            max: 3.0,
            deviation: None,
        },
    )]
    .into_iter()
    .collect();
    store
        .save_cluster_aggregates(Resolution::Second, &rows)
        .await
        .unwrap();
    store
        .save_cluster_aggregates(Resolution::Second, &rows)
        .await
        .unwrap();

    let stored = store
        .get_cluster_aggregates(Resolution::Second, 0, 60_000)
        .await
        .unwrap();
    assert_eq!(stored, rows);
}

#[tokio::test]
async fn host_rows_round_trip_per_tier() {
    let (_dir, store, _) = temp_store().await;
    let key = HostMetricKey::from_series(&SeriesKey::new("mem", "HOST", None, "h1"), 3_600_000);
    let rows: BTreeMap<_, _> = [(
        key.clone(),
        HostAggregate {
            sum: 10.0,
            count: 4,
            min: 1.0,
            max: 4.0,
        },
    )]
    .into_iter()
    .collect();

    assert_eq!(store.save_host_aggregates(Resolution::Hour, &rows).await.unwrap(), 1);

    let hourly = store
        .get_host_aggregates(Resolution::Hour, 0, 7_200_000)
        .await
        .unwrap();
    assert_eq!(hourly, vec![(key, rows.values().copied().next().unwrap())]);
    assert!(
        store
            .get_host_aggregates(Resolution::Minute, 0, 7_200_000)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(store.get_host_aggregates(Resolution::Second, 0, 1).await.is_err());
}

#[tokio::test]
async fn malformed_rows_are_skipped() {
    let (_dir, store, path) = temp_store().await;
    store
        .insert_samples(&[gauge("cpu", "HOST", "h1", 1_000, 1.0)])
        .await
        .unwrap();

    let pool = side_pool(&path).await;
    sqlx::query(
        "INSERT INTO metric_record (metric_name, app_id, instance_id, hostname, server_time, metric_value, kind) VALUES ('cpu', 'HOST', '', 'h2', 2000, 5.0, 'BOGUS')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO metric_record_minute (metric_name, app_id, instance_id, hostname, server_time, metric_sum, metric_count, metric_min, metric_max) VALUES ('cpu', 'HOST', '', 'h1', 0, 1.0, 0, 1.0, 1.0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO metric_aggregate (metric_name, app_id, instance_id, server_time, metric_sum, hosts_count, metric_min, metric_max) VALUES ('cpu', 'HOST', '', 30000, 1.0, 0, 1.0, 1.0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let raw = store.get_raw_samples(0, 10_000).await.unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].key.host_name, "h1");
    assert!(
        store
            .get_host_aggregates(Resolution::Minute, 0, 60_000)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .get_cluster_aggregates(Resolution::Second, 0, 60_000)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn rollup_groups_by_identity_and_stamps_window_start() {
    let (_dir, store, _) = temp_store().await;
    let mut rows = BTreeMap::new();
    for (i, (sum, hosts)) in [(3.0, 2), (5.0, 2), (4.0, 3)].into_iter().enumerate() {
        rows.insert(
            ClusterMetricKey::new("load", "HOST", None, 330_000 + i as i64 * 30_000),
            ClusterAggregate {
                sum,
                number_of_hosts: hosts,
                min: 0.5,
                max: 2.5,
                deviation: None,
            },
        );
    }
    rows.insert(
        ClusterMetricKey::new("load", "HOST", Some("cpu0".into()), 330_000),
        ClusterAggregate::from_host_value(7.0),
    );
    store
        .save_cluster_aggregates(Resolution::Second, &rows)
        .await
        .unwrap();

    let partials = store
        .rollup_cluster_aggregates(Resolution::Second, 300_000, 600_000)
        .await
        .unwrap();

    assert_eq!(partials.len(), 2);
    assert!(partials.iter().all(|(k, _)| k.timestamp == 300_000));
    let (_, load) = partials
        .iter()
        .find(|(k, _)| k.instance_id.is_none())
        .unwrap();
    assert_close(load.sum_of_sums, 12.0);
    assert_eq!(load.rows, 3);
    assert_eq!(load.host_total, 7);
    assert_close(load.min, 0.5);
    assert_close(load.max, 2.5);
}

#[tokio::test]
async fn checkpoints_default_update_and_survive_reconnect() {
    let (_dir, store, path) = temp_store().await;

    assert_eq!(store.read_checkpoint("host_minute").await.unwrap(), NO_CHECKPOINT);
    store.write_checkpoint("host_minute", 300_000).await.unwrap();
    store.write_checkpoint("host_minute", 600_000).await.unwrap();
    store.write_checkpoint("cluster_second", 120_000).await.unwrap();
    drop(store);

    let reopened = MetricStore::connect(&path, 2, 100).await.unwrap();
    reopened.init().await.unwrap();
    assert_eq!(reopened.read_checkpoint("host_minute").await.unwrap(), 600_000);
    assert_eq!(reopened.read_checkpoint("cluster_second").await.unwrap(), 120_000);
    assert_eq!(reopened.read_checkpoint("host_daily").await.unwrap(), NO_CHECKPOINT);
}

#[tokio::test]
async fn prune_removes_rows_before_cutoff() {
    let (_dir, store, _) = temp_store().await;
    store
        .insert_samples(&[
            gauge("cpu", "HOST", "h1", 1_000, 1.0),
            gauge("cpu", "HOST", "h1", 2_000, 1.0),
            gauge("cpu", "HOST", "h1", 5_000, 1.0),
        ])
        .await
        .unwrap();

    assert_eq!(store.prune_raw_before(5_000).await.unwrap(), 2);
    assert_eq!(store.get_raw_samples(0, 10_000).await.unwrap().len(), 1);
    assert_eq!(
        store.prune_cluster_before(Resolution::Day, 5_000).await.unwrap(),
        0
    );
    store.vacuum().await.unwrap();
}
