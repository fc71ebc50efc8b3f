// Pipeline wiring: enabled tiers spawn, disabled tiers don't, shutdown joins

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{gauge, temp_store};
use rollupd::checkpoint::{CheckpointStore, NO_CHECKPOINT};
use rollupd::config::AppConfig;
use rollupd::live_cache::LiveSampleCache;
use rollupd::models::Resolution;
use rollupd::pipeline;

const CONFIG: &str = r#"
[server]
port = 6188
host = "127.0.0.1"

[database]
path = "unused.db"
max_pool_size = 2

[aggregation.host_daily]
disabled = true

[aggregation.cluster_daily]
disabled = true
"#;

#[tokio::test]
async fn enabled_tiers_start_and_stop() {
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let (_dir, store, _) = temp_store().await;
    let store = Arc::new(store);
    let (tx, rx) = tokio::sync::watch::channel(false);

    let running = pipeline::spawn(
        &config.aggregation,
        store.clone(),
        Arc::new(LiveSampleCache::new()),
        rx,
    )
    .unwrap();

    let ids: Vec<String> = running
        .statuses()
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(
        ids,
        vec![
            "host_minute",
            "host_hourly",
            "cluster_second",
            "cluster_minute",
            "cluster_hourly"
        ]
    );

    // Each first tick resets the missing checkpoint.
    for _ in 0..300 {
        if store.read_checkpoint("cluster_hourly").await.unwrap() != NO_CHECKPOINT
            && store.read_checkpoint("host_minute").await.unwrap() != NO_CHECKPOINT
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_ne!(store.read_checkpoint("host_minute").await.unwrap(), NO_CHECKPOINT);
    assert_eq!(store.read_checkpoint("host_daily").await.unwrap(), NO_CHECKPOINT);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running.join())
        .await
        .expect("pipeline stops after shutdown");
}

const IN_MEMORY_CONFIG: &str = r#"
[server]
port = 6188
host = "127.0.0.1"

[database]
path = "unused.db"
max_pool_size = 2

[aggregation]
time_slice_interval_secs = 1
in_memory_aggregation = true

[aggregation.cluster_second]
sleep_interval_secs = 1
"#;

#[tokio::test]
async fn in_memory_slicing_sees_ingested_samples() {
    let config = AppConfig::load_from_str(IN_MEMORY_CONFIG).unwrap();
    let (_dir, store, _) = temp_store().await;
    let cache = Arc::new(LiveSampleCache::new());
    let store = Arc::new(pipeline::ingestion_store(
        &config.aggregation,
        store,
        cache.clone(),
    ));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let running = pipeline::spawn(&config.aggregation, store.clone(), cache.clone(), rx).unwrap();

    let now = chrono::Utc::now().timestamp_millis();
    store
        .insert_samples(&[
            gauge("disk_free", "HOST", "h1", now, 1.0),
            gauge("disk_free", "HOST", "h2", now, 2.0),
        ])
        .await
        .unwrap();
    assert_eq!(cache.len().await, 2);

    let mut rows = std::collections::BTreeMap::new();
    for _ in 0..100 {
        rows = store
            .get_cluster_aggregates(Resolution::Second, now - 60_000, now + 60_000)
            .await
            .unwrap();
        if !rows.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tx.send(true).unwrap();
    running.join().await;

    let disk: Vec<_> = rows
        .iter()
        .filter(|(k, _)| k.metric_name == "disk_free")
        .map(|(_, v)| *v)
        .collect();
    assert!(!disk.is_empty(), "no slice rows from the live cache: {rows:?}");
    for agg in disk {
        assert_eq!(agg.number_of_hosts, 2);
        assert!((agg.sum - 3.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn store_mode_leaves_live_cache_unfed() {
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let (_dir, store, _) = temp_store().await;
    let cache = Arc::new(LiveSampleCache::new());
    let store = pipeline::ingestion_store(&config.aggregation, store, cache.clone());

    store
        .insert_samples(&[gauge("disk_free", "HOST", "h1", 10_000, 1.0)])
        .await
        .unwrap();

    assert!(cache.is_empty().await);
    assert_eq!(store.get_raw_samples(0, 20_000).await.unwrap().len(), 1);
}
