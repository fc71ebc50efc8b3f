// Background maintenance: prune every table past its TTL, evict old live-cache
// points, and VACUUM on a schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::RetentionConfig;
use crate::live_cache::LiveSampleCache;
use crate::metric_store::MetricStore;
use crate::models::Resolution;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Rows and points removed by one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub raw: u64,
    pub host: u64,
    pub cluster: u64,
    pub live_points: usize,
}

/// Spawns the maintenance task. Returns a join handle.
pub fn spawn(
    store: Arc<MetricStore>,
    cache: Arc<LiveSampleCache>,
    config: RetentionConfig,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, cache, config, shutdown).await;
    })
}

#[instrument(skip(store, cache, config, shutdown), fields(interval_secs = config.prune_interval_secs))]
async fn run(
    store: Arc<MetricStore>,
    cache: Arc<LiveSampleCache>,
    config: RetentionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut prune_interval = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    let vacuum_task = tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = prune_interval.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match prune_once(&store, &cache, &config, now_ms).await {
                    Ok(report) if report != PruneReport::default() => {
                        info!(
                            raw = report.raw,
                            host = report.host,
                            cluster = report.cluster,
                            live_points = report.live_points,
                            "pruned expired data"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "prune failed"),
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
    vacuum_task.abort();
    tracing::debug!("maintenance stopped");
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RetentionConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// One retention pass relative to `now_ms`. Used by the maintenance loop and tests.
pub async fn prune_once(
    store: &MetricStore,
    cache: &LiveSampleCache,
    config: &RetentionConfig,
    now_ms: i64,
) -> anyhow::Result<PruneReport> {
    let days = |d: u64| before(now_ms, d, MS_PER_DAY);
    let mut report = PruneReport {
        raw: store
            .prune_raw_before(before(now_ms, config.raw_ttl_hours, MS_PER_HOUR))
            .await?,
        ..PruneReport::default()
    };

    for (resolution, ttl_days) in [
        (Resolution::Minute, config.minute_ttl_days),
        (Resolution::Hour, config.hourly_ttl_days),
        (Resolution::Day, config.daily_ttl_days),
    ] {
        report.host += store.prune_host_before(resolution, days(ttl_days)).await?;
    }

    for (resolution, ttl_days) in [
        (Resolution::Second, config.cluster_second_ttl_days),
        (Resolution::Minute, config.cluster_minute_ttl_days),
        (Resolution::Hour, config.cluster_hourly_ttl_days),
        (Resolution::Day, config.cluster_daily_ttl_days),
    ] {
        report.cluster += store.prune_cluster_before(resolution, days(ttl_days)).await?;
    }

    report.live_points = cache
        .evict_before(before(now_ms, config.live_cache_retention_secs, 1000))
        .await;
    Ok(report)
}

/// `now_ms - amount * unit_ms`, saturating instead of wrapping.
fn before(now_ms: i64, amount: u64, unit_ms: i64) -> i64 {
    let span = i64::try_from(amount)
        .unwrap_or(i64::MAX)
        .saturating_mul(unit_ms);
    now_ms.saturating_sub(span)
}
