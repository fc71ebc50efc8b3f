// Wires the enabled tiers to their schedulers and spawns one task per aggregator.
// Tiers only share the metric store; each owns its checkpoint key. A chained
// tier whose source tier is enabled waits for it to cover each window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::aggregator::{
    AfterSource, Aggregatable, AggregatorStatus, ClusterSecondAggregator, ClusterTimeAggregator,
    HostAggregator, Scheduler, SliceSettings,
};
use crate::config::{AggregationConfig, TierSettings};
use crate::live_cache::LiveSampleCache;
use crate::metric_store::MetricStore;
use crate::models::{Level, Resolution};

/// Running aggregator tasks.
pub struct Pipeline {
    statuses: Vec<Arc<AggregatorStatus>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Pipeline {
    pub fn statuses(&self) -> Vec<Arc<AggregatorStatus>> {
        self.statuses.clone()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every aggregator task to stop (after shutdown was signalled).
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "aggregator task panicked");
            }
        }
    }
}

/// Attaches `cache` to the store when the slicing tier reads from it, so every
/// ingested sample reaches the cache.
pub fn ingestion_store(
    config: &AggregationConfig,
    store: MetricStore,
    cache: Arc<LiveSampleCache>,
) -> MetricStore {
    if config.in_memory_aggregation {
        store.with_live_cache(cache)
    } else {
        store
    }
}

/// Spawns one scheduler per enabled tier.
pub fn spawn(
    config: &AggregationConfig,
    store: Arc<MetricStore>,
    cache: Arc<LiveSampleCache>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Pipeline> {
    let mut pipeline = Pipeline {
        statuses: Vec::new(),
        handles: Vec::new(),
    };
    let mut launched: HashMap<(Level, Resolution), Arc<AggregatorStatus>> = HashMap::new();
    for tier in config.tiers() {
        if !tier.enabled {
            info!(aggregator = %tier.id, "aggregator disabled");
            continue;
        }
        let status = match (tier.level, tier.resolution) {
            (Level::Host, resolution) => {
                let aggregator = HostAggregator::new(store.clone(), resolution)?;
                let source = resolution
                    .source()
                    .and_then(|src| launched.get(&(Level::Host, src)));
                launch_chained(&mut pipeline, &tier, aggregator, source, &store, &shutdown)
            }
            (Level::Cluster, Resolution::Second) => {
                let settings = SliceSettings {
                    slice_width_ms: config.time_slice_interval_ms(),
                    lookback_ms: i64::try_from(config.interpolation_lookback_ms)?,
                    app_ids: config.app_ids.clone(),
                };
                if config.in_memory_aggregation {
                    let aggregator =
                        ClusterSecondAggregator::new(cache.clone(), store.clone(), settings);
                    launch(&mut pipeline, &tier, aggregator, &store, &shutdown)
                } else {
                    let aggregator =
                        ClusterSecondAggregator::new(store.clone(), store.clone(), settings);
                    launch(&mut pipeline, &tier, aggregator, &store, &shutdown)
                }
            }
            (Level::Cluster, resolution) => {
                let aggregator = ClusterTimeAggregator::new(store.clone(), resolution)?;
                let source = resolution
                    .cluster_source()
                    .and_then(|src| launched.get(&(Level::Cluster, src)));
                launch_chained(&mut pipeline, &tier, aggregator, source, &store, &shutdown)
            }
        };
        launched.insert((tier.level, tier.resolution), status);
    }
    info!(aggregators = pipeline.len(), "aggregation pipeline started");
    Ok(pipeline)
}

fn launch_chained<A: Aggregatable + 'static>(
    pipeline: &mut Pipeline,
    tier: &TierSettings,
    aggregator: A,
    source: Option<&Arc<AggregatorStatus>>,
    store: &Arc<MetricStore>,
    shutdown: &watch::Receiver<bool>,
) -> Arc<AggregatorStatus> {
    match source {
        Some(source) => {
            let max_wait = Duration::from_secs(tier.sleep_interval_secs);
            let gated = AfterSource::new(aggregator, source.clone(), max_wait);
            launch(pipeline, tier, gated, store, shutdown)
        }
        None => launch(pipeline, tier, aggregator, store, shutdown),
    }
}

fn launch<A: Aggregatable + 'static>(
    pipeline: &mut Pipeline,
    tier: &TierSettings,
    aggregator: A,
    store: &Arc<MetricStore>,
    shutdown: &watch::Receiver<bool>,
) -> Arc<AggregatorStatus> {
    let scheduler = Scheduler::new(
        tier.id.clone(),
        tier.sleep_interval_ms(),
        i64::from(tier.checkpoint_cutoff_multiplier),
        aggregator,
        store.clone(),
    );
    info!(
        aggregator = %tier.id,
        sleep_interval_secs = tier.sleep_interval_secs,
        cutoff_multiplier = tier.checkpoint_cutoff_multiplier,
        "starting aggregator"
    );
    let status = scheduler.status();
    pipeline.statuses.push(status.clone());
    pipeline.handles.push(scheduler.spawn(shutdown.clone()));
    status
}
