// Aggregators: one checkpoint-driven scheduler, many window behaviours.
//
// Each tier implements Aggregatable; Scheduler owns the timing and checkpoint
// protocol and calls do_work for at most one window per tick.

mod after_source;
mod cluster;
mod cluster_second;
mod host;
mod scheduler;

use std::future::Future;

pub use after_source::AfterSource;
pub use cluster::{ClusterTimeAggregator, fold_partials};
pub use cluster_second::{
    ClusterSecondAggregator, LIVE_HOSTS_METRIC, SeriesSource, SliceSettings, aggregate_slices,
};
pub use host::{HostAggregator, rollup_host_rows, rollup_samples};
pub use scheduler::{
    AggregatorStatus, AggregatorStatusSnapshot, Scheduler, TickError, TickOutcome,
    round_to_interval,
};

/// Domain work for one window `[start, end)`.
///
/// `Ok(true)` lets the scheduler advance the checkpoint to `end`. `Ok(false)` and
/// `Err` both leave it in place so the same window is retried next tick.
pub trait Aggregatable: Send + Sync {
    fn do_work(&self, start: i64, end: i64) -> impl Future<Output = anyhow::Result<bool>> + Send;
}
