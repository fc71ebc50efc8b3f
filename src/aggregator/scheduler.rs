// Checkpoint state machine. Per tick: reset when the checkpoint is missing or
// too stale, wait when the next window has not elapsed, otherwise aggregate
// exactly one window and persist its end.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Aggregatable;
use crate::checkpoint::{CheckpointStore, NO_CHECKPOINT};

/// Truncates `timestamp` down to a multiple of `interval_ms` (epoch aligned).
pub fn round_to_interval(timestamp: i64, interval_ms: i64) -> i64 {
    if interval_ms <= 0 {
        return timestamp;
    }
    timestamp - timestamp.rem_euclid(interval_ms)
}

/// What one tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No usable checkpoint; jumped to `checkpoint` without aggregating.
    Reset { checkpoint: i64 },
    /// The next full window has not elapsed yet.
    NotReady { checkpoint: i64 },
    Aggregated { start: i64, end: i64 },
    /// do_work failed; the window will be retried.
    Failed { start: i64, end: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("{id}: checkpoint read failed: {error:#}")]
    ReadCheckpoint { id: String, error: anyhow::Error },
    #[error("{id}: checkpoint write of {timestamp} failed: {error:#}")]
    WriteCheckpoint {
        id: String,
        timestamp: i64,
        error: anyhow::Error,
    },
}

/// Live counters for one aggregator, shared with the status endpoint.
#[derive(Debug)]
pub struct AggregatorStatus {
    id: String,
    sleep_interval_ms: i64,
    last_aggregated_end_time: AtomicI64,
    windows_aggregated: AtomicU64,
    failed_windows: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatusSnapshot {
    pub id: String,
    pub sleep_interval_ms: i64,
    pub last_aggregated_end_time: i64,
    pub windows_aggregated: u64,
    pub failed_windows: u64,
}

impl AggregatorStatus {
    pub fn new(id: impl Into<String>, sleep_interval_ms: i64) -> Self {
        Self {
            id: id.into(),
            sleep_interval_ms,
            last_aggregated_end_time: AtomicI64::new(NO_CHECKPOINT),
            windows_aggregated: AtomicU64::new(0),
            failed_windows: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_aggregated_end_time(&self) -> i64 {
        self.last_aggregated_end_time.load(Ordering::Relaxed)
    }

    pub fn windows_aggregated(&self) -> u64 {
        self.windows_aggregated.load(Ordering::Relaxed)
    }

    pub fn failed_windows(&self) -> u64 {
        self.failed_windows.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AggregatorStatusSnapshot {
        AggregatorStatusSnapshot {
            id: self.id.clone(),
            sleep_interval_ms: self.sleep_interval_ms,
            last_aggregated_end_time: self.last_aggregated_end_time(),
            windows_aggregated: self.windows_aggregated(),
            failed_windows: self.failed_windows(),
        }
    }

    fn set_last_aggregated_end_time(&self, timestamp: i64) {
        self.last_aggregated_end_time
            .store(timestamp, Ordering::Relaxed);
    }
}

/// Drives one Aggregatable on a fixed period `S`; windows are always `[k*S, (k+1)*S)`.
pub struct Scheduler<A, C> {
    id: String,
    sleep_interval_ms: i64,
    cutoff_multiplier: i64,
    aggregator: A,
    checkpoints: Arc<C>,
    status: Arc<AggregatorStatus>,
}

impl<A, C> Scheduler<A, C>
where
    A: Aggregatable,
    C: CheckpointStore,
{
    pub fn new(
        id: impl Into<String>,
        sleep_interval_ms: i64,
        cutoff_multiplier: i64,
        aggregator: A,
        checkpoints: Arc<C>,
    ) -> Self {
        let id = id.into();
        let status = Arc::new(AggregatorStatus::new(id.clone(), sleep_interval_ms));
        Self {
            id,
            sleep_interval_ms,
            cutoff_multiplier,
            aggregator,
            checkpoints,
            status,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Arc<AggregatorStatus> {
        self.status.clone()
    }

    /// One scheduling decision at wall-clock `now_ms`.
    pub async fn run_once(&self, now_ms: i64) -> Result<TickOutcome, TickError> {
        let s = self.sleep_interval_ms;
        let rounded_now = round_to_interval(now_ms, s);
        let checkpoint = self
            .checkpoints
            .read_checkpoint(&self.id)
            .await
            .map_err(|error| TickError::ReadCheckpoint {
                id: self.id.clone(),
                error,
            })?;

        if checkpoint == NO_CHECKPOINT || rounded_now - checkpoint > self.cutoff_multiplier * s {
            self.status.set_last_aggregated_end_time(rounded_now);
            self.write_checkpoint(rounded_now).await?;
            info!(
                aggregator = %self.id,
                checkpoint,
                reset_to = rounded_now,
                "checkpoint missing or beyond cutoff, skipping backlog"
            );
            return Ok(TickOutcome::Reset {
                checkpoint: rounded_now,
            });
        }

        if checkpoint + s > rounded_now {
            self.status.set_last_aggregated_end_time(checkpoint);
            debug!(aggregator = %self.id, checkpoint, "next window not elapsed");
            return Ok(TickOutcome::NotReady { checkpoint });
        }

        let start = round_to_interval(checkpoint, s);
        let end = start + s;
        match self.aggregator.do_work(start, end).await {
            Ok(true) => {
                self.status.set_last_aggregated_end_time(end);
                self.status.windows_aggregated.fetch_add(1, Ordering::Relaxed);
                self.write_checkpoint(end).await?;
                info!(aggregator = %self.id, start, end, "window aggregated");
                Ok(TickOutcome::Aggregated { start, end })
            }
            Ok(false) => {
                self.status.failed_windows.fetch_add(1, Ordering::Relaxed);
                warn!(aggregator = %self.id, start, end, "window not completed, will retry");
                Ok(TickOutcome::Failed { start, end })
            }
            Err(e) => {
                self.status.failed_windows.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, aggregator = %self.id, start, end, "window failed, will retry");
                Ok(TickOutcome::Failed { start, end })
            }
        }
    }

    async fn write_checkpoint(&self, timestamp: i64) -> Result<(), TickError> {
        self.checkpoints
            .write_checkpoint(&self.id, timestamp)
            .await
            .map_err(|error| TickError::WriteCheckpoint {
                id: self.id.clone(),
                timestamp,
                error,
            })
    }
}

impl<A, C> Scheduler<A, C>
where
    A: Aggregatable + 'static,
    C: CheckpointStore + 'static,
{
    /// Runs the tick loop until `shutdown` flips to true or its sender is dropped.
    /// A tick in flight at shutdown is dropped before its checkpoint write.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_millis(self.sleep_interval_ms.max(1) as u64);
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        tokio::select! {
                            _ = shutdown.changed() => {
                                info!(aggregator = %self.id, "tick interrupted by shutdown");
                                break;
                            }
                            result = self.run_once(now_ms) => {
                                if let Err(e) = result {
                                    warn!(error = %e, aggregator = %self.id, "tick failed");
                                }
                            }
                        }
                    }
                }
            }
            debug!(aggregator = %self.id, "aggregator stopped");
        })
    }
}
