// Checkpoint store: durable aggregator id -> last aggregated end time.
// Entries are partitioned by aggregator id, so no two aggregators contend on one key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

/// Value read back when an aggregator has never persisted a checkpoint.
pub const NO_CHECKPOINT: i64 = -1;

/// Atomic get/put of one checkpoint per aggregator id.
pub trait CheckpointStore: Send + Sync {
    /// Last persisted end time, or [`NO_CHECKPOINT`].
    fn read_checkpoint(&self, aggregator_id: &str)
    -> impl Future<Output = anyhow::Result<i64>> + Send;

    fn write_checkpoint(
        &self,
        aggregator_id: &str,
        timestamp_ms: i64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Process-local checkpoints; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a checkpoint as if an earlier run had written it.
    pub fn with_checkpoint(self, aggregator_id: &str, timestamp_ms: i64) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(aggregator_id.to_string(), timestamp_ms);
        }
        self
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn read_checkpoint(&self, aggregator_id: &str) -> anyhow::Result<i64> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint map poisoned"))?;
        Ok(entries.get(aggregator_id).copied().unwrap_or(NO_CHECKPOINT))
    }

    async fn write_checkpoint(&self, aggregator_id: &str, timestamp_ms: i64) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint map poisoned"))?;
        entries.insert(aggregator_id.to_string(), timestamp_ms);
        Ok(())
    }
}
