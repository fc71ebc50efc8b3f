// SQLite metric store: raw samples, host and cluster aggregate tiers, and checkpoints.
// Uses sqlx for async + connection pooling. Identities are plain columns; an absent
// instance id is stored as ''.
//
// Reads stream rows and skip malformed ones (see row::RowError). Writes are upserts
// keyed by identity + server_time, committed in batches of `write_batch_size` rows,
// so re-running a window overwrites rather than duplicates.
//
// With a live cache attached, inserted samples are also put into the cache once
// their batch commits.

mod row;
mod schema;

pub use row::RowError;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{instrument, warn};

use crate::checkpoint::{CheckpointStore, NO_CHECKPOINT};
use crate::live_cache::LiveSampleCache;
use crate::models::{
    ClusterAggregate, ClusterMetricKey, ClusterPartial, HostAggregate, HostMetricKey, RawSample,
    Resolution,
};
use row::instance_column;
use schema::{CHECKPOINT_TABLE, RAW_TABLE};

pub struct MetricStore {
    pool: SqlitePool,
    write_batch_size: usize,
    live_cache: Option<Arc<LiveSampleCache>>,
}

impl MetricStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        write_batch_size: usize,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            write_batch_size: write_batch_size.max(1),
            live_cache: None,
        })
    }

    /// Feed every sample stored by `insert_samples` into `cache` too.
    pub fn with_live_cache(mut self, cache: Arc<LiveSampleCache>) -> Self {
        self.live_cache = Some(cache);
        self
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        schema::init_tables(&self.pool).await
    }

    /// Upserts raw samples, then mirrors each committed batch into the live cache
    /// if one is attached. Returns rows written.
    #[instrument(skip(self, samples), fields(repo = "metric_store", operation = "insert_samples", samples_count = samples.len()))]
    pub async fn insert_samples(&self, samples: &[RawSample]) -> anyhow::Result<u64> {
        let sql = format!(
            "INSERT OR REPLACE INTO {RAW_TABLE} (metric_name, app_id, instance_id, hostname, server_time, metric_value, kind) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        let mut written = 0;
        for chunk in samples.chunks(self.write_batch_size) {
            let mut tx = self.pool.begin().await?;
            for s in chunk {
                sqlx::query(&sql)
                    .bind(&s.key.metric_name)
                    .bind(&s.key.app_id)
                    .bind(instance_column(s.key.instance_id.as_ref()))
                    .bind(&s.key.host_name)
                    .bind(s.timestamp)
                    .bind(s.value)
                    .bind(s.kind.as_str())
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
            tx.commit().await?;
            if let Some(cache) = &self.live_cache {
                cache.put_samples(chunk).await;
            }
        }
        Ok(written)
    }

    /// Raw samples in [from_ts, to_ts), ascending by server_time.
    #[instrument(skip(self), fields(repo = "metric_store", operation = "get_raw_samples"))]
    pub async fn get_raw_samples(&self, from_ts: i64, to_ts: i64) -> anyhow::Result<Vec<RawSample>> {
        let sql = format!(
            "SELECT metric_name, app_id, instance_id, hostname, server_time, metric_value, kind
             FROM {RAW_TABLE} WHERE server_time >= $1 AND server_time < $2
             ORDER BY server_time ASC"
        );
        let mut rows = sqlx::query(&sql).bind(from_ts).bind(to_ts).fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(r) = rows.try_next().await? {
            push_parsed(&mut out, &r, RAW_TABLE, row::parse_sample);
        }
        Ok(out)
    }

    #[instrument(skip(self, rows), fields(repo = "metric_store", operation = "save_host_aggregates", resolution = resolution.as_str(), rows_count = rows.len()))]
    pub async fn save_host_aggregates(
        &self,
        resolution: Resolution,
        rows: &BTreeMap<HostMetricKey, HostAggregate>,
    ) -> anyhow::Result<u64> {
        let table = host_table(resolution)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {table} (metric_name, app_id, instance_id, hostname, server_time, metric_sum, metric_count, metric_min, metric_max) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        let entries: Vec<_> = rows.iter().collect();
        let mut written = 0;
        for chunk in entries.chunks(self.write_batch_size) {
            let mut tx = self.pool.begin().await?;
            for (key, agg) in chunk {
                sqlx::query(&sql)
                    .bind(&key.metric_name)
                    .bind(&key.app_id)
                    .bind(instance_column(key.instance_id.as_ref()))
                    .bind(&key.host_name)
                    .bind(key.timestamp)
                    .bind(agg.sum)
                    .bind(agg.count as i64)
                    .bind(agg.min)
                    .bind(agg.max)
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
            tx.commit().await?;
        }
        Ok(written)
    }

    /// Host rows of `resolution` with period start in [from_ts, to_ts).
    #[instrument(skip(self), fields(repo = "metric_store", operation = "get_host_aggregates", resolution = resolution.as_str()))]
    pub async fn get_host_aggregates(
        &self,
        resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<(HostMetricKey, HostAggregate)>> {
        let table = host_table(resolution)?;
        let sql = format!(
            "SELECT metric_name, app_id, instance_id, hostname, server_time, metric_sum, metric_count, metric_min, metric_max
             FROM {table} WHERE server_time >= $1 AND server_time < $2
             ORDER BY server_time ASC"
        );
        let mut rows = sqlx::query(&sql).bind(from_ts).bind(to_ts).fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(r) = rows.try_next().await? {
            push_parsed(&mut out, &r, table, row::parse_host_aggregate);
        }
        Ok(out)
    }

    #[instrument(skip(self, rows), fields(repo = "metric_store", operation = "save_cluster_aggregates", resolution = resolution.as_str(), rows_count = rows.len()))]
    pub async fn save_cluster_aggregates(
        &self,
        resolution: Resolution,
        rows: &BTreeMap<ClusterMetricKey, ClusterAggregate>,
    ) -> anyhow::Result<u64> {
        let table = resolution.cluster_table();
        let sql = format!(
            "INSERT OR REPLACE INTO {table} (metric_name, app_id, instance_id, server_time, metric_sum, hosts_count, metric_min, metric_max) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        let entries: Vec<_> = rows.iter().collect();
        let mut written = 0;
        for chunk in entries.chunks(self.write_batch_size) {
            let mut tx = self.pool.begin().await?;
            for (key, agg) in chunk {
                sqlx::query(&sql)
                    .bind(&key.metric_name)
                    .bind(&key.app_id)
                    .bind(instance_column(key.instance_id.as_ref()))
                    .bind(key.timestamp)
                    .bind(agg.sum)
                    .bind(i64::from(agg.number_of_hosts))
                    .bind(agg.min)
                    .bind(agg.max)
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
            tx.commit().await?;
        }
        Ok(written)
    }

    /// Cluster rows of `resolution` with timestamp in [from_ts, to_ts).
    #[instrument(skip(self), fields(repo = "metric_store", operation = "get_cluster_aggregates", resolution = resolution.as_str()))]
    pub async fn get_cluster_aggregates(
        &self,
        resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<BTreeMap<ClusterMetricKey, ClusterAggregate>> {
        let table = resolution.cluster_table();
        let sql = format!(
            "SELECT metric_name, app_id, instance_id, server_time, metric_sum, hosts_count, metric_min, metric_max
             FROM {table} WHERE server_time >= $1 AND server_time < $2
             ORDER BY server_time ASC"
        );
        let mut rows = sqlx::query(&sql).bind(from_ts).bind(to_ts).fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(r) = rows.try_next().await? {
            push_parsed(&mut out, &r, table, row::parse_cluster_aggregate);
        }
        Ok(out.into_iter().collect())
    }

    /// Store-side rollup of `source` cluster rows in [from_ts, to_ts), grouped by
    /// metric, app and instance. Keys come back stamped with `from_ts`.
    #[instrument(skip(self), fields(repo = "metric_store", operation = "rollup_cluster_aggregates", source = source.as_str()))]
    pub async fn rollup_cluster_aggregates(
        &self,
        source: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> anyhow::Result<Vec<(ClusterMetricKey, ClusterPartial)>> {
        let table = source.cluster_table();
        let sql = format!(
            "SELECT metric_name, app_id, instance_id, MIN(server_time) AS server_time,
                    SUM(metric_sum) AS sum_of_sums, COUNT(*) AS row_count,
                    SUM(hosts_count) AS host_total,
                    MIN(metric_min) AS metric_min, MAX(metric_max) AS metric_max
             FROM {table}
             WHERE server_time >= $1 AND server_time < $2 AND hosts_count >= 1
             GROUP BY metric_name, app_id, instance_id"
        );
        let mut rows = sqlx::query(&sql).bind(from_ts).bind(to_ts).fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(r) = rows.try_next().await? {
            push_parsed(&mut out, &r, table, row::parse_cluster_partial);
        }
        Ok(out
            .into_iter()
            .map(|(key, partial)| (key.at(from_ts), partial))
            .collect())
    }

    /// Delete raw samples older than `cutoff_ts`.
    #[instrument(skip(self), fields(repo = "metric_store", operation = "prune_raw"))]
    pub async fn prune_raw_before(&self, cutoff_ts: i64) -> anyhow::Result<u64> {
        self.delete_before(RAW_TABLE, cutoff_ts).await
    }

    #[instrument(skip(self), fields(repo = "metric_store", operation = "prune_host", resolution = resolution.as_str()))]
    pub async fn prune_host_before(
        &self,
        resolution: Resolution,
        cutoff_ts: i64,
    ) -> anyhow::Result<u64> {
        self.delete_before(host_table(resolution)?, cutoff_ts).await
    }

    #[instrument(skip(self), fields(repo = "metric_store", operation = "prune_cluster", resolution = resolution.as_str()))]
    pub async fn prune_cluster_before(
        &self,
        resolution: Resolution,
        cutoff_ts: i64,
    ) -> anyhow::Result<u64> {
        self.delete_before(resolution.cluster_table(), cutoff_ts).await
    }

    async fn delete_before(&self, table: &str, cutoff_ts: i64) -> anyhow::Result<u64> {
        let r = sqlx::query(&format!("DELETE FROM {table} WHERE server_time < $1"))
            .bind(cutoff_ts)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "metric_store", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

impl CheckpointStore for MetricStore {
    async fn read_checkpoint(&self, aggregator_id: &str) -> anyhow::Result<i64> {
        let checkpoint = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT checkpoint FROM {CHECKPOINT_TABLE} WHERE aggregator_id = $1"
        ))
        .bind(aggregator_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(checkpoint.unwrap_or(NO_CHECKPOINT))
    }

    async fn write_checkpoint(&self, aggregator_id: &str, timestamp_ms: i64) -> anyhow::Result<()> {
        let updated_at = chrono::Utc::now().timestamp_millis();
        sqlx::query(&format!(
            "INSERT INTO {CHECKPOINT_TABLE} (aggregator_id, checkpoint, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT(aggregator_id) DO UPDATE SET checkpoint = excluded.checkpoint, updated_at = excluded.updated_at"
        ))
        .bind(aggregator_id)
        .bind(timestamp_ms)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn host_table(resolution: Resolution) -> anyhow::Result<&'static str> {
    resolution
        .host_table()
        .ok_or_else(|| anyhow::anyhow!("no host table for {} resolution", resolution.as_str()))
}

/// Parse one row; a malformed row is logged and dropped.
fn push_parsed<T>(
    out: &mut Vec<T>,
    r: &SqliteRow,
    table: &str,
    parse: fn(&SqliteRow) -> Result<T, RowError>,
) {
    match parse(r) {
        Ok(v) => out.push(v),
        Err(e) => warn!(error = %e, table, "skipping malformed row"),
    }
}
