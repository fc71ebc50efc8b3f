// Table layout: raw samples, per-host tiers, cluster tiers, checkpoints.
// Every data table is keyed by identity + server_time, so upserts are idempotent.

use sqlx::SqlitePool;

use crate::models::Resolution;

pub(super) const RAW_TABLE: &str = "metric_record";
pub(super) const CHECKPOINT_TABLE: &str = "aggregator_checkpoint";

const HOST_TIERS: [Resolution; 3] = [Resolution::Minute, Resolution::Hour, Resolution::Day];
const CLUSTER_TIERS: [Resolution; 4] = [
    Resolution::Second,
    Resolution::Minute,
    Resolution::Hour,
    Resolution::Day,
];

/// Creates all tables and indexes if not present.
pub(super) async fn init_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {RAW_TABLE} (
            metric_name TEXT NOT NULL,
            app_id TEXT NOT NULL,
            instance_id TEXT NOT NULL DEFAULT '',
            hostname TEXT NOT NULL,
            server_time INTEGER NOT NULL,
            metric_value REAL NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (metric_name, app_id, instance_id, hostname, server_time)
        )
        "#
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{RAW_TABLE}_server_time ON {RAW_TABLE}(server_time)"
    ))
    .execute(pool)
    .await?;

    for table in HOST_TIERS.iter().filter_map(|r| r.host_table()) {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                metric_name TEXT NOT NULL,
                app_id TEXT NOT NULL,
                instance_id TEXT NOT NULL DEFAULT '',
                hostname TEXT NOT NULL,
                server_time INTEGER NOT NULL,
                metric_sum REAL NOT NULL,
                metric_count INTEGER NOT NULL,
                metric_min REAL NOT NULL,
                metric_max REAL NOT NULL,
                PRIMARY KEY (metric_name, app_id, instance_id, hostname, server_time)
            )
            "#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_server_time ON {table}(server_time)"
        ))
        .execute(pool)
        .await?;
    }

    for table in CLUSTER_TIERS.iter().map(|r| r.cluster_table()) {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                metric_name TEXT NOT NULL,
                app_id TEXT NOT NULL,
                instance_id TEXT NOT NULL DEFAULT '',
                server_time INTEGER NOT NULL,
                metric_sum REAL NOT NULL,
                hosts_count INTEGER NOT NULL,
                metric_min REAL NOT NULL,
                metric_max REAL NOT NULL,
                PRIMARY KEY (metric_name, app_id, instance_id, server_time)
            )
            "#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_server_time ON {table}(server_time)"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {CHECKPOINT_TABLE} (
            aggregator_id TEXT PRIMARY KEY,
            checkpoint INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    Ok(())
}
