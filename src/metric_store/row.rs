// Row decoding. A row that cannot become a model value yields RowError; readers
// skip it with a warning instead of failing the whole window.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{
    ClusterAggregate, ClusterMetricKey, ClusterPartial, HostAggregate, HostMetricKey, MetricKind,
    ParseKindError, RawSample, SeriesKey,
};

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("column decode failed: {0}")]
    Decode(#[from] sqlx::Error),
    #[error(transparent)]
    Kind(#[from] ParseKindError),
    #[error("non-finite value in column {column}")]
    NonFinite { column: &'static str },
    #[error("metric_count must be > 0, got {0}")]
    NonPositiveCount(i64),
    #[error("hosts_count must be >= 1, got {0}")]
    NoHosts(i64),
}

/// Empty string in the instance_id column means "no instance".
pub(super) fn instance_column(instance_id: Option<&String>) -> &str {
    instance_id.map(String::as_str).unwrap_or("")
}

fn instance_from_column(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn finite(row: &SqliteRow, column: &'static str) -> Result<f64, RowError> {
    let v: f64 = row.try_get(column)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(RowError::NonFinite { column })
    }
}

pub(super) fn parse_sample(row: &SqliteRow) -> Result<RawSample, RowError> {
    let kind: String = row.try_get("kind")?;
    let kind: MetricKind = kind.parse()?;
    Ok(RawSample {
        key: SeriesKey {
            metric_name: row.try_get("metric_name")?,
            app_id: row.try_get("app_id")?,
            instance_id: instance_from_column(row.try_get("instance_id")?),
            host_name: row.try_get("hostname")?,
        },
        timestamp: row.try_get("server_time")?,
        value: finite(row, "metric_value")?,
        kind,
    })
}

pub(super) fn parse_host_aggregate(
    row: &SqliteRow,
) -> Result<(HostMetricKey, HostAggregate), RowError> {
    let count: i64 = row.try_get("metric_count")?;
    if count <= 0 {
        return Err(RowError::NonPositiveCount(count));
    }
    let key = HostMetricKey {
        metric_name: row.try_get("metric_name")?,
        app_id: row.try_get("app_id")?,
        instance_id: instance_from_column(row.try_get("instance_id")?),
        host_name: row.try_get("hostname")?,
        timestamp: row.try_get("server_time")?,
    };
    let agg = HostAggregate {
        sum: finite(row, "metric_sum")?,
        count: count as u64,
        min: finite(row, "metric_min")?,
        max: finite(row, "metric_max")?,
    };
    Ok((key, agg))
}

fn cluster_key(row: &SqliteRow) -> Result<ClusterMetricKey, RowError> {
    Ok(ClusterMetricKey {
        metric_name: row.try_get("metric_name")?,
        app_id: row.try_get("app_id")?,
        instance_id: instance_from_column(row.try_get("instance_id")?),
        timestamp: row.try_get("server_time")?,
    })
}

pub(super) fn parse_cluster_aggregate(
    row: &SqliteRow,
) -> Result<(ClusterMetricKey, ClusterAggregate), RowError> {
    let hosts: i64 = row.try_get("hosts_count")?;
    if hosts < 1 {
        return Err(RowError::NoHosts(hosts));
    }
    let agg = ClusterAggregate {
        sum: finite(row, "metric_sum")?,
        number_of_hosts: hosts as u32,
        min: finite(row, "metric_min")?,
        max: finite(row, "metric_max")?,
        deviation: None,
    };
    Ok((cluster_key(row)?, agg))
}

/// Row of the grouped rollup query; `server_time` is the window start.
pub(super) fn parse_cluster_partial(
    row: &SqliteRow,
) -> Result<(ClusterMetricKey, ClusterPartial), RowError> {
    let rows: i64 = row.try_get("row_count")?;
    if rows <= 0 {
        return Err(RowError::NonPositiveCount(rows));
    }
    let host_total: i64 = row.try_get("host_total")?;
    let partial = ClusterPartial {
        sum_of_sums: finite(row, "sum_of_sums")?,
        rows: rows as u64,
        host_total: host_total.max(0) as u64,
        min: finite(row, "metric_min")?,
        max: finite(row, "metric_max")?,
    };
    Ok((cluster_key(row)?, partial))
}
