// Domain models: raw samples, series, and the aggregate rows each tier writes.

mod aggregate;
mod resolution;
mod sample;

pub use aggregate::{
    ClusterAggregate, ClusterMetricKey, ClusterPartial, HostAggregate, HostMetricKey,
};
pub use resolution::{Level, Resolution, aggregator_id};
pub use sample::{
    HOST_APP_ID, MetricKind, ParseKindError, RawSample, SeriesKey, TimeSeries, group_series,
};
