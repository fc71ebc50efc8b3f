// Library for tests to access modules

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod live_cache;
pub mod maintenance;
pub mod metric_store;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod slicer;
