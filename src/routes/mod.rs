// HTTP routes: read-only status of the aggregation pipeline

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::aggregator::AggregatorStatus;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) statuses: Arc<Vec<Arc<AggregatorStatus>>>,
}

pub fn app(statuses: Vec<Arc<AggregatorStatus>>) -> Router {
    let state = AppState {
        statuses: Arc::new(statuses),
    };
    Router::new()
        .route("/", get(|| async { "rollupd: metrics aggregation running" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/aggregators", get(http::aggregators_handler)) // GET /api/aggregators
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
