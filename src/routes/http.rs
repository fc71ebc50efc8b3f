// GET handlers: version, aggregator status

use axum::{extract::State, response::IntoResponse};

use super::AppState;
use crate::aggregator::AggregatorStatusSnapshot;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/aggregators: one snapshot per running aggregator, in pipeline order.
pub(super) async fn aggregators_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots: Vec<AggregatorStatusSnapshot> =
        state.statuses.iter().map(|s| s.snapshot()).collect();
    axum::Json(snapshots)
}
