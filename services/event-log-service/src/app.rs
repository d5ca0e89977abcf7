use axum::{extract::DefaultBodyLimit, routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::{log_event, not_found};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/api/v1/event", post(log_event).fallback(not_found))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
