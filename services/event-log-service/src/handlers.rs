use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::body::EventBody;
use crate::config::ErrorStatusMode;
use crate::error::IngestError;
use crate::models::{EventEntry, NewEventEntry, NotFoundResponse};
use crate::state::AppState;

pub async fn log_event(State(state): State<AppState>, EventBody(body): EventBody) -> Response {
    match ingest(&state, body).await {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(err) => {
            let status = match state.error_status {
                ErrorStatusMode::Corrected => err.status(),
                ErrorStatusMode::Legacy => StatusCode::OK,
            };
            (status, Json(err.to_response())).into_response()
        }
    }
}

async fn ingest(state: &AppState, body: Value) -> Result<EventEntry, IngestError> {
    let new_entry = NewEventEntry::from_body(body)
        .inspect_err(|err| tracing::warn!(error = %err, "event entry rejected"))?;

    let stored = state
        .store
        .insert(EventEntry::stamp(new_entry))
        .await
        .inspect_err(|err| tracing::error!(error = %err, "event entry insert failed"))?;

    tracing::info!(
        entry_id = %stored.id,
        sender = %stored.sender,
        air_readings = stored.air_readings.len(),
        soil_readings = stored.soil_readings.len(),
        "event entry stored"
    );
    Ok(stored)
}

/// Fallback for every unregistered path or method.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    let url = uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or_else(|| uri.path());
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            url: format!("{url} not found"),
        }),
    )
}
