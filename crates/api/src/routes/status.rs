//! Status Routes

use axum::{extract::State, response::Html, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// One program in the JSON status view
#[derive(Debug, Serialize)]
pub struct ProgramStatus {
    pub id: String,
    pub last_seen_at: DateTime<Utc>,
    pub alerted: bool,
    pub silent_for_secs: i64,
}

/// Response for the JSON status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub programs: Vec<ProgramStatus>,
    pub count: usize,
}

/// HTML status page
pub async fn status_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let entries = state.ledger.snapshot();
    let html = state
        .status_page
        .render(&entries, Utc::now(), state.stale_threshold)
        .await?;
    Ok(Html(html))
}

/// JSON status
pub async fn status_json(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let now = Utc::now();
    let programs: Vec<ProgramStatus> = state
        .ledger
        .snapshot()
        .into_iter()
        .map(|entry| ProgramStatus {
            silent_for_secs: now.signed_duration_since(entry.last_seen_at).num_seconds().max(0),
            id: entry.id,
            last_seen_at: entry.last_seen_at,
            alerted: entry.alerted,
        })
        .collect();

    Json(StatusResponse {
        count: programs.len(),
        programs,
    })
}
