//! Program Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use metrics::gauge;
use std::sync::Arc;

use crate::AppState;

/// Stop tracking a program
pub async fn deregister(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    if state.ledger.deregister(&id) {
        gauge!("watchdog_programs_tracked").set(state.ledger.len() as f64);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
