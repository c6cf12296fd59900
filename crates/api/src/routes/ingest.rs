//! Heartbeat ingest

use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
};
use ledger::AccessRecord;
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

/// First `id` in the query string; the empty id when absent
fn program_id(params: Vec<(String, String)>) -> String {
    params
        .into_iter()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value)
        .unwrap_or_default()
}

/// Record a heartbeat. Serves every path and method not claimed by another
/// route, and always succeeds.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    query: Option<Query<Vec<(String, String)>>>,
) -> StatusCode {
    let id = program_id(query.map(|Query(params)| params).unwrap_or_default());
    let at = state.ledger.record_heartbeat(&id);

    counter!("watchdog_heartbeats_total").increment(1);
    gauge!("watchdog_programs_tracked").set(state.ledger.len() as f64);

    let ip = peer
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    debug!("Heartbeat from {} for {:?}", ip, id);

    state.records.append(&AccessRecord { ip, id, at });

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_first_id_wins() {
        assert_eq!(program_id(pairs(&[("id", "a"), ("id", "b")])), "a");
    }

    #[test]
    fn test_other_params_ignored() {
        assert_eq!(program_id(pairs(&[("v", "2"), ("id", "svc")])), "svc");
    }

    #[test]
    fn test_missing_id_is_empty() {
        assert_eq!(program_id(pairs(&[("x", "1")])), "");
        assert_eq!(program_id(Vec::new()), "");
    }
}
