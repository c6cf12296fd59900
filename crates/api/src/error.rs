//! API errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Request-scoped failures; none of them affect other requests
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Status page rendering failed: {0}")]
    Render(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("{}", self);
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
