pub mod backends;
pub mod blame;
pub mod search;
pub mod ws;

use axum::http::StatusCode;

use crate::backend::{ClientError, PoolError};
use crate::blame::HistoryError;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, String);

pub(crate) fn history_error(err: HistoryError) -> ApiError {
    (StatusCode::NOT_FOUND, err.to_string())
}

pub(crate) fn pool_error(err: PoolError) -> ApiError {
    match err {
        PoolError::UnknownBackend(_) => (StatusCode::NOT_FOUND, err.to_string()),
        PoolError::Closed => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub(crate) fn client_error(err: ClientError) -> ApiError {
    match err {
        ClientError::Query(message) => (StatusCode::BAD_REQUEST, message),
        ClientError::HandshakeTimeout => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{context}: {err}"),
    )
}
