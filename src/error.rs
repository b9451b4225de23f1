use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the rate limiting core and the HTTP shell around it.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    /// The shared store could not be reached, timed out, or kept losing the
    /// registered procedure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered with something other than `{admitted, remaining}`.
    #[error("Store protocol error: {0}")]
    ProtocolError(String),

    /// Invalid quota parameters or service configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl From<StoreError> for ThrottlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ThrottlerError::StoreUnavailable(msg),
            StoreError::ProcedureMissing => ThrottlerError::StoreUnavailable(
                "rate limit procedure is not registered with the store".to_string(),
            ),
            StoreError::MalformedReply(msg) => ThrottlerError::ProtocolError(msg),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        match err {
            ThrottlerError::StoreUnavailable(msg) => Self::new("service_unavailable", msg, 503),
            ThrottlerError::ProtocolError(msg) => Self::new("store_protocol_error", msg, 500),
            ThrottlerError::ConfigurationError(msg) => Self::new("configuration_error", msg, 400),
            ThrottlerError::InternalError(msg) => Self::new("internal_error", msg, 500),
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
