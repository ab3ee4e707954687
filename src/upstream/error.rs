use std::time::Duration;
use thiserror::Error;

use crate::errors::{ErrorCode, ErrorResponse};

// -----------------------------------------------------------------------------
// ----- UpstreamError ---------------------------------------------------------

/// Failures on the gateway -> backend leg.
///
/// `Clone` because a single connect attempt may be awaited by many callers.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("connect to {instance} failed: {reason}")]
    Connect { instance: String, reason: String },

    #[error("connect to {instance} timed out after {timeout:?}")]
    ConnectTimeout { instance: String, timeout: Duration },

    #[error("connection to {0} is not active")]
    NotActive(String),

    #[error("connection to {0} closed")]
    ConnectionClosed(String),

    #[error("write to {instance} failed: {reason}")]
    Write { instance: String, reason: String },

    #[error("request {request_id} timed out after {timeout:?}")]
    RequestTimeout { request_id: i64, timeout: Duration },

    #[error("cannot translate request: {0}")]
    Translate(String),
}

impl UpstreamError {
    pub fn to_error_response(&self) -> ErrorResponse {
        let code = match self {
            UpstreamError::RequestTimeout { .. } => ErrorCode::UpstreamTimeout,
            UpstreamError::Translate(_) => ErrorCode::BadRequest,
            _ => ErrorCode::UpstreamUnavailable,
        };
        ErrorResponse::new(code, self.to_string())
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
