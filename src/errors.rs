use bytes::Bytes;

use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const ERROR_CODE_KEY: &str = "error_code";
pub const ERROR_DETAIL_KEY: &str = "error_detail";

// -----------------------------------------------------------------------------
// ----- ErrorCode -------------------------------------------------------------

/// Classification carried in the `error_code` extension of ERROR and
/// AUTH_FAIL frames. Protocol violations have no code: those connections are
/// closed without a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    AuthFailed,
    BadRequest,
    ServiceNotFound,
    UpstreamUnavailable,
    UpstreamTimeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse ---------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Static -------------------------------------------------

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Builder ------------------------------------------------

impl ErrorResponse {
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Public -------------------------------------------------

impl ErrorResponse {
    /// Build the ERROR frame answering `request`. The cause travels in the
    /// body as UTF-8 text; the classification in the `error_code` extension.
    pub fn to_message(&self, request: &GatewayMessage) -> GatewayMessage {
        let mut message = GatewayMessage::reply_to(request, MessageType::Error)
            .with_extension(ERROR_CODE_KEY, self.code.as_str())
            .with_body(Bytes::from(self.message.clone()));

        if let Some(detail) = self.detail.as_deref() {
            message = message.with_extension(ERROR_DETAIL_KEY, detail);
        }

        message
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
