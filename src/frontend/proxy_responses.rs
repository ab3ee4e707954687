// Gateway-generated replies, as opposed to BIZ replies relayed from upstream.

use crate::errors::{ERROR_CODE_KEY, ErrorCode};
use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const SESSION_ID_KEY: &str = "session_id";
pub const REASON_KEY: &str = "reason";

// -----------------------------------------------------------------------------
// ----- Local Responses -------------------------------------------------------

pub(crate) fn auth_ok(request: &GatewayMessage, session_id: &str) -> GatewayMessage {
    GatewayMessage::reply_to(request, MessageType::AuthOk).with_extension(SESSION_ID_KEY, session_id)
}

pub(crate) fn auth_fail(request: &GatewayMessage, reason: &str) -> GatewayMessage {
    GatewayMessage::reply_to(request, MessageType::AuthFail)
        .with_extension(ERROR_CODE_KEY, ErrorCode::AuthFailed.as_str())
        .with_extension(REASON_KEY, reason)
}

pub(crate) fn heartbeat(request: &GatewayMessage) -> GatewayMessage {
    GatewayMessage::reply_to(request, MessageType::Heartbeat)
}

pub(crate) fn push_heartbeat(request: &GatewayMessage) -> GatewayMessage {
    GatewayMessage::reply_to(request, MessageType::PushHeartbeat)
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
