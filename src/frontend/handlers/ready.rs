use std::sync::Arc;
use tracing::{debug, warn};

use super::Flow;
use crate::errors::ErrorResponse;
use crate::frontend::context::ConnectionContext;
use crate::frontend::proxy_responses as responses;
use crate::server::GatewayState;
use crate::session::HandleError;
use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Authenticated Handler -------------------------------------------------

pub(crate) async fn handle_authenticated(
    state: &Arc<GatewayState>,
    context: &mut ConnectionContext,
    message: GatewayMessage,
) -> Flow {
    if let Some(session_id) = context.session_id() {
        state.sessions.update_last_active_time(session_id).await;
    }

    let reply = match message.message_type {
        // already authenticated; no second check
        MessageType::Auth => match context.session_id() {
            Some(session_id) => responses::auth_ok(&message, session_id),
            None => return Flow::Close,
        },

        MessageType::Heartbeat => responses::heartbeat(&message),

        MessageType::PushHeartbeat => responses::push_heartbeat(&message),

        MessageType::PushOk | MessageType::PushFail => {
            if let Some(session) = context.session.as_deref() {
                state.push.acknowledge(session.client_id(), &message);
            }
            return Flow::Continue;
        }

        MessageType::Biz => {
            dispatch_biz(state, context, message).await;
            return Flow::Continue;
        }

        MessageType::AuthOk
        | MessageType::AuthFail
        | MessageType::Push
        | MessageType::Error => {
            warn!(
                peer = %context.peer,
                message_type = ?message.message_type,
                "unexpected frame from client"
            );
            ErrorResponse::bad_request(format!(
                "{:?} is not accepted from clients",
                message.message_type
            ))
            .to_message(&message)
        }
    };

    if context.handle.send(&reply).is_err() {
        return Flow::Close;
    }
    Flow::Continue
}

// -----------------------------------------------------------------------------
// ----- Internal: BIZ ---------------------------------------------------------

async fn dispatch_biz(state: &Arc<GatewayState>, context: &ConnectionContext, message: GatewayMessage) {
    let job_state = state.clone();
    let handle = context.handle.clone();

    let job = Box::pin(async move {
        let reply = match job_state.route.route(&message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    client_id = %message.client_id,
                    request_id = message.request_id,
                    biz_type = %message.biz_type,
                    "route failed: {e}"
                );
                e.to_error_response().to_message(&message)
            }
        };

        match handle.send(&reply) {
            Ok(()) => {}
            Err(HandleError::Encode(e)) => {
                warn!(
                    request_id = message.request_id,
                    biz_type = %message.biz_type,
                    "upstream reply cannot be framed: {e}"
                );
                let error = ErrorResponse::internal_error("upstream reply cannot be framed")
                    .with_detail(e.to_string())
                    .to_message(&message);
                let _ = handle.send(&error);
            }
            Err(e) => debug!(request_id = reply.request_id, "dropping BIZ reply: {e}"),
        }
    });

    state.workers.submit(job).await;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
