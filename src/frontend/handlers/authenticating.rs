use tracing::{info, warn};

use super::Flow;
use crate::frontend::context::ConnectionContext;
use crate::frontend::proxy_responses as responses;
use crate::server::GatewayState;
use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Extension carrying the shared secret on AUTH frames.
pub const TOKEN_KEY: &str = "token";

// -----------------------------------------------------------------------------
// ----- Awaiting Auth Handler -------------------------------------------------

pub(crate) async fn handle_awaiting_auth(
    state: &GatewayState,
    context: &mut ConnectionContext,
    message: GatewayMessage,
) -> Flow {
    if message.message_type != MessageType::Auth {
        warn!(
            peer = %context.peer,
            message_type = ?message.message_type,
            request_id = message.request_id,
            "frame before authentication; closing"
        );
        return Flow::Close;
    }

    if message.client_id.is_empty() {
        reject(context, &message, "missing clientId");
        return Flow::Continue;
    }

    let supplied = message.extension(TOKEN_KEY).unwrap_or_default();
    if !state.settings.auth.matches(supplied) {
        reject(context, &message, "invalid token");
        return Flow::Continue;
    }

    let session = state
        .sessions
        .create_session(&message.client_id, context.handle.clone())
        .await;

    info!(
        peer = %context.peer,
        client_id = %message.client_id,
        session_id = %session.id(),
        "client authenticated"
    );

    let reply = responses::auth_ok(&message, session.id());
    context.authenticate(session);

    if context.handle.send(&reply).is_err() {
        return Flow::Close;
    }
    Flow::Continue
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn reject(context: &ConnectionContext, message: &GatewayMessage, reason: &str) {
    warn!(
        peer = %context.peer,
        client_id = %message.client_id,
        "authentication failed: {reason}"
    );
    let _ = context.handle.send(&responses::auth_fail(message, reason));
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
