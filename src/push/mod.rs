use bytes::Bytes;
use dashmap::DashMap;
use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::oneshot, time::timeout};
use tracing::{debug, warn};

use crate::config::PushSettings;
use crate::session::{HandleError, SessionManager};
use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Extension a client may attach to PUSH_FAIL to say why.
pub const PUSH_REASON_KEY: &str = "reason";

// -----------------------------------------------------------------------------
// ----- PushError -------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PushError {
    #[error("client {0} has no live session")]
    NoSession(String),

    #[error("delivery to {client_id} failed: {source}")]
    Send {
        client_id: String,
        #[source]
        source: HandleError,
    },

    #[error("client {client_id} rejected push: {reason}")]
    Rejected { client_id: String, reason: String },

    #[error("client {client_id} did not acknowledge within {timeout:?}")]
    AckTimeout { client_id: String, timeout: Duration },

    #[error("push to {0} abandoned")]
    Abandoned(String),
}

// -----------------------------------------------------------------------------
// ----- PushService -----------------------------------------------------------

struct AckWaiter {
    client_id: String,
    tx: oneshot::Sender<Result<(), String>>,
}

/// Server-initiated PUSH frames with client acknowledgement.
///
/// Push request ids come from one gateway-wide counter, so an ack is matched
/// by id and then checked against the client it was sent to.
pub struct PushService {
    sessions: Arc<dyn SessionManager>,
    ack_timeout: Duration,
    next_request_id: AtomicI64,
    waiters: DashMap<i64, AckWaiter>,
}

impl PushService {
    pub fn new(sessions: Arc<dyn SessionManager>, settings: &PushSettings) -> Self {
        Self {
            sessions,
            ack_timeout: settings.ack_timeout,
            next_request_id: AtomicI64::new(1),
            waiters: DashMap::new(),
        }
    }

    pub async fn push(
        &self,
        client_id: &str,
        biz_type: &str,
        body: impl Into<Bytes>,
    ) -> Result<(), PushError> {
        let session = self
            .sessions
            .get_session_by_client_id(client_id)
            .await
            .ok_or_else(|| PushError::NoSession(client_id.to_owned()))?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let message = GatewayMessage::new(MessageType::Push, request_id)
            .with_client_id(client_id)
            .with_biz_type(biz_type)
            .with_body(body);

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            request_id,
            AckWaiter {
                client_id: client_id.to_owned(),
                tx,
            },
        );

        if let Err(source) = session.handle().send(&message) {
            self.waiters.remove(&request_id);
            return Err(PushError::Send {
                client_id: client_id.to_owned(),
                source,
            });
        }
        debug!(client_id, request_id, biz_type, "push sent");

        let outcome = match timeout(self.ack_timeout, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.waiters.remove(&request_id);
                return Err(PushError::AckTimeout {
                    client_id: client_id.to_owned(),
                    timeout: self.ack_timeout,
                });
            }
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(PushError::Rejected {
                client_id: client_id.to_owned(),
                reason,
            }),
            Err(_) => Err(PushError::Abandoned(client_id.to_owned())),
        }
    }

    /// Resolve a waiter from a PUSH_OK / PUSH_FAIL frame received on the
    /// session of `client_id`. The clientId written in the frame itself is
    /// not trusted. Returns `false` when nothing was waiting for it.
    pub fn acknowledge(&self, client_id: &str, ack: &GatewayMessage) -> bool {
        let outcome = match ack.message_type {
            MessageType::PushOk => Ok(()),
            MessageType::PushFail => Err(ack
                .extension(PUSH_REASON_KEY)
                .map(str::to_owned)
                .unwrap_or_else(|| String::from_utf8_lossy(&ack.body).into_owned())),
            _ => return false,
        };

        let Some((_, waiter)) = self
            .waiters
            .remove_if(&ack.request_id, |_, w| w.client_id == client_id)
        else {
            warn!(
                client_id,
                request_id = ack.request_id,
                "ack for unknown push"
            );
            return false;
        };

        waiter.tx.send(outcome).is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
