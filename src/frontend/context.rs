use std::{net::SocketAddr, sync::Arc};

use crate::session::{ConnectionHandle, Session};
use crate::shared_types::AuthStage;

// -----------------------------------------------------------------------------
// ----- ConnectionContext -----------------------------------------------------

/// Per-connection state owned by the connection's read loop.
#[derive(Debug)]
pub(crate) struct ConnectionContext {
    pub(crate) peer: SocketAddr,
    pub(crate) stage: AuthStage,
    pub(crate) session: Option<Arc<Session>>,
    pub(crate) handle: ConnectionHandle,
}

impl ConnectionContext {
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        Self {
            peer: handle.peer(),
            stage: AuthStage::AwaitingAuth,
            session: None,
            handle,
        }
    }

    pub(crate) fn authenticate(&mut self, session: Arc<Session>) {
        self.session = Some(session);
        self.stage = AuthStage::Authenticated;
    }

    /// Terminal transition. Returns the session that must be destroyed.
    pub(crate) fn close(&mut self) -> Option<Arc<Session>> {
        self.stage = AuthStage::Closed;
        self.session.take()
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session.as_deref().map(Session::id)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
