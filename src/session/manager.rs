use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{handle::ConnectionHandle, session::Session};

// -----------------------------------------------------------------------------
// ----- SessionManager --------------------------------------------------------

#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Install a session for `client_id`, evicting and closing any previous one.
    async fn create_session(&self, client_id: &str, handle: ConnectionHandle) -> Arc<Session>;

    async fn get_session(&self, session_id: &str) -> Option<Arc<Session>>;

    async fn get_session_by_client_id(&self, client_id: &str) -> Option<Arc<Session>>;

    /// Forget the session and close its connection.
    async fn remove_session(&self, session_id: &str) -> Option<Arc<Session>>;

    /// Returns `false` for an unknown session.
    async fn update_last_active_time(&self, session_id: &str) -> bool;
}

// -----------------------------------------------------------------------------
// ----- InMemorySessionManager ------------------------------------------------

#[derive(Default)]
pub struct InMemorySessionManager {
    sessions: DashMap<String, Arc<Session>>,
    by_client: DashMap<String, String>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn create_session(&self, client_id: &str, handle: ConnectionHandle) -> Arc<Session> {
        let session = Arc::new(Session::new(client_id, handle));

        // The client slot stays locked until the new session is visible, so two
        // concurrent logins for one client cannot both survive.
        let previous = {
            let mut slot = self.by_client.entry(client_id.to_owned()).or_default();
            self.sessions
                .insert(session.id().to_owned(), session.clone());
            std::mem::replace(&mut *slot, session.id().to_owned())
        };

        if let Some((_, old)) = self.sessions.remove(&previous) {
            info!(
                client_id,
                old_session = %old.id(),
                peer = %old.handle().peer(),
                "evicting previous session"
            );
            old.handle().close();
        }

        debug!(client_id, session_id = %session.id(), "session created");
        session
    }

    async fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    async fn get_session_by_client_id(&self, client_id: &str) -> Option<Arc<Session>> {
        let session_id = self.by_client.get(client_id)?.value().clone();
        self.get_session(&session_id).await
    }

    async fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(session_id)?;
        self.by_client
            .remove_if(session.client_id(), |_, id| id == session_id);

        session.set_authenticated(false);
        session.handle().close();
        debug!(session_id, client_id = %session.client_id(), "session removed");

        Some(session)
    }

    async fn update_last_active_time(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(port: u16) -> (ConnectionHandle, mpsc::UnboundedReceiver<bytes::Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(([127, 0, 0, 1], port).into(), tx), rx)
    }

    #[tokio::test]
    async fn create_and_look_up() {
        let manager = InMemorySessionManager::new();
        let (h1, _rx1) = handle(1);
        let session = manager.create_session("alice", h1).await;

        assert!(session.is_authenticated());
        let by_id = manager.get_session(session.id()).await.unwrap();
        let by_client = manager.get_session_by_client_id("alice").await.unwrap();
        assert!(Arc::ptr_eq(&by_id, &session));
        assert!(Arc::ptr_eq(&by_client, &session));
    }

    #[tokio::test]
    async fn new_login_evicts_and_closes_the_old_session() {
        let manager = InMemorySessionManager::new();
        let (h1, _rx1) = handle(1);
        let first = manager.create_session("alice", h1).await;
        let (h2, _rx2) = handle(2);
        let second = manager.create_session("alice", h2).await;

        assert!(first.handle().is_closed());
        assert!(!second.handle().is_closed());
        assert!(manager.get_session(first.id()).await.is_none());
        assert_eq!(
            manager.get_session_by_client_id("alice").await.unwrap().id(),
            second.id()
        );
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn removing_a_stale_session_keeps_the_client_index() {
        let manager = InMemorySessionManager::new();
        let (h1, _rx1) = handle(1);
        let first = manager.create_session("alice", h1).await;
        let (h2, _rx2) = handle(2);
        let second = manager.create_session("alice", h2).await;

        assert!(manager.remove_session(first.id()).await.is_none());
        assert!(manager.get_session_by_client_id("alice").await.is_some());

        let removed = manager.remove_session(second.id()).await.unwrap();
        assert!(removed.handle().is_closed());
        assert!(!removed.is_authenticated());
        assert!(manager.get_session_by_client_id("alice").await.is_none());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn last_active_time_moves_forward() {
        let manager = InMemorySessionManager::new();
        let (h1, _rx1) = handle(1);
        let session = manager.create_session("bob", h1).await;
        let before = session.last_active_time();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(manager.update_last_active_time(session.id()).await);
        assert!(session.last_active_time() > before);
        assert!(!manager.update_last_active_time("missing").await);
    }

    #[tokio::test]
    async fn attributes_round_trip() {
        let manager = InMemorySessionManager::new();
        let (h1, _rx1) = handle(1);
        let session = manager.create_session("bob", h1).await;

        session.set_attribute("device", "ios");
        assert_eq!(session.attribute("device").as_deref(), Some("ios"));
        assert_eq!(session.remove_attribute("device").as_deref(), Some("ios"));
        assert_eq!(session.attribute("device"), None);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
