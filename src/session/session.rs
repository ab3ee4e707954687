use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::handle::ConnectionHandle;

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

/// Server-side record of an authenticated downstream connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    client_id: String,
    handle: ConnectionHandle,
    create_time: DateTime<Utc>,
    last_active_time: RwLock<DateTime<Utc>>,
    authenticated: AtomicBool,
    attributes: DashMap<String, String>,
}

// -----------------------------------------------------------------------------
// ----- Session: Static -------------------------------------------------------

impl Session {
    /// Sessions only exist after a successful AUTH, so they start authenticated.
    pub fn new(client_id: impl Into<String>, handle: ConnectionHandle) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            handle,
            create_time: now,
            last_active_time: RwLock::new(now),
            authenticated: AtomicBool::new(true),
            attributes: DashMap::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Public -------------------------------------------------------

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn last_active_time(&self) -> DateTime<Utc> {
        *self.last_active_time.read()
    }

    pub fn touch(&self) {
        *self.last_active_time.write() = Utc::now();
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.attributes.remove(key).map(|(_, v)| v)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
