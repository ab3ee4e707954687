use dashmap::DashMap;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{connection::UpstreamConnection, error::UpstreamError};
use crate::config::UpstreamSettings;
use crate::shared_types::ServiceInstance;

// -----------------------------------------------------------------------------
// ----- UpstreamPool ----------------------------------------------------------

type ConnectOutcome = Result<Arc<UpstreamConnection>, UpstreamError>;
type InFlight = Arc<OnceCell<ConnectOutcome>>;

/// At most one live [`UpstreamConnection`] per backend instance.
///
/// Concurrent callers asking for an instance with no usable connection share
/// one connect attempt. The in-flight marker is dropped once that attempt
/// settles, so a failed attempt does not poison later calls.
pub struct UpstreamPool {
    settings: UpstreamSettings,
    connections: DashMap<ServiceInstance, Arc<UpstreamConnection>>,
    in_flight: Mutex<HashMap<ServiceInstance, InFlight>>,
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub instance: String,
    pub active: bool,
    pub reconnecting: bool,
    pub pending: usize,
    pub retries: u32,
    pub total_retries: u64,
}

// -----------------------------------------------------------------------------
// ----- UpstreamPool: Static --------------------------------------------------

impl UpstreamPool {
    pub fn new(settings: UpstreamSettings) -> Self {
        Self {
            settings,
            connections: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamPool: Public --------------------------------------------------

impl UpstreamPool {
    pub async fn get_connection(
        &self,
        instance: &ServiceInstance,
    ) -> Result<Arc<UpstreamConnection>, UpstreamError> {
        if let Some(conn) = self.cached(instance) {
            return Ok(conn);
        }

        let cell = self
            .in_flight
            .lock()
            .entry(instance.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell
            .get_or_init(|| async {
                // another flight may have finished between the cache miss and here
                if let Some(conn) = self.cached(instance) {
                    return Ok(conn);
                }

                let outcome =
                    UpstreamConnection::connect(instance.clone(), self.settings.clone()).await;
                match &outcome {
                    Ok(conn) => {
                        self.connections.insert(instance.clone(), conn.clone());
                    }
                    Err(e) => warn!(instance = %instance, "upstream connect failed: {e}"),
                }
                outcome
            })
            .await
            .clone();

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(instance).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(instance);
            }
        }

        outcome
    }

    /// Forget and shut down the connection for `instance`, if any.
    pub async fn remove(&self, instance: &ServiceInstance) {
        if let Some((_, conn)) = self.connections.remove(instance) {
            conn.shutdown().await;
            debug!(instance = %instance, "upstream connection removed from pool");
        }
    }

    /// Open a connection ahead of the first request. Failures are logged only.
    pub fn warm(self: &Arc<Self>, instance: ServiceInstance) {
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.get_connection(&instance).await {
                Ok(_) => info!(instance = %instance, "warmed upstream connection"),
                Err(e) => warn!(instance = %instance, "failed to warm upstream connection: {e}"),
            }
        });
    }

    pub async fn close(&self) {
        let all: Vec<Arc<UpstreamConnection>> =
            self.connections.iter().map(|e| e.value().clone()).collect();
        self.connections.clear();

        for conn in all {
            conn.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .connections
            .iter()
            .map(|e| {
                let conn = e.value();
                PoolStats {
                    instance: conn.instance().to_string(),
                    active: conn.is_active(),
                    reconnecting: conn.is_reconnecting(),
                    pending: conn.pending_count(),
                    retries: conn.retry_count(),
                    total_retries: conn.total_retry_count(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.instance.cmp(&b.instance));
        stats
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamPool: Private -------------------------------------------------

impl UpstreamPool {
    /// Usable cached connection. Live or reconnecting ones are returned as-is;
    /// a connection that gave up is evicted.
    fn cached(&self, instance: &ServiceInstance) -> Option<Arc<UpstreamConnection>> {
        let conn = self.connections.get(instance)?.value().clone();
        if !conn.is_closed() {
            return Some(conn);
        }

        self.connections
            .remove_if(instance, |_, c| Arc::ptr_eq(c, &conn));
        debug!(instance = %instance, "evicted dead upstream connection");
        None
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn settings() -> UpstreamSettings {
        UpstreamSettings {
            connect_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(5),
            max_retry_backoff: Duration::from_millis(10),
            max_retries_per_incident: 2,
            max_retries_total: 10,
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Accepts and holds connections, counting them.
    async fn counting_backend() -> (ServiceInstance, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        (ServiceInstance::new("127.0.0.1", port), accepted)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        let (instance, accepted) = counting_backend().await;
        let pool = Arc::new(UpstreamPool::new(settings()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let instance = instance.clone();
            tasks.push(tokio::spawn(async move {
                pool.get_connection(&instance).await.unwrap()
            }));
        }

        let mut conns = Vec::new();
        for t in tasks {
            conns.push(t.await.unwrap());
        }

        assert!(conns.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_not_cached() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let instance = ServiceInstance::new("127.0.0.1", port);

        let pool = UpstreamPool::new(settings());
        assert!(pool.get_connection(&instance).await.is_err());
        assert!(pool.is_empty());
        assert!(pool.in_flight.lock().is_empty());

        // a later call retries from scratch
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        assert!(pool.get_connection(&instance).await.is_ok());
    }

    #[tokio::test]
    async fn closed_connection_is_evicted() {
        let (instance, accepted) = counting_backend().await;
        let pool = UpstreamPool::new(settings());

        let first = pool.get_connection(&instance).await.unwrap();
        first.shutdown().await;

        let second = pool.get_connection(&instance).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_active());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn snapshot_and_close() {
        let (instance, _) = counting_backend().await;
        let pool = UpstreamPool::new(settings());
        let conn = pool.get_connection(&instance).await.unwrap();

        let stats = pool.snapshot();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].instance, instance.to_string());
        assert!(stats[0].active);

        pool.close().await;
        assert!(pool.is_empty());
        assert!(conn.is_closed());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
