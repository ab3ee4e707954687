use async_trait::async_trait;
use dashmap::DashMap;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

use crate::shared_types::ServiceInstance;
use crate::upstream::UpstreamPool;

// -----------------------------------------------------------------------------
// ----- ServiceRegistry -------------------------------------------------------

/// bizType -> instances able to serve it.
///
/// Readers get an immutable snapshot of a bizType's list; writers swap in a
/// new list, so a reader never sees a half-applied change.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Returns `false` when the pair was already registered.
    async fn register_service(&self, biz_type: &str, instance: ServiceInstance) -> bool;

    /// Returns `false` when the pair was not registered.
    async fn remove_service(&self, biz_type: &str, instance: &ServiceInstance) -> bool;

    async fn get_services(&self, biz_type: &str) -> Arc<Vec<ServiceInstance>>;

    async fn get_all_services(&self) -> HashMap<String, Arc<Vec<ServiceInstance>>>;

    async fn close(&self);
}

// -----------------------------------------------------------------------------
// ----- InMemoryServiceRegistry -----------------------------------------------

pub struct InMemoryServiceRegistry {
    services: DashMap<String, Arc<Vec<ServiceInstance>>>,
    pool: Arc<UpstreamPool>,
}

// -----------------------------------------------------------------------------
// ----- InMemoryServiceRegistry: Static ---------------------------------------

impl InMemoryServiceRegistry {
    pub fn new(pool: Arc<UpstreamPool>) -> Self {
        Self {
            services: DashMap::new(),
            pool,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- InMemoryServiceRegistry: Private --------------------------------------

impl InMemoryServiceRegistry {
    fn is_referenced(&self, instance: &ServiceInstance) -> bool {
        self.services
            .iter()
            .any(|entry| entry.value().iter().any(|i| i == instance))
    }
}

// -----------------------------------------------------------------------------
// ----- InMemoryServiceRegistry: ServiceRegistry ------------------------------

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn register_service(&self, biz_type: &str, instance: ServiceInstance) -> bool {
        let known_elsewhere = self.is_referenced(&instance);

        {
            let mut entry = self
                .services
                .entry(biz_type.to_owned())
                .or_insert_with(|| Arc::new(Vec::new()));

            if entry.iter().any(|i| *i == instance) {
                debug!(biz_type, instance = %instance, "service already registered");
                return false;
            }

            let mut next = Vec::with_capacity(entry.len() + 1);
            next.extend(entry.iter().cloned());
            next.push(instance.clone());
            *entry = Arc::new(next);
        }

        info!(biz_type, instance = %instance, "registered service instance");
        if !known_elsewhere {
            self.pool.warm(instance);
        }

        true
    }

    async fn remove_service(&self, biz_type: &str, instance: &ServiceInstance) -> bool {
        let removed = {
            let Some(mut entry) = self.services.get_mut(biz_type) else {
                return false;
            };

            let before = entry.len();
            let next: Vec<ServiceInstance> =
                entry.iter().filter(|i| *i != instance).cloned().collect();
            let removed = next.len() != before;
            *entry = Arc::new(next);
            removed
        };

        self.services.remove_if(biz_type, |_, list| list.is_empty());

        if !removed {
            return false;
        }

        info!(biz_type, instance = %instance, "removed service instance");
        if !self.is_referenced(instance) {
            self.pool.remove(instance).await;
        }

        true
    }

    async fn get_services(&self, biz_type: &str) -> Arc<Vec<ServiceInstance>> {
        self.services
            .get(biz_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    async fn get_all_services(&self) -> HashMap<String, Arc<Vec<ServiceInstance>>> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn close(&self) {
        self.services.clear();
        self.pool.close().await;
        info!("service registry closed");
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
