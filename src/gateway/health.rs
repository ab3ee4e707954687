use dashmap::DashMap;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{net::TcpStream, task::JoinHandle, time};
use tracing::{debug, warn};

use super::registry::ServiceRegistry;
use crate::config::RegistrySettings;
use crate::shared_types::ServiceInstance;

// -----------------------------------------------------------------------------
// ----- HealthMonitor ---------------------------------------------------------

/// Periodic TCP probe of every registered instance.
///
/// `unhealthy_threshold` consecutive failures mark an instance unhealthy; the
/// sweep that follows each round deregisters unhealthy instances.
pub struct HealthMonitor {
    registry: Arc<dyn ServiceRegistry>,
    interval: Duration,
    probe_timeout: Duration,
    threshold: u32,
    failures: DashMap<ServiceInstance, u32>,
}

// -----------------------------------------------------------------------------
// ----- HealthMonitor: Static -------------------------------------------------

impl HealthMonitor {
    pub fn new(registry: Arc<dyn ServiceRegistry>, settings: &RegistrySettings) -> Self {
        Self {
            registry,
            interval: settings.health_check_interval,
            probe_timeout: settings.health_check_timeout,
            threshold: settings.unhealthy_threshold.max(1),
            failures: DashMap::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- HealthMonitor: Public -------------------------------------------------

impl HealthMonitor {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.check_once().await;
                self.sweep().await;
            }
        })
    }

    /// Probe every distinct instance once and update its health flag.
    pub async fn check_once(&self) {
        let all = self.registry.get_all_services().await;
        let registered: Vec<ServiceInstance> =
            all.values().flat_map(|list| list.iter().cloned()).collect();

        let mut probed: HashMap<ServiceInstance, bool> = HashMap::new();
        for instance in &registered {
            if !probed.contains_key(instance) {
                let ok = self.probe(instance).await;
                probed.insert(instance.clone(), ok);
            }
        }

        for (instance, ok) in &probed {
            let healthy = if *ok {
                self.failures.remove(instance);
                true
            } else {
                let mut count = self.failures.entry(instance.clone()).or_insert(0);
                *count += 1;
                *count < self.threshold
            };

            // equal instances registered separately carry separate flags
            for copy in registered.iter().filter(|r| *r == instance) {
                if copy.is_healthy() != healthy {
                    if healthy {
                        debug!(instance = %copy, "instance healthy again");
                    } else {
                        warn!(instance = %copy, "instance marked unhealthy");
                    }
                    copy.set_healthy(healthy);
                }
            }
        }
    }

    /// Deregister every instance currently flagged unhealthy.
    pub async fn sweep(&self) {
        let all = self.registry.get_all_services().await;

        for (biz_type, list) in all {
            for instance in list.iter().filter(|i| !i.is_healthy()) {
                if self.registry.remove_service(&biz_type, instance).await {
                    warn!(biz_type = %biz_type, instance = %instance, "swept unhealthy instance");
                }
                self.failures.remove(instance);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- HealthMonitor: Private ------------------------------------------------

impl HealthMonitor {
    async fn probe(&self, instance: &ServiceInstance) -> bool {
        matches!(
            time::timeout(self.probe_timeout, TcpStream::connect(instance.authority())).await,
            Ok(Ok(_))
        )
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
