use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

// -----------------------------------------------------------------------------
// ----- ServiceInstance -------------------------------------------------------

/// One backend HTTP endpoint able to serve a bizType.
///
/// Identity is `(host, port, metadata)`: two instances on the same address
/// with different metadata are distinct registry entries. `weight`, `enabled`
/// and the health flag do not take part in equality. The health flag is
/// shared by every clone so the health monitor and the registry agree.
#[derive(Clone)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    pub weight: f64,
    pub enabled: bool,
    pub metadata: BTreeMap<String, String>,
    healthy: Arc<AtomicBool>,
}

// -----------------------------------------------------------------------------
// ----- ServiceInstance: Static -----------------------------------------------

impl ServiceInstance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1.0,
            enabled: true,
            metadata: BTreeMap::new(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ServiceInstance: Builder ----------------------------------------------

impl ServiceInstance {
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ServiceInstance: Public -----------------------------------------------

impl ServiceInstance {
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Eligible for load balancing.
    pub fn is_available(&self) -> bool {
        self.enabled && self.is_healthy()
    }

    /// `host:port`, also used as the HTTP `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// -----------------------------------------------------------------------------
// ----- ServiceInstance: Traits -----------------------------------------------

impl PartialEq for ServiceInstance {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.metadata == other.metadata
    }
}

impl Eq for ServiceInstance {}

impl Hash for ServiceInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.metadata.hash(state);
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("weight", &self.weight)
            .field("enabled", &self.enabled)
            .field("healthy", &self.is_healthy())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_weight_and_health() {
        let a = ServiceInstance::new("10.0.0.1", 8080).with_weight(1.0);
        let b = ServiceInstance::new("10.0.0.1", 8080)
            .with_weight(5.0)
            .with_enabled(false);
        b.set_healthy(false);
        assert_eq!(a, b);
    }

    #[test]
    fn metadata_distinguishes_instances() {
        let a = ServiceInstance::new("10.0.0.1", 8080).with_metadata("zone", "a");
        let b = ServiceInstance::new("10.0.0.1", 8080).with_metadata("zone", "b");
        assert_ne!(a, b);

        let set: HashSet<_> = [a.clone(), b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn clones_share_health() {
        let a = ServiceInstance::new("localhost", 1);
        let b = a.clone();
        b.set_healthy(false);
        assert!(!a.is_healthy());
        assert!(!a.is_available());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
