use dashmap::DashMap;
use rand::Rng;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::config::LoadBalancerKind;
use crate::shared_types::ServiceInstance;

// -----------------------------------------------------------------------------
// ----- LoadBalancer ----------------------------------------------------------

/// Picks one instance out of an already-filtered candidate list.
pub trait LoadBalancer: Send + Sync {
    fn select(&self, biz_type: &str, candidates: &[ServiceInstance]) -> Option<ServiceInstance>;
}

pub fn load_balancer_for(kind: LoadBalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobinBalancer::default()),
        LoadBalancerKind::Weighted => Arc::new(WeightedBalancer),
        LoadBalancerKind::Random => Arc::new(RandomBalancer),
    }
}

// -----------------------------------------------------------------------------
// ----- RoundRobinBalancer ----------------------------------------------------

/// One counter per bizType so services do not skew each other.
#[derive(Default)]
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicUsize>,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, biz_type: &str, candidates: &[ServiceInstance]) -> Option<ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }

        let tick = match self.counters.get(biz_type) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(biz_type.to_owned())
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed),
        };

        Some(candidates[tick % candidates.len()].clone())
    }
}

// -----------------------------------------------------------------------------
// ----- WeightedBalancer ------------------------------------------------------

pub struct WeightedBalancer;

impl LoadBalancer for WeightedBalancer {
    fn select(&self, _biz_type: &str, candidates: &[ServiceInstance]) -> Option<ServiceInstance> {
        let last = candidates.last()?;

        let total: f64 = candidates.iter().map(|i| i.weight.max(0.0)).sum();
        if total <= 0.0 || !total.is_finite() {
            return Some(RandomBalancer::pick(candidates)?.clone());
        }

        let mut draw = rand::rng().random_range(0.0..total);
        for instance in candidates {
            let weight = instance.weight.max(0.0);
            if draw < weight {
                return Some(instance.clone());
            }
            draw -= weight;
        }

        // rounding left a sliver past the last bucket
        Some(last.clone())
    }
}

// -----------------------------------------------------------------------------
// ----- RandomBalancer --------------------------------------------------------

pub struct RandomBalancer;

impl RandomBalancer {
    fn pick(candidates: &[ServiceInstance]) -> Option<&ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(rand::rng().random_range(0..candidates.len()))
    }
}

impl LoadBalancer for RandomBalancer {
    fn select(&self, _biz_type: &str, candidates: &[ServiceInstance]) -> Option<ServiceInstance> {
        Self::pick(candidates).cloned()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
