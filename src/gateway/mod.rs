pub mod health;
pub mod load_balancer;
pub mod registry;
pub mod route_service;

pub use health::HealthMonitor;
pub use load_balancer::{
    LoadBalancer, RandomBalancer, RoundRobinBalancer, WeightedBalancer, load_balancer_for,
};
pub use registry::{InMemoryServiceRegistry, ServiceRegistry};
pub use route_service::{RouteError, RouteService};
