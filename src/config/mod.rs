pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod settings;
pub mod types;

pub use config::Config;
pub use settings::{
    AuthSettings, ConfigError, GatewaySettings, PushSettings, RegistrySettings, ServerSettings,
    StaticService, UpstreamSettings, WorkerSettings,
};
pub use types::{LoadBalancerKind, LogLevel};
