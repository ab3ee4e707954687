pub mod auth_stage;
pub mod service_instance;

pub use auth_stage::AuthStage;
pub use service_instance::ServiceInstance;
