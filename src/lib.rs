pub mod config;
pub mod errors;
pub mod frontend;
pub mod gateway;
pub mod push;
pub mod server;
pub mod session;
pub mod shared_types;
pub mod upstream;
pub mod wire_protocol;

pub use config::Config;
pub use errors::{ErrorCode, ErrorResponse};
pub use frontend::FrontendConnection;
pub use server::{GatewayServer, GatewayState};
