pub mod connection;
pub mod error;
pub mod http_codec;
pub mod pool;
pub mod translator;

pub use connection::UpstreamConnection;
pub use error::UpstreamError;
pub use pool::{PoolStats, UpstreamPool};
pub use translator::ProtocolTranslator;
