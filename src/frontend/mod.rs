pub mod connection;
pub mod worker_pool;

pub(crate) mod context;
pub(crate) mod handlers;
pub(crate) mod proxy_responses;

pub use connection::{FrontendConnection, FrontendError};
pub use handlers::TOKEN_KEY;
pub use proxy_responses::{REASON_KEY, SESSION_ID_KEY};
pub use worker_pool::WorkerPool;
