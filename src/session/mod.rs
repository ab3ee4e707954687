pub mod handle;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod session;

pub use handle::{ConnectionHandle, HandleError};
pub use manager::{InMemorySessionManager, SessionManager};
pub use session::Session;
