/// Authentication state of one downstream connection.
///
/// A connection starts in `AwaitingAuth`, where only AUTH frames are legal.
/// A successful AUTH moves it to `Authenticated` for the rest of its life;
/// any teardown (peer close, idle timeout, protocol violation, session
/// eviction) moves it to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Waiting for a valid AUTH frame. A failed AUTH stays here so the client may retry.
    AwaitingAuth,

    /// A session exists for this connection; traffic is no longer auth-checked.
    Authenticated,

    /// Terminal. The session, if any, has been destroyed.
    Closed,
}
