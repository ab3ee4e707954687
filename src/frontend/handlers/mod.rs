mod authenticating;
mod ready;

pub use authenticating::TOKEN_KEY;
pub(crate) use authenticating::handle_awaiting_auth;
pub(crate) use ready::handle_authenticated;

/// What the read loop does after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}
