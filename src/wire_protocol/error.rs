//! Errors produced while framing or parsing gateway frames.
//!
//! Every variant is fatal to the frame it was raised on. The connection
//! handler treats all of them as a protocol violation.

use std::str;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- CodecError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("insufficient header: need {needed} bytes, have {available}")]
    InsufficientHeader { needed: usize, available: usize },

    #[error("insufficient body: frame declares {declared} bytes, have {available}")]
    InsufficientBody { declared: usize, available: usize },

    #[error("bad frame length: {0}")]
    BadFrameLength(i64),

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("bad magic: {0:#06X}")]
    BadMagic(u16),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: frame says {declared:#010X}, computed {computed:#010X}")]
    ChecksumMismatch { declared: u32, computed: u32 },

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("malformed {field}: {reason}")]
    Malformed {
        field: &'static str,
        reason: &'static str,
    },

    #[error("invalid utf-8 in {field}: {source}")]
    InvalidUtf8 {
        field: &'static str,
        source: str::Utf8Error,
    },

    #[error("{field} too long to encode: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },
}

impl CodecError {
    pub(crate) fn malformed(field: &'static str, reason: &'static str) -> Self {
        CodecError::Malformed { field, reason }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
