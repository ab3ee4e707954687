use bytes::Bytes;
use std::collections::HashMap;

use super::message_type::MessageType;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const MAGIC: u16 = 0xCAFE;
pub const VERSION: u8 = 1;

// -----------------------------------------------------------------------------
// ----- GatewayMessage --------------------------------------------------------

/// One decoded gateway frame.
///
/// Empty `client_id`, `biz_type`, `extensions` and `body` are the wire's
/// "absent" values; they encode as zero-length fields and decode back empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMessage {
    pub version: u8,
    pub message_type: MessageType,
    pub request_id: i64,
    pub client_id: String,
    pub biz_type: String,
    pub extensions: HashMap<String, String>,
    pub body: Bytes,
}

// -----------------------------------------------------------------------------
// ----- GatewayMessage: Static ------------------------------------------------

impl GatewayMessage {
    pub fn new(message_type: MessageType, request_id: i64) -> Self {
        Self {
            version: VERSION,
            message_type,
            request_id,
            client_id: String::new(),
            biz_type: String::new(),
            extensions: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Reply skeleton that carries over the request's correlation fields.
    pub fn reply_to(request: &GatewayMessage, message_type: MessageType) -> Self {
        Self {
            version: request.version,
            message_type,
            request_id: request.request_id,
            client_id: request.client_id.clone(),
            biz_type: request.biz_type.clone(),
            extensions: HashMap::new(),
            body: Bytes::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayMessage: Builder -----------------------------------------------

impl GatewayMessage {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_biz_type(mut self, biz_type: impl Into<String>) -> Self {
        self.biz_type = biz_type.into();
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayMessage: Public ------------------------------------------------

impl GatewayMessage {
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
