use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::warn;

use super::error::UpstreamError;
use super::http_codec::{self, HttpResponse};
use crate::shared_types::ServiceInstance;
use crate::wire_protocol::{GatewayMessage, MessageType};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const CLIENT_ID_HEADER: &str = "X-Client-Id";
pub const HTTP_STATUS_KEY: &str = "http_status";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Headers the translator owns; extensions may not override them.
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "x-request-id",
    "x-client-id",
];

// -----------------------------------------------------------------------------
// ----- ProtocolTranslator ----------------------------------------------------

/// GatewayMessage <-> HTTP/1.1 on the upstream leg.
///
/// No request id travels in a way the backend must echo: responses are paired
/// with requests purely by order on one non-multiplexed connection.
pub struct ProtocolTranslator;

// -----------------------------------------------------------------------------
// ----- ProtocolTranslator: Outbound ------------------------------------------

impl ProtocolTranslator {
    /// `POST /<bizType with '.' as '/'>`, body passed through untouched.
    pub fn to_http_request(
        message: &GatewayMessage,
        instance: &ServiceInstance,
    ) -> Result<Bytes, UpstreamError> {
        let path = Self::path_for(&message.biz_type)?;
        let authority = instance.authority();
        let request_id = message.request_id.to_string();

        if !http_codec::is_header_value(&message.client_id) {
            return Err(UpstreamError::Translate(format!(
                "clientId {:?} is not a valid header value",
                message.client_id
            )));
        }

        let content_type = message
            .extensions
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .filter(|v| http_codec::is_header_value(v))
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let mut headers: Vec<(&str, &str)> = vec![
            ("Host", authority.as_str()),
            ("Content-Type", content_type),
            ("Connection", "keep-alive"),
            (REQUEST_ID_HEADER, request_id.as_str()),
            (CLIENT_ID_HEADER, message.client_id.as_str()),
        ];

        for (key, value) in &message.extensions {
            if key.eq_ignore_ascii_case("content-type") {
                continue;
            }
            if RESERVED_HEADERS.iter().any(|r| key.eq_ignore_ascii_case(r)) {
                warn!(request_id = message.request_id, header = %key, "dropping reserved extension header");
                continue;
            }
            if !http_codec::is_header_name(key) || !http_codec::is_header_value(value) {
                warn!(request_id = message.request_id, header = %key, "dropping extension that is not a valid header");
                continue;
            }
            headers.push((key.as_str(), value.as_str()));
        }

        let mut buf = BytesMut::new();
        http_codec::write_request(&mut buf, "POST", &path, headers, &message.body);

        Ok(buf.freeze())
    }

    fn path_for(biz_type: &str) -> Result<String, UpstreamError> {
        let representable = biz_type
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'?' | b'#' | b'%'));
        if biz_type.is_empty() || !representable {
            return Err(UpstreamError::Translate(format!(
                "bizType {biz_type:?} cannot be used as a request path"
            )));
        }

        Ok(format!("/{}", biz_type.replace('.', "/")))
    }
}

// -----------------------------------------------------------------------------
// ----- ProtocolTranslator: Inbound -------------------------------------------

impl ProtocolTranslator {
    /// Rebuild a BIZ reply from the oldest outstanding request and its response.
    pub fn from_http_response(template: &GatewayMessage, response: HttpResponse) -> GatewayMessage {
        let mut extensions = HashMap::with_capacity(response.headers.len() + 1);
        for (name, value) in response.headers {
            extensions
                .entry(name)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.clone());
        }
        extensions.insert(HTTP_STATUS_KEY.to_owned(), response.status.to_string());

        GatewayMessage {
            version: template.version,
            message_type: MessageType::Biz,
            request_id: template.request_id,
            client_id: template.client_id.clone(),
            biz_type: template.biz_type.clone(),
            extensions,
            body: response.body,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::http_codec::decode_response;

    fn request() -> GatewayMessage {
        GatewayMessage::new(MessageType::Biz, 42)
            .with_client_id("client-1")
            .with_biz_type("user.profile.get")
            .with_extension("X-Trace", "t-1")
            .with_body(&b"{}"[..])
    }

    fn as_text(bytes: &Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn builds_post_with_path_and_custom_headers() {
        let instance = ServiceInstance::new("10.1.1.1", 9000);
        let raw = as_text(&ProtocolTranslator::to_http_request(&request(), &instance).unwrap());

        assert!(raw.starts_with("POST /user/profile/get HTTP/1.1\r\n"));
        assert!(raw.contains("\r\nHost: 10.1.1.1:9000\r\n"));
        assert!(raw.contains("\r\nContent-Type: application/octet-stream\r\n"));
        assert!(raw.contains("\r\nX-Request-Id: 42\r\n"));
        assert!(raw.contains("\r\nX-Client-Id: client-1\r\n"));
        assert!(raw.contains("\r\nX-Trace: t-1\r\n"));
        assert!(raw.contains("\r\nContent-Length: 2\r\n"));
        assert!(raw.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn empty_body_is_allowed() {
        let instance = ServiceInstance::new("h", 1);
        let message = GatewayMessage::new(MessageType::Biz, 1).with_biz_type("ping");
        let raw = as_text(&ProtocolTranslator::to_http_request(&message, &instance).unwrap());
        assert!(raw.starts_with("POST /ping HTTP/1.1\r\n"));
        assert!(raw.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn unsafe_extensions_are_dropped() {
        let instance = ServiceInstance::new("h", 1);
        let message = request()
            .with_extension("Content-Length", "999")
            .with_extension("bad header", "x")
            .with_extension("X-Evil", "a\r\nInjected: yes")
            .with_extension("content-type", "application/json");
        let raw = as_text(&ProtocolTranslator::to_http_request(&message, &instance).unwrap());

        assert!(!raw.contains("999"));
        assert!(!raw.contains("Injected"));
        assert!(!raw.contains("bad header"));
        assert!(raw.contains("\r\nContent-Type: application/json\r\n"));
    }

    #[test]
    fn biz_type_must_be_a_usable_path() {
        let instance = ServiceInstance::new("h", 1);
        for biz_type in ["", "a b", "a?b", "a\r\nb"] {
            let message = GatewayMessage::new(MessageType::Biz, 1).with_biz_type(biz_type);
            assert!(matches!(
                ProtocolTranslator::to_http_request(&message, &instance).unwrap_err(),
                UpstreamError::Translate(_)
            ));
        }
    }

    #[test]
    fn response_uses_template_fields_and_headers() {
        let mut raw = BytesMut::from(
            &b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\nX-A: 1\r\nX-A: 2\r\n\r\nnope"[..],
        );
        let response = decode_response(&mut raw).unwrap().unwrap();

        let reply = ProtocolTranslator::from_http_response(&request(), response);
        assert_eq!(reply.message_type, MessageType::Biz);
        assert_eq!(reply.request_id, 42);
        assert_eq!(reply.client_id, "client-1");
        assert_eq!(reply.biz_type, "user.profile.get");
        assert_eq!(&reply.body[..], b"nope");
        assert_eq!(reply.extension(HTTP_STATUS_KEY), Some("404"));
        assert_eq!(reply.extension("x-a"), Some("1, 2"));
        assert_eq!(reply.extension("content-length"), Some("4"));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
