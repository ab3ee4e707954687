//! Gateway frame codec.
//!
//! ```text
//! frameLength:i32 | checksum:i32 | magic:i16 | version:i8 | msgType:i8 |
//! requestId:i64 | clientId:string16 | bizType:string16 | extensions:map16 |
//! body:bytes32
//! ```
//!
//! All integers are big-endian. `checksum` is the CRC32 of every byte from
//! `magic` through the end of `body`. `frameLength` counts those same bytes
//! plus the 4 bytes of `checksum`; it never counts itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{collections::HashMap, str};

use super::error::CodecError;
use super::gateway_message::{GatewayMessage, MAGIC, VERSION};
use super::message_type::MessageType;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Width of the `frameLength` field.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Width of the `checksum` field.
pub const CHECKSUM_FIELD_LEN: usize = 4;

/// magic + version + msgType + requestId + the four empty length prefixes.
const MIN_CONTENT_LEN: usize = 2 + 1 + 1 + 8 + 2 + 2 + 2 + 4;

/// Smallest legal value of the `frameLength` field.
pub const MIN_FRAME_LENGTH: usize = MIN_CONTENT_LEN + CHECKSUM_FIELD_LEN;

/// Smallest complete frame, length field included.
pub const MIN_FRAME_LEN: usize = LENGTH_FIELD_LEN + MIN_FRAME_LENGTH;

const CONTENT_OFFSET: usize = LENGTH_FIELD_LEN + CHECKSUM_FIELD_LEN;

const ENCODE_CAPACITY_HINT: usize = 256;

// -----------------------------------------------------------------------------
// ----- Framing ---------------------------------------------------------------

/// Cheap look at the front of a stream buffer.
///
/// Returns `Ok(Some(total_len))` once a whole frame (length field included)
/// is buffered, `Ok(None)` while more bytes are needed, and an error as soon
/// as the declared length is impossible, so a bad peer cannot make us buffer
/// an arbitrary amount.
pub fn peek_frame(buf: &[u8], max_frame_size: usize) -> Result<Option<usize>, CodecError> {
    if buf.len() < LENGTH_FIELD_LEN {
        return Ok(None);
    }

    let frame_length = read_frame_length(buf)?;
    let total_len = LENGTH_FIELD_LEN + frame_length;

    if total_len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: total_len,
            limit: max_frame_size,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    Ok(Some(total_len))
}

// -----------------------------------------------------------------------------
// ----- Encode ----------------------------------------------------------------

/// Serialize a message into a complete frame.
///
/// Length and checksum depend on the content, so both are written as zero
/// placeholders first and backpatched once the content is in place.
pub fn encode(message: &GatewayMessage) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(ENCODE_CAPACITY_HINT + message.body.len());

    buf.put_i32(0); // frameLength placeholder
    buf.put_u32(0); // checksum placeholder

    buf.put_u16(MAGIC);
    buf.put_u8(message.version);
    buf.put_u8(message.message_type.as_byte());
    buf.put_i64(message.request_id);
    put_string16(&mut buf, "clientId", &message.client_id)?;
    put_string16(&mut buf, "bizType", &message.biz_type)?;
    put_map16(&mut buf, &message.extensions)?;
    put_bytes32(&mut buf, "body", &message.body)?;

    let frame_length = buf.len() - LENGTH_FIELD_LEN;
    let frame_length = i32::try_from(frame_length).map_err(|_| CodecError::FieldTooLong {
        field: "frame",
        len: frame_length,
    })?;
    let checksum = crc32fast::hash(&buf[CONTENT_OFFSET..]);

    buf[0..4].copy_from_slice(&frame_length.to_be_bytes());
    buf[4..8].copy_from_slice(&checksum.to_be_bytes());

    Ok(buf.freeze())
}

// -----------------------------------------------------------------------------
// ----- Decode ----------------------------------------------------------------

/// Parse one complete frame. Pure: nothing is retained between calls.
///
/// Checks run in a fixed order: header present, declared length plausible
/// and fully buffered, magic, checksum, then the content itself.
pub fn decode(frame: &[u8]) -> Result<GatewayMessage, CodecError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(CodecError::InsufficientHeader {
            needed: MIN_FRAME_LEN,
            available: frame.len(),
        });
    }

    let frame_length = read_frame_length(frame)?;
    let available = frame.len() - LENGTH_FIELD_LEN;
    if available < frame_length {
        return Err(CodecError::InsufficientBody {
            declared: frame_length,
            available,
        });
    }

    let end = LENGTH_FIELD_LEN + frame_length;
    let content = &frame[CONTENT_OFFSET..end];

    let magic = u16::from_be_bytes([content[0], content[1]]);
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let declared = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let computed = crc32fast::hash(content);
    if declared != computed {
        return Err(CodecError::ChecksumMismatch { declared, computed });
    }

    let mut reader = FrameReader::new(&content[2..]);

    let version = reader.read_u8("version")?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let message_type = MessageType::from_byte(reader.read_u8("msgType")?)?;
    let request_id = reader.read_i64("requestId")?;
    let client_id = reader.read_string16("clientId")?;
    let biz_type = reader.read_string16("bizType")?;
    let extensions = reader.read_map16()?;
    let body = reader.read_bytes32("body")?;

    if !reader.is_empty() {
        return Err(CodecError::malformed("frame", "trailing bytes after body"));
    }

    Ok(GatewayMessage {
        version,
        message_type,
        request_id,
        client_id,
        biz_type,
        extensions,
        body,
    })
}

// -----------------------------------------------------------------------------
// ----- Internal: FrameReader -------------------------------------------------

struct FrameReader<'a> {
    input: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn ensure(&self, field: &'static str, n: usize) -> Result<(), CodecError> {
        if self.input.remaining() < n {
            return Err(CodecError::malformed(field, "truncated"));
        }
        Ok(())
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        self.ensure(field, 1)?;
        Ok(self.input.get_u8())
    }

    fn read_i16(&mut self, field: &'static str) -> Result<i16, CodecError> {
        self.ensure(field, 2)?;
        Ok(self.input.get_i16())
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        self.ensure(field, 4)?;
        Ok(self.input.get_i32())
    }

    fn read_i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        self.ensure(field, 8)?;
        Ok(self.input.get_i64())
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(field, n)?;
        let (head, tail) = self.input.split_at(n);
        self.input = tail;
        Ok(head)
    }

    fn read_string16(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.read_i16(field)?;
        if len < 0 {
            return Err(CodecError::malformed(field, "negative length"));
        }

        let raw = self.take(field, len as usize)?;
        let text = str::from_utf8(raw).map_err(|source| CodecError::InvalidUtf8 { field, source })?;
        Ok(text.to_owned())
    }

    fn read_bytes32(&mut self, field: &'static str) -> Result<Bytes, CodecError> {
        let len = self.read_i32(field)?;
        if len < 0 {
            return Err(CodecError::malformed(field, "negative length"));
        }

        let raw = self.take(field, len as usize)?;
        Ok(Bytes::copy_from_slice(raw))
    }

    fn read_map16(&mut self) -> Result<HashMap<String, String>, CodecError> {
        let section_len = self.read_i16("extensions")?;
        if section_len == 0 {
            return Ok(HashMap::new());
        }
        if section_len < 2 {
            return Err(CodecError::malformed("extensions", "bad section length"));
        }

        let section = self.take("extensions", section_len as usize)?;
        let mut entries = FrameReader::new(section);

        let count = entries.read_i16("extensions")?;
        if count < 0 {
            return Err(CodecError::malformed("extensions", "negative entry count"));
        }

        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = entries.read_string16("extension key")?;
            let value = entries.read_string16("extension value")?;
            map.insert(key, value);
        }

        if !entries.is_empty() {
            return Err(CodecError::malformed(
                "extensions",
                "section length does not match entries",
            ));
        }

        Ok(map)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn read_frame_length(buf: &[u8]) -> Result<usize, CodecError> {
    let raw = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if raw < MIN_FRAME_LENGTH as i32 {
        return Err(CodecError::BadFrameLength(raw as i64));
    }
    Ok(raw as usize)
}

fn put_string16(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), CodecError> {
    let len = i16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_i16(len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_bytes32(buf: &mut BytesMut, field: &'static str, value: &[u8]) -> Result<(), CodecError> {
    let len = i32::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_i32(len);
    buf.extend_from_slice(value);
    Ok(())
}

fn put_map16(buf: &mut BytesMut, map: &HashMap<String, String>) -> Result<(), CodecError> {
    if map.is_empty() {
        buf.put_i16(0);
        return Ok(());
    }

    let count = i16::try_from(map.len()).map_err(|_| CodecError::FieldTooLong {
        field: "extensions",
        len: map.len(),
    })?;

    let section_start = buf.len();
    buf.put_i16(0); // section length placeholder
    buf.put_i16(count);
    for (key, value) in map {
        put_string16(buf, "extension key", key)?;
        put_string16(buf, "extension value", value)?;
    }

    let section_len = buf.len() - section_start - 2;
    let section_len = i16::try_from(section_len).map_err(|_| CodecError::FieldTooLong {
        field: "extensions",
        len: section_len,
    })?;
    buf[section_start..section_start + 2].copy_from_slice(&section_len.to_be_bytes());

    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
