use super::error::CodecError;

// -----------------------------------------------------------------------------
// ----- MessageType -----------------------------------------------------------

/// The one-byte `msgType` field of a gateway frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // -- Handshake
    Auth,     // 1
    AuthOk,   // 2
    AuthFail, // 3

    // -- Traffic
    Heartbeat, // 4
    Biz,       // 5

    // -- Server push
    Push,          // 6
    PushOk,        // 7
    PushFail,      // 8
    PushHeartbeat, // 9

    Error, // 10
}

// -----------------------------------------------------------------------------
// ----- MessageType: Static ---------------------------------------------------

impl MessageType {
    pub fn from_byte(code: u8) -> Result<Self, CodecError> {
        let message_type = match code {
            1 => MessageType::Auth,
            2 => MessageType::AuthOk,
            3 => MessageType::AuthFail,
            4 => MessageType::Heartbeat,
            5 => MessageType::Biz,
            6 => MessageType::Push,
            7 => MessageType::PushOk,
            8 => MessageType::PushFail,
            9 => MessageType::PushHeartbeat,
            10 => MessageType::Error,
            other => return Err(CodecError::UnknownMessageType(other)),
        };

        Ok(message_type)
    }
}

// -----------------------------------------------------------------------------
// ----- MessageType: Public ---------------------------------------------------

impl MessageType {
    pub fn as_byte(self) -> u8 {
        match self {
            MessageType::Auth => 1,
            MessageType::AuthOk => 2,
            MessageType::AuthFail => 3,
            MessageType::Heartbeat => 4,
            MessageType::Biz => 5,
            MessageType::Push => 6,
            MessageType::PushOk => 7,
            MessageType::PushFail => 8,
            MessageType::PushHeartbeat => 9,
            MessageType::Error => 10,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
