pub mod codec;
pub mod error;
pub mod gateway_message;
pub mod message_type;

pub use codec::{decode, encode, peek_frame};
pub use error::CodecError;
pub use gateway_message::GatewayMessage;
pub use message_type::MessageType;
