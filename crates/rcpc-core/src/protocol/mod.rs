//! Protocol module containing the envelope vocabulary and the line codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_envelope, encode_envelope, encode_line, ProtocolError};
pub use messages::*;
