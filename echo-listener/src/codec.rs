//! Message encoding for the listener's wire contract.
//!
//! Every message is the standard-alphabet, padded base64 encoding of a UTF-8
//! string.  There is no length prefix and no delimiter: one socket read is
//! one message.  That holds for short messages sent one at a time and breaks
//! for anything that spans reads or arrives coalesced with the next message;
//! such input fails to decode and the connection is dropped.
//!
//! An acknowledgment is the encoding of [`ACK_PREFIX`] followed by the decoded
//! message.
//!
//! No I/O happens here.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Text prepended to every echoed message.
pub const ACK_PREFIX: &str = "Ack: ";

/// Errors that can arise when decoding a frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded message is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("acknowledgment does not start with \"Ack: \"")]
    MissingAckPrefix,
}

/// Encode `message` as it is sent on the wire.
pub fn encode_message(message: &str) -> Vec<u8> {
    STANDARD.encode(message).into_bytes()
}

/// Decode one inbound frame.
///
/// ASCII whitespace is discarded first so that line-oriented clients
/// (`echo aGk= | nc host 8080`) work.
pub fn decode_message(frame: &[u8]) -> Result<String, CodecError> {
    let compact: Vec<u8> = frame
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = STANDARD.decode(compact)?;
    Ok(String::from_utf8(raw)?)
}

/// Build the acknowledgment frame for a decoded `message`.
pub fn encode_ack(message: &str) -> Vec<u8> {
    encode_message(&format!("{ACK_PREFIX}{message}"))
}

/// Decode an acknowledgment frame and return the echoed message.
pub fn decode_ack(frame: &[u8]) -> Result<String, CodecError> {
    let text = decode_message(frame)?;
    text.strip_prefix(ACK_PREFIX)
        .map(str::to_owned)
        .ok_or(CodecError::MissingAckPrefix)
}
