//! Response tokens and line framing shared by the listeners and the client.

use std::fmt;
use std::str::FromStr;

use tokio_util::codec::{AnyDelimiterCodec, LinesCodec};

use crate::broker::message::Message;
use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ok,
    Retry,
    Fail,
    Empty,
}

impl Response {
    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Ok => "OK",
            Response::Retry => "RETRY",
            Response::Fail => "FAIL",
            Response::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Response {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "OK" => Ok(Response::Ok),
            "RETRY" => Ok(Response::Retry),
            "FAIL" => Ok(Response::Fail),
            "EMPTY" => Ok(Response::Empty),
            other => Err(BrokerError::UnexpectedResponse {
                got: other.to_string(),
            }),
        }
    }
}

/// Longest hex line a message of `max_msg_size` raw bytes can produce.
pub fn max_frame_len(max_msg_size: usize) -> usize {
    max_msg_size * 2
}

/// Text line codec for the client side, where every line comes from a
/// broker.
pub fn line_codec(max_msg_size: usize) -> LinesCodec {
    LinesCodec::new_with_max_length(max_frame_len(max_msg_size))
}

/// Byte-level line codec for the listeners. Peers may send arbitrary
/// bytes, so lines are handed over undecoded and validated by the caller.
pub fn frame_codec(max_line_len: usize) -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_line_len)
}

/// Turn one received hex line into a message.
///
/// `MessageTooLarge` when the decoded bytes exceed `max_msg_size`,
/// `MalformedMessage` for anything else that does not decode, including
/// bytes that are not hex digits at all.
pub fn decode_frame(line: impl AsRef<[u8]>, max_msg_size: usize) -> Result<Message> {
    let raw = hex::decode(line.as_ref().trim_ascii())
        .map_err(|e| BrokerError::malformed(format!("invalid hex framing: {e}")))?;
    if raw.len() > max_msg_size {
        return Err(BrokerError::MessageTooLarge {
            size: raw.len(),
            max: max_msg_size,
        });
    }
    Message::from_raw(raw)
}
