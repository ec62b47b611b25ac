//! Message definitions and the binary codec.
//!
//! `Message` is the canonical internal representation used by the broker.
//! Its `raw` bytes are produced once, at construction, and never change.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! [type:u16][src_len:u16][src][dst_len:u16][dst][body_len:u16][body][crc:u32]
//! body  := { [key_len:u16][key][tag:u8][val_len:u16][val] }*
//! tag   := 'i' (i64) | 'f' (f64) | 's' (UTF-8 text)
//! crc   := CRC32C of everything before it
//! ```
//!
//! Payload entries are written in ascending key order, which makes the
//! encoding canonical: decoding rejects bodies whose keys are not strictly
//! increasing, so a buffer that decodes always re-encodes to itself.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::utils::{BrokerError, Result};

/// Semantic kind of a message, e.g. `6000` for a locomotive status report.
pub type MessageType = u16;

/// Application-defined key/value body of a message.
///
/// Keys are kept sorted, not in the order the sender inserted them; the
/// encoding relies on that to be canonical. A payload built as
/// `sent, loco, speed` is read back as `loco, sent, speed`.
pub type Payload = BTreeMap<String, Value>;

/// Four u16 fields plus the trailing checksum.
pub const MIN_ENCODED_LEN: usize = 12;

const CHECKSUM_LEN: usize = 4;
const NUMERIC_LEN: usize = 8;

const TAG_INT: u8 = b'i';
const TAG_FLOAT: u8 = b'f';
const TAG_TEXT: u8 = b's';

/// A scalar payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// An immutable, already-encoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    msg_type: MessageType,
    source: String,
    dest: String,
    payload: Payload,
    raw: Bytes,
}

impl Message {
    /// Build a message and encode it.
    ///
    /// Fails with `MalformedMessage` when an address is empty or a field is
    /// too long to be length-prefixed.
    pub fn new(
        msg_type: MessageType,
        source: impl Into<String>,
        dest: impl Into<String>,
        payload: Payload,
    ) -> Result<Self> {
        let source = source.into();
        let dest = dest.into();
        let raw = encode(msg_type, &source, &dest, &payload)?;
        Ok(Self {
            msg_type,
            source,
            dest,
            payload,
            raw,
        })
    }

    /// Decode a message from its raw bytes.
    pub fn from_raw(raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        let (msg_type, source, dest, payload) = decode(&raw)?;
        Ok(Self {
            msg_type,
            source,
            dest,
            payload,
            raw,
        })
    }

    /// Decode a message from its hex transport framing.
    pub fn from_hex(text: &str) -> Result<Self> {
        let raw = hex::decode(text.trim())
            .map_err(|e| BrokerError::malformed(format!("invalid hex framing: {e}")))?;
        Self::from_raw(raw)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.raw)
    }

    /// `MessageTooLarge` if the encoded form is longer than `max` bytes.
    pub fn check_size(&self, max: usize) -> Result<()> {
        if self.raw.len() > max {
            return Err(BrokerError::MessageTooLarge {
                size: self.raw.len(),
                max,
            });
        }
        Ok(())
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type {} from {} to {} ({} bytes)",
            self.msg_type,
            self.source,
            self.dest,
            self.raw.len()
        )
    }
}

/// Encode the four message fields into their canonical byte form.
pub fn encode(
    msg_type: MessageType,
    source: &str,
    dest: &str,
    payload: &Payload,
) -> Result<Bytes> {
    if source.is_empty() {
        return Err(BrokerError::malformed("source address is empty"));
    }
    if dest.is_empty() {
        return Err(BrokerError::malformed("destination address is empty"));
    }

    let mut body = BytesMut::new();
    for (key, value) in payload {
        put_str(&mut body, key, "payload key")?;
        match value {
            Value::Int(v) => {
                body.put_u8(TAG_INT);
                body.put_u16(NUMERIC_LEN as u16);
                body.put_i64(*v);
            }
            Value::Float(v) => {
                body.put_u8(TAG_FLOAT);
                body.put_u16(NUMERIC_LEN as u16);
                body.put_f64(*v);
            }
            Value::Text(v) => {
                body.put_u8(TAG_TEXT);
                put_str(&mut body, v, "payload value")?;
            }
        }
    }

    let mut buf = BytesMut::with_capacity(
        MIN_ENCODED_LEN + source.len() + dest.len() + body.len(),
    );
    buf.put_u16(msg_type);
    put_str(&mut buf, source, "source address")?;
    put_str(&mut buf, dest, "destination address")?;
    put_len(&mut buf, body.len(), "payload")?;
    buf.put_slice(&body);

    let checksum = crc32c::crc32c(&buf);
    buf.put_u32(checksum);

    Ok(buf.freeze())
}

/// Inverse of [`encode`].
pub fn decode(raw: &[u8]) -> Result<(MessageType, String, String, Payload)> {
    if raw.len() < MIN_ENCODED_LEN {
        return Err(BrokerError::malformed(format!(
            "need at least {MIN_ENCODED_LEN} bytes, have {}",
            raw.len()
        )));
    }

    let (mut frame, mut trailer) = raw.split_at(raw.len() - CHECKSUM_LEN);
    let expected = trailer.get_u32();
    let actual = crc32c::crc32c(frame);
    if expected != actual {
        return Err(BrokerError::malformed(format!(
            "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }

    let msg_type = take_u16(&mut frame, "type")?;
    let source = take_str(&mut frame, "source address")?;
    let dest = take_str(&mut frame, "destination address")?;
    let body_len = take_u16(&mut frame, "payload length")? as usize;
    let mut body = take_bytes(&mut frame, body_len, "payload")?;
    if frame.has_remaining() {
        return Err(BrokerError::malformed(format!(
            "{} trailing bytes after payload",
            frame.remaining()
        )));
    }
    if source.is_empty() {
        return Err(BrokerError::malformed("source address is empty"));
    }
    if dest.is_empty() {
        return Err(BrokerError::malformed("destination address is empty"));
    }

    let mut payload = Payload::new();
    while body.has_remaining() {
        let key = take_str(&mut body, "payload key")?;
        let tag = take_u8(&mut body, "value tag")?;
        let len = take_u16(&mut body, "value length")? as usize;
        let mut val = take_bytes(&mut body, len, "payload value")?;

        let value = match tag {
            TAG_INT | TAG_FLOAT if len != NUMERIC_LEN => {
                return Err(BrokerError::malformed(format!(
                    "numeric value for {key:?} is {len} bytes, expected {NUMERIC_LEN}"
                )));
            }
            TAG_INT => Value::Int(val.get_i64()),
            TAG_FLOAT => Value::Float(val.get_f64()),
            TAG_TEXT => Value::Text(utf8(val, "payload value")?),
            other => {
                return Err(BrokerError::malformed(format!(
                    "unknown value tag {other:#04x} for {key:?}"
                )));
            }
        };

        if let Some((last, _)) = payload.last_key_value() {
            if *last >= key {
                return Err(BrokerError::malformed(format!(
                    "payload key {key:?} is duplicated or out of order"
                )));
            }
        }
        payload.insert(key, value);
    }

    Ok((msg_type, source, dest, payload))
}

fn put_len(buf: &mut BytesMut, len: usize, what: &str) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| {
        BrokerError::malformed(format!(
            "{what} is {len} bytes, longer than {} allowed",
            u16::MAX
        ))
    })?;
    buf.put_u16(len);
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str, what: &str) -> Result<()> {
    put_len(buf, s.len(), what)?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn take_u8(cur: &mut &[u8], what: &str) -> Result<u8> {
    if cur.remaining() < 1 {
        return Err(truncated(what, 1, cur.remaining()));
    }
    Ok(cur.get_u8())
}

fn take_u16(cur: &mut &[u8], what: &str) -> Result<u16> {
    if cur.remaining() < 2 {
        return Err(truncated(what, 2, cur.remaining()));
    }
    Ok(cur.get_u16())
}

fn take_bytes<'a>(cur: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if cur.len() < len {
        return Err(truncated(what, len, cur.len()));
    }
    let (head, tail) = cur.split_at(len);
    *cur = tail;
    Ok(head)
}

fn take_str(cur: &mut &[u8], what: &str) -> Result<String> {
    let len = take_u16(cur, what)? as usize;
    let bytes = take_bytes(cur, len, what)?;
    utf8(bytes, what)
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BrokerError::malformed(format!("{what} is not valid UTF-8: {e}")))
}

fn truncated(what: &str, needed: usize, have: usize) -> BrokerError {
    BrokerError::malformed(format!(
        "{what} declares {needed} bytes but only {have} remain"
    ))
}
