//! Flood-mesh envelope
//!
//! Envelopes travel as a JSON object:
//! ```text
//! {"from": "...", "to": "...", "payload": "...", "ttl": 10, "seq": 42, "timestamp": 1700000000}
//! ```
//! `to` is either a node id or `*` for every node. Missing fields decode to
//! empty strings and zeros. The encoding is pure ASCII with `", "` and
//! `": "` separators; anything outside ASCII is written as `\uXXXX`.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use crate::config::protocol::{BROADCAST_ID, MAX_LORA_PAYLOAD};

/// Errors raised while encoding or decoding envelopes
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Bytes are not a well-formed envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    /// Encoded envelope does not fit in one packet
    #[error("envelope is {0} bytes, larger than one packet")]
    TooLong(usize),
}

/// Addressed, hop-limited message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub destination: String,
    pub payload: String,
    pub ttl: u8,
    pub seq: u8,
    /// Origination time, unix seconds
    pub timestamp: u64,
}

impl Envelope {
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ID
    }
}

/// Create an envelope originating at `local_id`
///
/// A random sequence number is drawn when `seq` is `None`.
pub fn build_envelope(local_id: &str, destination: &str, payload: &str, ttl: u8, seq: Option<u8>) -> Envelope {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    Envelope {
        sender: local_id.to_owned(),
        destination: destination.to_owned(),
        payload: payload.to_owned(),
        ttl,
        seq: seq.unwrap_or_else(rand::random),
        timestamp,
    }
}

/// JSON formatter producing the ASCII-only, space-separated layout
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    let mut bytes = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, AsciiFormatter);
    value.serialize(&mut serializer).map_err(EnvelopeError::Encode)?;
    if bytes.len() > MAX_LORA_PAYLOAD {
        return Err(EnvelopeError::TooLong(bytes.len()));
    }
    Ok(bytes)
}

/// Encode an envelope for transmission
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    encode(envelope)
}

/// Decode received bytes
pub fn parse(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)
}

/// Re-encode a received envelope with a new ttl
///
/// Every other field, known or not, keeps its value and position; fields
/// the sender left out stay out.
pub fn restamp(bytes: &[u8], ttl: u8) -> Result<Vec<u8>, EnvelopeError> {
    let mut fields: Map<String, Value> = serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;
    fields.insert("ttl".to_owned(), Value::from(ttl));
    encode(&fields)
}
