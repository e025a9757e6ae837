//! Plain-link frame format
//!
//! A frame is the message bytes, a NUL terminator and, in broadcast mode,
//! one trailing counter byte. Receivers treat the final byte as the trailer:
//! the counter when one was sent, otherwise the terminator itself.

use crate::config::protocol::{MAX_LORA_PAYLOAD, MESSAGE_TERMINATOR};
use crate::lora::traits::LoraError;
use heapless::Vec;

/// Decoded plain-link frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFrame {
    /// Text before the first NUL
    pub message: String,
    /// Final byte of the frame
    pub counter: u8,
}

/// Build a plain-link frame
pub fn encode(message: &str, counter: Option<u8>) -> Result<Vec<u8, MAX_LORA_PAYLOAD>, LoraError> {
    let mut frame = Vec::new();
    frame
        .extend_from_slice(message.as_bytes())
        .map_err(|_| LoraError::PayloadTooLong)?;
    frame
        .push(MESSAGE_TERMINATOR)
        .map_err(|_| LoraError::PayloadTooLong)?;
    if let Some(counter) = counter {
        frame.push(counter).map_err(|_| LoraError::PayloadTooLong)?;
    }
    Ok(frame)
}

/// Split a received frame into message and trailer
///
/// Returns `None` for an empty frame.
pub fn decode(bytes: &[u8]) -> Option<PlainFrame> {
    let (&counter, body) = bytes.split_last()?;
    let text = body
        .iter()
        .position(|&b| b == MESSAGE_TERMINATOR)
        .map_or(body, |end| &body[..end]);

    Some(PlainFrame {
        message: String::from_utf8_lossy(text).into_owned(),
        counter,
    })
}

/// Next broadcast counter, wrapping at 256
pub fn next_counter(counter: u8) -> u8 {
    counter.wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_message() {
        let frame = encode("hello", None).unwrap();
        assert_eq!(frame.as_slice(), b"hello\0");
    }

    #[test]
    fn test_encode_with_counter() {
        let frame = encode("hi", Some(7)).unwrap();
        assert_eq!(frame.as_slice(), &[b'h', b'i', 0x00, 7]);
    }

    #[test]
    fn test_encode_too_long() {
        let long = "x".repeat(254);
        assert!(encode(&long, None).is_ok());
        assert_eq!(encode(&long, Some(1)), Err(LoraError::PayloadTooLong));
    }

    #[test]
    fn test_decode_broadcast_frame() {
        let frame = decode(&[b'h', b'i', 0x00, 42]).unwrap();
        assert_eq!(frame.message, "hi");
        assert_eq!(frame.counter, 42);
    }

    #[test]
    fn test_decode_message_frame() {
        // No counter: the terminator is the trailer
        let frame = decode(b"hello\0").unwrap();
        assert_eq!(frame.message, "hello");
        assert_eq!(frame.counter, 0);
    }

    #[test]
    fn test_decode_without_terminator() {
        let frame = decode(b"abc").unwrap();
        assert_eq!(frame.message, "ab");
        assert_eq!(frame.counter, b'c');
        assert!(decode(&[]).is_none());
    }

    #[test]
    fn test_counter_wraps() {
        assert_eq!(next_counter(0), 1);
        assert_eq!(next_counter(255), 0);
    }
}
