// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Frame layout: `u32` big-endian body length, then `topic SP json-payload`.

use super::{BridgeError, Message, Payload};

pub const HEADER_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn encode(msg: &Message) -> Result<Vec<u8>, BridgeError> {
    if msg.topic.is_empty() || msg.topic.contains(char::is_whitespace) {
        return Err(BridgeError::Frame(format!(
            "topic '{}' must be non-empty and contain no whitespace",
            msg.topic
        )));
    }
    let json = serde_json::to_vec(&msg.payload).map_err(|source| BridgeError::Payload {
        topic: msg.topic.clone(),
        source,
    })?;
    let body_len = msg.topic.len() + 1 + json.len();
    if body_len > MAX_FRAME_LEN {
        return Err(BridgeError::Frame(format!(
            "{} byte message on '{}' exceeds the frame limit",
            body_len, msg.topic
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.extend_from_slice(msg.topic.as_bytes());
    frame.push(b' ');
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Splits a frame body on the first space.
pub fn decode_body(body: &[u8]) -> Result<Message, BridgeError> {
    let split = body
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| BridgeError::Frame("missing topic separator".to_string()))?;
    let topic = std::str::from_utf8(&body[..split])
        .map_err(|_| BridgeError::Frame("topic is not UTF-8".to_string()))?
        .to_string();
    let payload: Payload =
        serde_json::from_slice(&body[split + 1..]).map_err(|source| BridgeError::Payload {
            topic: topic.clone(),
            source,
        })?;
    Ok(Message { topic, payload })
}

/// Accumulates stream bytes and yields complete frame bodies.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete body, if buffered. An oversized length header poisons the stream,
    /// so the buffer is dropped and an error returned.
    pub fn next_body(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            self.buf.clear();
            return Err(BridgeError::Frame(format!(
                "declared length {} exceeds the frame limit",
                len
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let body = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_reads() {
        let a = encode(&Message::new("Interrupt.Trigger", Payload::new().with("num", 15u32)))
            .unwrap();
        let b = encode(&Message::new(
            "Peripheral.UARTPublisher.rx_data",
            Payload::new().with("id", 0x4001_1000u64).with("chars", &b"hi"[..]),
        ))
        .unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut fb = FrameBuffer::new();
        fb.extend(&stream[..3]);
        assert!(fb.next_body().unwrap().is_none());
        fb.extend(&stream[3..a.len() + 5]);
        let first = decode_body(&fb.next_body().unwrap().unwrap()).unwrap();
        assert_eq!(first.topic, "Interrupt.Trigger");
        assert_eq!(first.payload.get_u64("num"), Some(15));
        assert!(fb.next_body().unwrap().is_none());

        fb.extend(&stream[a.len() + 5..]);
        let second = decode_body(&fb.next_body().unwrap().unwrap()).unwrap();
        assert_eq!(second.payload.get_bytes("chars"), Some(&b"hi"[..]));
    }

    #[test]
    fn test_rejects_bad_topics_and_bodies() {
        assert!(encode(&Message::new("has space", Payload::new())).is_err());
        assert!(decode_body(b"no-separator").is_err());
        assert!(matches!(
            decode_body(b"Peripheral.X.y {not json"),
            Err(BridgeError::Payload { .. })
        ));
    }

    #[test]
    fn test_oversized_header_resets_buffer() {
        let mut fb = FrameBuffer::new();
        fb.extend(&u32::MAX.to_be_bytes());
        fb.extend(b"junk");
        assert!(fb.next_body().is_err());
        assert!(fb.next_body().unwrap().is_none());
    }
}
