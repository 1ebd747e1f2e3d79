//! Application messages and fragment reassembly.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

use super::frame::{Frame, OpCode};

// ============================================================================
// Message
// ============================================================================

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Arbitrary bytes.
    Binary(Bytes),
}

impl Message {
    /// Returns `true` for a text message.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Returns the text if this is a text message.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the message, returning its raw payload.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }

    /// Splits the message into frames of at most `fragment_size` bytes.
    ///
    /// The first frame carries the message opcode, the rest are
    /// continuations; only the last is final. An empty message yields
    /// one empty final frame. Text fragments may split UTF-8 sequences.
    #[must_use]
    pub fn into_frames(self, fragment_size: usize) -> Vec<Frame> {
        let opcode = match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
        };
        let mut payload = self.into_bytes();
        let fragment_size = fragment_size.max(1);

        if payload.len() <= fragment_size {
            return vec![Frame::new(opcode, true, payload)];
        }

        let mut frames = Vec::with_capacity(payload.len().div_ceil(fragment_size));
        let mut first = true;
        while !payload.is_empty() {
            let chunk = payload.split_to(fragment_size.min(payload.len()));
            let fin = payload.is_empty();
            let kind = if first { opcode } else { OpCode::Continuation };
            frames.push(Frame::new(kind, fin, chunk));
            first = false;
        }
        frames
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(data))
    }
}

// ============================================================================
// MessageAssembler
// ============================================================================

/// Reassembles data frames into complete messages.
///
/// Frame sequencing is already checked by the codec; the assembler
/// enforces the total message size and validates text as UTF-8 once
/// the final fragment arrives.
#[derive(Debug)]
pub struct MessageAssembler {
    max_size: usize,
    opcode: Option<OpCode>,
    buffer: BytesMut,
}

impl MessageAssembler {
    /// Creates an assembler rejecting messages over `max_size` bytes.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            opcode: None,
            buffer: BytesMut::new(),
        }
    }

    /// Feeds one data frame.
    ///
    /// Returns the message once its final frame has been pushed.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] (1009) if the message exceeds the maximum size
    /// - [`Error::Protocol`] (1007) if a text message is not valid UTF-8
    /// - [`Error::Protocol`] (1002) on a control or out-of-sequence frame
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Text | OpCode::Binary, None) => frame.opcode,
            (OpCode::Continuation, Some(opcode)) => opcode,
            (other, _) => {
                return Err(Error::protocol(format!("unexpected {other} frame in message")));
            }
        };

        let total = self.buffer.len() + frame.payload.len();
        if total > self.max_size {
            self.reset();
            return Err(Error::message_too_big(total as u64, self.max_size));
        }

        if frame.fin && self.opcode.is_none() {
            // Unfragmented: skip the copy into the buffer.
            return finish(opcode, frame.payload).map(Some);
        }

        self.opcode = Some(opcode);
        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().freeze();
        self.opcode = None;
        finish(opcode, payload).map(Some)
    }

    /// Returns `true` if a fragmented message is in progress.
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.opcode.is_some()
    }

    fn reset(&mut self) {
        self.opcode = None;
        self.buffer.clear();
    }
}

fn finish(opcode: OpCode, payload: Bytes) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| Error::invalid_utf8("text message is not valid UTF-8")),
        _ => Ok(Message::Binary(payload)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::CloseCode;

    #[test]
    fn test_unfragmented_text() {
        let mut assembler = MessageAssembler::new(1024);
        let message = assembler.push(Frame::text("hello")).unwrap();
        assert_eq!(message, Some(Message::Text("hello".into())));
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_fragmented_text_split_inside_code_point() {
        let bytes = "héllo".as_bytes();
        let mut assembler = MessageAssembler::new(1024);

        let first = Frame::new(OpCode::Text, false, Bytes::copy_from_slice(&bytes[..2]));
        let last = Frame::continuation(true, Bytes::copy_from_slice(&bytes[2..]));

        assert_eq!(assembler.push(first).unwrap(), None);
        assert!(assembler.is_partial());
        assert_eq!(
            assembler.push(last).unwrap(),
            Some(Message::Text("héllo".into()))
        );
    }

    #[test]
    fn test_invalid_utf8_maps_to_1007() {
        let mut assembler = MessageAssembler::new(1024);
        let frame = Frame::new(OpCode::Text, true, vec![0xC3u8, 0x28]);
        let err = assembler.push(frame).unwrap_err();
        assert_eq!(err.close_code(), Some(CloseCode::InvalidPayload));
    }

    #[test]
    fn test_binary_is_not_validated() {
        let mut assembler = MessageAssembler::new(1024);
        let message = assembler.push(Frame::binary(vec![0xFFu8, 0xFE])).unwrap();
        assert_eq!(message, Some(Message::Binary(Bytes::from_static(&[0xFF, 0xFE]))));
    }

    #[test]
    fn test_total_size_enforced_across_fragments() {
        let mut assembler = MessageAssembler::new(8);
        assembler
            .push(Frame::new(OpCode::Binary, false, vec![0u8; 6]))
            .unwrap();
        let err = assembler
            .push(Frame::continuation(true, vec![0u8; 6]))
            .unwrap_err();
        assert_eq!(err.close_code(), Some(CloseCode::MessageTooBig));
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_into_frames_fragments() {
        let frames = Message::from(vec![1u8; 10]).into_frames(4);
        let shape: Vec<_> = frames.iter().map(|f| (f.opcode, f.fin, f.len())).collect();
        assert_eq!(
            shape,
            vec![
                (OpCode::Binary, false, 4),
                (OpCode::Continuation, false, 4),
                (OpCode::Continuation, true, 2),
            ]
        );
    }

    #[test]
    fn test_into_frames_small_and_empty() {
        let frames = Message::from("hi").into_frames(4);
        assert_eq!(frames, vec![Frame::text("hi")]);

        let frames = Message::from("").into_frames(4);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_final());
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_fragments_reassemble() {
        let text = "a fairly long message split into several fragments";
        let mut assembler = MessageAssembler::new(1024);
        let mut out = None;
        for frame in Message::from(text).into_frames(7) {
            out = assembler.push(frame).unwrap();
        }
        assert_eq!(out, Some(Message::Text(text.into())));
    }
}
