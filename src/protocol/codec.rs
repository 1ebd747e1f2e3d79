//! Incremental frame encoder/decoder (RFC 6455 §5).
//!
//! [`FrameCodec`] plugs into [`tokio_util::codec::Framed`]. Decoding never
//! consumes a partial frame: bytes stay in the read buffer until a whole
//! frame is available, and `Ok(None)` signals that more input is needed.
//!
//! # Wire Layout
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (if MASK set)     |      Payload Data ...     |
//! +-----------------------------------+---------------------------+
//! ```

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

use super::frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode};

// ============================================================================
// Constants
// ============================================================================

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;

/// 7-bit length marker for a 16-bit extended length.
const LEN_16: u8 = 126;
/// 7-bit length marker for a 64-bit extended length.
const LEN_64: u8 = 127;

/// Largest possible frame header: 2 + 8 (length) + 4 (mask).
const MAX_HEADER_LEN: usize = 14;

// ============================================================================
// Role
// ============================================================================

/// Which end of the connection the codec serves.
///
/// Clients mask everything they send and reject masked input;
/// servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connection initiator.
    Client,
    /// Connection acceptor.
    Server,
}

// ============================================================================
// FrameCodec
// ============================================================================

/// Stateful WebSocket frame codec.
///
/// Besides framing, the decoder tracks whether a fragmented data message
/// is in progress so that stray continuation frames are rejected.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_payload: usize,
    in_message: bool,
}

impl FrameCodec {
    /// Creates a codec for `role`, rejecting frames larger than `max_payload`.
    #[inline]
    #[must_use]
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self {
            role,
            max_payload,
            in_message: false,
        }
    }

    /// Creates a client-side codec.
    #[inline]
    #[must_use]
    pub fn client(max_payload: usize) -> Self {
        Self::new(Role::Client, max_payload)
    }

    /// Creates a server-side codec.
    #[inline]
    #[must_use]
    pub fn server(max_payload: usize) -> Self {
        Self::new(Role::Server, max_payload)
    }

    /// Returns the codec role.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Tracks data-frame sequencing for fragmented messages.
    fn check_sequence(&mut self, opcode: OpCode, fin: bool) -> Result<()> {
        match opcode {
            OpCode::Continuation if !self.in_message => {
                return Err(Error::protocol("continuation frame without a started message"));
            }
            OpCode::Text | OpCode::Binary if self.in_message => {
                return Err(Error::protocol(
                    "new data frame while a fragmented message is unfinished",
                ));
            }
            _ => {}
        }

        if opcode.is_data() {
            self.in_message = !fin;
        }
        Ok(())
    }
}

// ============================================================================
// Decoder
// ============================================================================

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[0];
        let second = src[1];

        if first & RSV_BITS != 0 {
            return Err(Error::protocol("reserved bits set without a negotiated extension"));
        }

        let fin = first & FIN_BIT != 0;
        let opcode = OpCode::try_from(first & OPCODE_BITS)?;
        let masked = second & MASK_BIT != 0;

        match (self.role, masked) {
            (Role::Client, true) => return Err(Error::protocol("server sent a masked frame")),
            (Role::Server, false) => return Err(Error::protocol("client sent an unmasked frame")),
            _ => {}
        }

        let (payload_len, mut header_len) = match second & LEN_BITS {
            LEN_16 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            LEN_64 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::protocol("payload length has its high bit set"));
                }
                (len, 10)
            }
            short => (u64::from(short), 2),
        };

        if opcode.is_control() {
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::protocol(format!(
                    "{opcode} frame payload of {payload_len} bytes exceeds {MAX_CONTROL_PAYLOAD}"
                )));
            }
            if !fin {
                return Err(Error::protocol(format!("fragmented {opcode} frame")));
            }
        }

        if payload_len > self.max_payload as u64 {
            return Err(Error::message_too_big(payload_len, self.max_payload));
        }

        if masked {
            header_len += 4;
        }

        // Bounded by max_payload above, so it fits in usize.
        let payload_len = payload_len as usize;
        let frame_len = header_len + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        self.check_sequence(opcode, fin)?;

        let mask = masked.then(|| {
            let mut key = [0u8; 4];
            key.copy_from_slice(&src[header_len - 4..header_len]);
            key
        });

        src.advance(header_len);
        let mut payload = src.split_to(payload_len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            opcode,
            fin,
            payload: payload.freeze(),
        }))
    }
}

// ============================================================================
// Encoder
// ============================================================================

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        encode_frame(&frame, mask, dst)
    }
}

/// Writes `frame` to `dst`, masking the payload with `mask` if given.
///
/// Uses the shortest of the three length encodings.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an oversized or fragmented
/// control frame.
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) -> Result<()> {
    let len = frame.payload.len();

    if frame.opcode.is_control() && (len > MAX_CONTROL_PAYLOAD || !frame.fin) {
        return Err(Error::invalid_argument(format!(
            "{} frame must be final and at most {MAX_CONTROL_PAYLOAD} bytes (got {len})",
            frame.opcode
        )));
    }

    dst.reserve(MAX_HEADER_LEN + len);

    let fin = if frame.fin { FIN_BIT } else { 0 };
    dst.put_u8(fin | frame.opcode as u8);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len < usize::from(LEN_16) {
        dst.put_u8(mask_bit | len as u8);
    } else if let Ok(len) = u16::try_from(len) {
        dst.put_u8(mask_bit | LEN_16);
        dst.put_u16(len);
    } else {
        dst.put_u8(mask_bit | LEN_64);
        dst.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }

    Ok(())
}

/// XORs `buf` in place with the 4-byte masking key.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use proptest::prelude::*;

    const MAX: usize = 1 << 20;

    fn encode(frame: &Frame, mask: Option<[u8; 4]>) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(frame, mask, &mut buf).expect("encode");
        buf
    }

    #[test]
    fn test_rfc_unmasked_text_example() {
        // RFC 6455 §5.7: single-frame unmasked text "Hello".
        let buf = encode(&Frame::text("Hello"), None);
        assert_eq!(&buf[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_rfc_masked_text_example() {
        // RFC 6455 §5.7: single-frame masked text "Hello".
        let buf = encode(&Frame::text("Hello"), Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );

        let mut src = buf;
        let frame = FrameCodec::server(MAX).decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"Hello");
        assert!(src.is_empty());
    }

    #[test]
    fn test_length_tiers_are_minimal() {
        assert_eq!(encode(&Frame::binary(vec![0u8; 125]), None)[1], 125);

        let buf = encode(&Frame::binary(vec![0u8; 126]), None);
        assert_eq!(buf[1], LEN_16);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 126);

        let buf = encode(&Frame::binary(vec![0u8; 65_535]), None);
        assert_eq!(buf[1], LEN_16);

        let buf = encode(&Frame::binary(vec![0u8; 65_536]), None);
        assert_eq!(buf[1], LEN_64);
        assert_eq!(buf.len(), 10 + 65_536);
    }

    #[test]
    fn test_client_encoder_masks_with_fresh_key() {
        let mut codec = FrameCodec::client(MAX);
        let mut first = BytesMut::new();
        let mut second = BytesMut::new();
        let payload = vec![0u8; 64];
        codec.encode(Frame::binary(payload.clone()), &mut first).unwrap();
        codec.encode(Frame::binary(payload), &mut second).unwrap();

        assert_ne!(first[1] & MASK_BIT, 0);
        // Two 32-bit random keys colliding is vanishingly unlikely.
        assert_ne!(&first[2..6], &second[2..6]);
    }

    #[test]
    fn test_server_encoder_does_not_mask() {
        let mut codec = FrameCodec::server(MAX);
        let mut buf = BytesMut::new();
        codec.encode(Frame::text("x"), &mut buf).unwrap();
        assert_eq!(buf[1] & MASK_BIT, 0);
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        let full = encode(&Frame::binary(vec![7u8; 300]), None);
        let mut codec = FrameCodec::client(MAX);

        for cut in [0, 1, 3, 4, 100, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut partial).unwrap().is_none(), "cut {cut}");
            assert_eq!(partial.len(), cut);
        }

        let mut src = full.clone();
        src.extend_from_slice(&[0x89]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.len(), 300);
        assert_eq!(&src[..], &[0x89]);
    }

    #[test]
    fn test_decode_across_reads() {
        let mut codec = FrameCodec::client(MAX);
        let full = encode(&Frame::text("split across reads"), None);
        let mut src = BytesMut::new();

        src.extend_from_slice(&full[..5]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&full[5..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"split across reads");
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut src = BytesMut::from(&[0xC1, 0x00][..]);
        let err = FrameCodec::client(MAX).decode(&mut src).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_mask_direction_enforced() {
        let masked = encode(&Frame::text("a"), Some([1, 2, 3, 4]));
        let unmasked = encode(&Frame::text("a"), None);

        let err = FrameCodec::client(MAX).decode(&mut masked.clone()).unwrap_err();
        assert!(err.is_protocol_error());

        let err = FrameCodec::server(MAX).decode(&mut unmasked.clone()).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let mut src = BytesMut::from(&[0x89, 126, 0x00, 126][..]);
        let err = FrameCodec::client(MAX).decode(&mut src).unwrap_err();
        assert!(err.is_protocol_error());

        let err = encode_frame(&Frame::ping(vec![0u8; 126]), None, &mut BytesMut::new());
        assert!(err.unwrap_err().is_misuse());
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let mut src = BytesMut::from(&[0x09, 0x00][..]);
        assert!(FrameCodec::client(MAX).decode(&mut src).is_err());
    }

    #[test]
    fn test_declared_length_over_maximum() {
        let mut src = BytesMut::from(&[0x82, LEN_64, 0, 0, 0, 1, 0, 0, 0, 0][..]);
        let err = FrameCodec::client(1024).decode(&mut src).unwrap_err();
        assert_eq!(err.close_code(), Some(crate::protocol::CloseCode::MessageTooBig));
    }

    #[test]
    fn test_stray_continuation_rejected() {
        let mut src = encode(&Frame::continuation(true, "x"), None);
        let err = FrameCodec::client(MAX).decode(&mut src).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_fragment_sequence_with_interleaved_ping() {
        let mut codec = FrameCodec::client(MAX);
        let mut src = BytesMut::new();
        src.extend_from_slice(&encode(&Frame::new(OpCode::Text, false, "hel"), None));
        src.extend_from_slice(&encode(&Frame::ping("p"), None));
        src.extend_from_slice(&encode(&Frame::continuation(true, "lo"), None));

        let opcodes: Vec<_> = std::iter::from_fn(|| codec.decode(&mut src).unwrap())
            .map(|f| (f.opcode, f.fin))
            .collect();
        assert_eq!(
            opcodes,
            vec![
                (OpCode::Text, false),
                (OpCode::Ping, true),
                (OpCode::Continuation, true)
            ]
        );
    }

    #[test]
    fn test_new_message_inside_fragment_rejected() {
        let mut codec = FrameCodec::client(MAX);
        let mut src = encode(&Frame::new(OpCode::Binary, false, "a"), None);
        src.extend_from_slice(&encode(&Frame::binary("b"), None));

        assert!(codec.decode(&mut src).unwrap().is_some());
        assert!(codec.decode(&mut src).is_err());
    }

    fn any_frame() -> impl Strategy<Value = Frame> {
        let data = (
            prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)],
            proptest::collection::vec(any::<u8>(), 0..70_000),
        )
            .prop_map(|(opcode, payload)| Frame::new(opcode, true, Bytes::from(payload)));
        let control = (
            prop_oneof![Just(OpCode::Ping), Just(OpCode::Pong), Just(OpCode::Close)],
            proptest::collection::vec(any::<u8>(), 0..=MAX_CONTROL_PAYLOAD),
        )
            .prop_map(|(opcode, payload)| Frame::new(opcode, true, Bytes::from(payload)));
        prop_oneof![data, control]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_client_to_server_round_trip(frame in any_frame()) {
            let mut buf = BytesMut::new();
            FrameCodec::client(MAX).encode(frame.clone(), &mut buf).unwrap();
            let decoded = FrameCodec::server(MAX).decode(&mut buf).unwrap();
            prop_assert_eq!(decoded, Some(frame));
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_server_to_client_round_trip(frame in any_frame()) {
            let mut buf = BytesMut::new();
            FrameCodec::server(MAX).encode(frame.clone(), &mut buf).unwrap();
            let decoded = FrameCodec::client(MAX).decode(&mut buf).unwrap();
            prop_assert_eq!(decoded, Some(frame));
        }
    }
}
