//! Frame codec for the length-prefixed, typed wire format.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: frame type (`0x01` data, `0x02` window size, anything else reserved)
//! - 4 bytes: payload length (big-endian, unsigned)
//! - N bytes: payload
//!
//! The length is explicit, so payloads may carry any byte value including
//! zero. Reserved frame types decode successfully; it is up to the consumer
//! to skip them.

use crate::error::{ProtocolError, Result};

/// Frame header size: 1 (type) + 4 (length) = 5 bytes.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Size of a window size payload: two big-endian `u32` values.
pub const WINDOW_SIZE_PAYLOAD_LEN: usize = 8;

/// The type byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Raw terminal bytes, in either direction.
    Data,
    /// Terminal geometry update (client to agent).
    WindowSize,
    /// A reserved type byte. Carried through so callers can skip it.
    Unknown(u8),
}

impl FrameType {
    /// Wire value of [`FrameType::Data`].
    pub const DATA: u8 = 0x01;
    /// Wire value of [`FrameType::WindowSize`].
    pub const WINDOW_SIZE: u8 = 0x02;

    /// Create a frame type from its wire byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::DATA => FrameType::Data,
            Self::WINDOW_SIZE => FrameType::WindowSize,
            other => FrameType::Unknown(other),
        }
    }

    /// Get the wire byte for this frame type.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Data => Self::DATA,
            FrameType::WindowSize => Self::WINDOW_SIZE,
            FrameType::Unknown(byte) => byte,
        }
    }
}

impl From<u8> for FrameType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

/// Terminal geometry carried by a [`FrameType::WindowSize`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Width in columns.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
}

impl WindowSize {
    /// Create a new window size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a window size from a frame payload.
    ///
    /// Only the first 8 bytes are interpreted. Shorter payloads yield `None`,
    /// which callers treat as "no resize".
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < WINDOW_SIZE_PAYLOAD_LEN {
            return None;
        }
        let width = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let height = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Some(Self { width, height })
    }

    /// Encode as an 8-byte payload (width, then height).
    pub fn to_payload(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(WINDOW_SIZE_PAYLOAD_LEN);
        payload.extend_from_slice(&self.width.to_be_bytes());
        payload.extend_from_slice(&self.height.to_be_bytes());
        payload
    }

    /// Columns and rows clamped to what a terminal driver can hold.
    ///
    /// Values above `u16::MAX` saturate to `u16::MAX`; they never wrap, so
    /// 65536 columns become 65535 rather than 0.
    pub fn to_terminal_dimensions(self) -> (u16, u16) {
        (saturate_u16(self.width), saturate_u16(self.height))
    }
}

fn saturate_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// A single typed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// The payload bytes, verbatim.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with an explicit type.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Create a data frame.
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(FrameType::Data, payload.into())
    }

    /// Create a window size frame.
    pub fn window_size(size: WindowSize) -> Self {
        Self::new(FrameType::WindowSize, size.to_payload())
    }

    /// Interpret the payload as a window size, if this is a window size frame
    /// with a long enough payload.
    pub fn as_window_size(&self) -> Option<WindowSize> {
        match self.frame_type {
            FrameType::WindowSize => WindowSize::from_payload(&self.payload),
            _ => None,
        }
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Largest payload accepted when decoding.
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec that accepts any payload the length field can describe.
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a codec that rejects decoded payloads above `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_SIZE),
        }
    }

    /// Largest payload accepted when decoding.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode a frame header for a payload of `payload_len` bytes.
    pub fn encode_header(
        &self,
        frame_type: FrameType,
        payload_len: usize,
    ) -> Result<[u8; FRAME_HEADER_SIZE]> {
        let len = u32::try_from(payload_len).map_err(|_| ProtocolError::FrameTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        })?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0] = frame_type.as_byte();
        header[1..].copy_from_slice(&len.to_be_bytes());
        Ok(header)
    }

    /// Encode a frame into bytes: header followed by the payload verbatim.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let header = self.encode_header(frame.frame_type, frame.payload.len())?;

        let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        output.extend_from_slice(&header);
        output.extend_from_slice(&frame.payload);
        Ok(output)
    }

    /// Parse a frame header into its type and payload length.
    pub fn parse_header(&self, header: &[u8; FRAME_HEADER_SIZE]) -> Result<(FrameType, usize)> {
        let frame_type = FrameType::from_byte(header[0]);
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        if len > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_payload,
            });
        }

        Ok((frame_type, len))
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed. A buffer
    /// that ends inside the header or payload is reported as a closed
    /// connection, the same condition a truncated stream produces.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None if data.len() < FRAME_HEADER_SIZE => Err(ProtocolError::ConnectionClosed(
                format!(
                    "truncated frame header: need {} bytes, have {}",
                    FRAME_HEADER_SIZE,
                    data.len()
                ),
            )),
            None => Err(ProtocolError::ConnectionClosed(format!(
                "truncated frame payload: have {} bytes after header",
                data.len() - FRAME_HEADER_SIZE
            ))),
        }
    }

    /// Try to decode a frame from bytes, returning `None` if there isn't
    /// enough data yet.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        let Some(header) = data.first_chunk::<FRAME_HEADER_SIZE>() else {
            return Ok(None);
        };

        let (frame_type, len) = self.parse_header(header)?;

        let end = FRAME_HEADER_SIZE + len;
        if data.len() < end {
            return Ok(None);
        }

        let frame = Frame::new(frame_type, data[FRAME_HEADER_SIZE..end].to_vec());
        Ok(Some((frame, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_from_byte() {
        assert_eq!(FrameType::from_byte(0x01), FrameType::Data);
        assert_eq!(FrameType::from_byte(0x02), FrameType::WindowSize);
        assert_eq!(FrameType::from_byte(0xFF), FrameType::Unknown(0xFF));
        assert_eq!(FrameType::from_byte(0x00), FrameType::Unknown(0x00));
    }

    #[test]
    fn test_frame_type_as_byte() {
        assert_eq!(FrameType::Data.as_byte(), 0x01);
        assert_eq!(FrameType::WindowSize.as_byte(), 0x02);
        assert_eq!(FrameType::Unknown(0x7F).as_byte(), 0x7F);
    }

    #[test]
    fn test_frame_header_format() {
        let codec = FrameCodec::new();
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let frame = Frame::data(payload.clone());

        let encoded = codec.encode(&frame).unwrap();

        assert_eq!(encoded[0], 0x01);
        let length = u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]);
        assert_eq!(length, 4);
        assert_eq!(&encoded[5..], &payload[..]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let codec = FrameCodec::new();
        let encoded = codec.encode(&Frame::data(Vec::new())).unwrap();
        assert_eq!(encoded, vec![0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_decode_roundtrip_with_zero_bytes() {
        let codec = FrameCodec::new();
        let original = Frame::data(vec![0, 0, 1, 0, 0xFF, 0]);

        let encoded = codec.encode(&original).unwrap();
        let (decoded, consumed) = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_encode_decode_roundtrip_unknown_type() {
        let codec = FrameCodec::new();
        let original = Frame::new(FrameType::Unknown(0xFF), b"ignored".to_vec());

        let encoded = codec.encode(&original).unwrap();
        let (decoded, consumed) = codec.decode(&encoded).unwrap();

        assert_eq!(decoded.frame_type, FrameType::Unknown(0xFF));
        assert_eq!(decoded.payload, b"ignored");
        assert_eq!(consumed, encoded.len());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_encode_header_rejects_oversized_length() {
        let codec = FrameCodec::new();
        let result = codec.encode_header(FrameType::Data, MAX_PAYLOAD_SIZE + 1);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_header_accepts_max_length() {
        let codec = FrameCodec::new();
        let header = codec
            .encode_header(FrameType::Data, MAX_PAYLOAD_SIZE)
            .unwrap();
        assert_eq!(header, [0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_insufficient_header() {
        let codec = FrameCodec::new();
        let result = codec.decode(&[0x01, 0x00, 0x00]);
        let err = result.unwrap_err();
        assert!(err.is_connection_closed());
        assert!(err.to_string().contains("truncated frame header"));
    }

    #[test]
    fn test_decode_insufficient_payload() {
        let codec = FrameCodec::new();
        let mut short_frame = vec![0x01];
        short_frame.extend_from_slice(&100u32.to_be_bytes());
        short_frame.extend_from_slice(b"abc");

        let err = codec.decode(&short_frame).unwrap_err();
        assert!(err.is_connection_closed());
        assert!(err.to_string().contains("truncated frame payload"));
    }

    #[test]
    fn test_decode_respects_max_payload() {
        let codec = FrameCodec::with_max_payload(16);
        let mut frame = vec![0x01];
        frame.extend_from_slice(&17u32.to_be_bytes());

        let err = codec.decode(&frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { size: 17, max: 16 }
        ));
    }

    #[test]
    fn test_try_decode_partial_data() {
        let codec = FrameCodec::new();
        let original = Frame::data(vec![1, 2, 3, 4, 5]);
        let encoded = codec.encode(&original).unwrap();

        for i in 0..encoded.len() {
            let result = codec.try_decode(&encoded[..i]).unwrap();
            assert!(
                result.is_none(),
                "should return None for partial data (len={})",
                i
            );
        }

        let (decoded, consumed) = codec.try_decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let codec = FrameCodec::new();
        let frame1 = Frame::data(vec![1, 2, 3]);
        let frame2 = Frame::window_size(WindowSize::new(120, 40));

        let mut combined = codec.encode(&frame1).unwrap();
        let first_len = combined.len();
        combined.extend_from_slice(&codec.encode(&frame2).unwrap());

        let (decoded1, consumed1) = codec.decode(&combined).unwrap();
        assert_eq!(decoded1, frame1);
        assert_eq!(consumed1, first_len);

        let (decoded2, consumed2) = codec.decode(&combined[consumed1..]).unwrap();
        assert_eq!(decoded2, frame2);
        assert_eq!(consumed1 + consumed2, combined.len());
    }

    #[test]
    fn test_window_size_payload_layout() {
        let payload = WindowSize::new(132, 43).to_payload();
        assert_eq!(payload, vec![0, 0, 0, 132, 0, 0, 0, 43]);
    }

    #[test]
    fn test_window_size_short_payload_ignored() {
        for len in 0..WINDOW_SIZE_PAYLOAD_LEN {
            assert_eq!(WindowSize::from_payload(&vec![0xAB; len]), None);
        }
    }

    #[test]
    fn test_window_size_extra_bytes_ignored() {
        let mut payload = WindowSize::new(100, 30).to_payload();
        payload.extend_from_slice(&[0xFF; 4]);
        assert_eq!(
            WindowSize::from_payload(&payload),
            Some(WindowSize::new(100, 30))
        );
    }

    #[test]
    fn test_window_size_saturates_to_terminal_dimensions() {
        let size = WindowSize::new(70_000, 24);
        assert_eq!(size.to_terminal_dimensions(), (u16::MAX, 24));

        // A wrapping cast would give (0, 1).
        let size = WindowSize::new(65_536, 65_537);
        assert_eq!(size.to_terminal_dimensions(), (u16::MAX, u16::MAX));
        let size = WindowSize::new(u32::MAX, 65_535);
        assert_eq!(size.to_terminal_dimensions(), (u16::MAX, u16::MAX));
    }

    #[test]
    fn test_as_window_size_only_for_window_frames() {
        let payload = WindowSize::new(80, 24).to_payload();
        assert_eq!(Frame::data(payload.clone()).as_window_size(), None);
        assert_eq!(
            Frame::new(FrameType::WindowSize, payload).as_window_size(),
            Some(WindowSize::new(80, 24))
        );
    }
}
