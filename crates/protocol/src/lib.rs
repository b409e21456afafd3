//! # vshell Protocol Library
//!
//! Wire framing for the vshell agent: a minimal length-prefixed protocol that
//! carries raw terminal bytes and window size updates over a single ordered
//! byte stream (vsock, unix socket or TCP).
//!
//! ## Wire Format
//!
//! ```text
//! byte 0        frame type   0x01 = Data, 0x02 = WindowSize, others reserved
//! bytes 1..4    payload length L, big-endian u32
//! bytes 5..5+L  payload
//! ```
//!
//! A window size payload is two big-endian `u32` values, columns then rows.
//!
//! ## Example Usage
//!
//! ```rust
//! use vshell_protocol::{Frame, FrameCodec, WindowSize};
//!
//! let codec = FrameCodec::new();
//! let bytes = codec.encode(&Frame::window_size(WindowSize::new(120, 40))).unwrap();
//! let (frame, consumed) = codec.decode(&bytes).unwrap();
//!
//! assert_eq!(consumed, bytes.len());
//! assert_eq!(frame.as_window_size(), Some(WindowSize::new(120, 40)));
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame types and the slice-based codec
//! - [`stream`]: Async frame reads and writes over tokio streams
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod stream;

pub use error::{ProtocolError, Result};
pub use framing::{
    Frame, FrameCodec, FrameType, WindowSize, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
    WINDOW_SIZE_PAYLOAD_LEN,
};
