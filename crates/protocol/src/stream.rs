//! Async frame I/O over byte streams.
//!
//! These helpers read and write whole frames on anything implementing
//! tokio's `AsyncRead` / `AsyncWrite`. Callers that share a writer between
//! tasks must serialize calls to [`FrameCodec::write_frame`] themselves.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::framing::{Frame, FrameCodec, FrameType, FRAME_HEADER_SIZE};

/// Initial payload buffer reservation; larger payloads grow as bytes arrive.
const PAYLOAD_PREALLOC_LIMIT: usize = 64 * 1024;

impl FrameCodec {
    /// Read exactly one frame from `reader`.
    ///
    /// A stream that ends before the 5 header bytes or before the full payload
    /// yields [`ProtocolError::ConnectionClosed`]. Frames of reserved types are
    /// consumed in full and returned like any other frame.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Frame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut header).await?;

        let (frame_type, len) = self.parse_header(&header)?;

        let mut payload = Vec::with_capacity(len.min(PAYLOAD_PREALLOC_LIMIT));
        let read = (&mut *reader)
            .take(len as u64)
            .read_to_end(&mut payload)
            .await?;

        if read < len {
            return Err(ProtocolError::ConnectionClosed(format!(
                "truncated frame payload: expected {} bytes, got {}",
                len, read
            )));
        }

        Ok(Frame::new(frame_type, payload))
    }

    /// Write one frame to `writer`: the header, then the payload, then flush.
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_parts(writer, frame.frame_type, &frame.payload)
            .await
    }

    /// Like [`FrameCodec::write_frame`] but without building a [`Frame`].
    pub async fn write_parts<W>(
        &self,
        writer: &mut W,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let header = self.encode_header(frame_type, payload.len())?;

        writer.write_all(&header).await?;
        if !payload.is_empty() {
            writer.write_all(payload).await?;
        }
        writer.flush().await?;

        Ok(())
    }
}
