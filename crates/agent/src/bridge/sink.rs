//! Serialized frame writer for a shared connection.
//!
//! Every outbound frame goes through one [`FrameSink`]. The header and the
//! payload are written under a single lock so concurrent senders can never
//! interleave parts of different frames on the wire.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use vshell_protocol::{FrameCodec, FrameType, ProtocolError, Result};

struct SinkState<W> {
    writer: W,
    closed: bool,
}

/// The single write gate for a connection.
pub struct FrameSink<W> {
    state: Mutex<SinkState<W>>,
    codec: FrameCodec,
}

impl<W> FrameSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps the write side of a connection.
    pub fn new(writer: W, codec: FrameCodec) -> Self {
        Self {
            state: Mutex::new(SinkState {
                writer,
                closed: false,
            }),
            codec,
        }
    }

    /// Sends one frame atomically with respect to other senders.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] once the sink has been
    /// closed.
    pub async fn send(&self, frame_type: FrameType, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ProtocolError::ConnectionClosed(
                "connection already closed".to_string(),
            ));
        }

        self.codec
            .write_parts(&mut state.writer, frame_type, payload)
            .await
    }

    /// Shuts down the write side of the connection. Only the first call
    /// touches the connection; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.writer.shutdown().await?;
        Ok(())
    }

    /// Returns whether [`FrameSink::close`] has been called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
