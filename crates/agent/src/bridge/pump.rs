//! The per-connection I/O activities.
//!
//! Three tasks run while a bridge is live: the terminal-to-connection pump,
//! the connection-to-terminal pump and the exit watcher. They share one
//! [`CancellationToken`] as the done signal. Every activity fires it on the
//! way out, so whichever side stops first unwinds the others.

use std::fmt;
use std::io;
use std::sync::Arc;

use nix::errno::Errno;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use vshell_protocol::{FrameCodec, FrameType, WindowSize};

use super::sink::FrameSink;
use crate::session::{SessionStatus, TerminalSession};

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The done signal was observed.
    Done,
    /// The terminal reached end of stream.
    TerminalClosed,
    /// Reading from or writing to the terminal failed.
    TerminalError(String),
    /// The peer closed the connection, possibly mid-frame.
    PeerClosed,
    /// Reading from or writing to the connection failed.
    TransportError(String),
    /// The pump task panicked.
    Panicked(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Done => write!(f, "done"),
            StopReason::TerminalClosed => write!(f, "terminal closed"),
            StopReason::TerminalError(e) => write!(f, "terminal error: {}", e),
            StopReason::PeerClosed => write!(f, "peer closed"),
            StopReason::TransportError(e) => write!(f, "transport error: {}", e),
            StopReason::Panicked(e) => write!(f, "panicked: {}", e),
        }
    }
}

/// What one pump did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    /// Frames sent (output pump) or received (input pump).
    pub frames: u64,
    /// Terminal bytes carried in Data frames.
    pub bytes: u64,
    /// Why the pump stopped.
    pub stop: StopReason,
}

impl PumpReport {
    /// A report for a pump that never moved any data.
    pub fn stopped(stop: StopReason) -> Self {
        Self {
            frames: 0,
            bytes: 0,
            stop,
        }
    }
}

/// Returns whether a terminal read error just means the shell side closed.
///
/// Linux reports a hung-up pty master as `EIO` rather than end of stream.
fn is_terminal_hangup(error: &io::Error) -> bool {
    error.raw_os_error() == Some(Errno::EIO as i32)
}

/// Copies terminal output into Data frames until the terminal closes, a send
/// fails or the done signal fires.
///
/// A send still pending when done fires is abandoned. The frame may be cut
/// short on the wire, which is fine since the connection closes next.
pub async fn terminal_to_connection<W>(
    session: Arc<TerminalSession>,
    sink: Arc<FrameSink<W>>,
    done: CancellationToken,
    buffer_size: usize,
) -> PumpReport
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut frames = 0u64;
    let mut bytes = 0u64;

    let stop = loop {
        if done.is_cancelled() {
            break StopReason::Done;
        }

        let reader = Arc::clone(&session);
        let read = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; buffer_size];
            let n = reader.read(&mut buffer)?;
            buffer.truncate(n);
            Ok::<_, io::Error>(buffer)
        });

        // The blocking read keeps running if done wins; it ends when the
        // terminal is torn down.
        let result = tokio::select! {
            biased;
            _ = done.cancelled() => None,
            result = read => Some(result),
        };
        let Some(result) = result else {
            break StopReason::Done;
        };

        let chunk = match result {
            Ok(Ok(chunk)) if chunk.is_empty() => {
                tracing::debug!("Terminal reached end of stream");
                break StopReason::TerminalClosed;
            }
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) if is_terminal_hangup(&e) => {
                tracing::debug!("Terminal hung up");
                break StopReason::TerminalClosed;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Error reading from terminal");
                break StopReason::TerminalError(e.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "Terminal read task panicked");
                break StopReason::Panicked(e.to_string());
            }
        };

        // Nothing goes out once the session is ending.
        if done.is_cancelled() {
            break StopReason::Done;
        }

        // A host that stops reading parks the send while it holds the sink
        // lock. Dropping the send on done releases the lock for close().
        let sent = tokio::select! {
            biased;
            _ = done.cancelled() => None,
            result = sink.send(FrameType::Data, &chunk) => Some(result),
        };
        let Some(sent) = sent else {
            break StopReason::Done;
        };

        if let Err(e) = sent {
            if e.is_connection_closed() {
                tracing::debug!(error = %e, "Connection closed while sending output");
                break StopReason::PeerClosed;
            }
            tracing::warn!(error = %e, "Failed to send output frame");
            break StopReason::TransportError(e.to_string());
        }

        frames += 1;
        bytes += chunk.len() as u64;
    };

    done.cancel();
    tracing::debug!(frames, bytes, stop = %stop, "Output pump stopped");

    PumpReport {
        frames,
        bytes,
        stop,
    }
}

/// Decodes frames from the connection and applies them to the terminal until
/// the connection ends, a terminal write fails or the done signal fires.
///
/// Any decode failure, a clean close included, kills the shell.
pub async fn connection_to_terminal<R>(
    session: Arc<TerminalSession>,
    mut reader: R,
    codec: FrameCodec,
    done: CancellationToken,
) -> PumpReport
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frames = 0u64;
    let mut bytes = 0u64;

    let stop = loop {
        if done.is_cancelled() {
            break StopReason::Done;
        }

        let result = tokio::select! {
            biased;
            _ = done.cancelled() => None,
            result = codec.read_frame(&mut reader) => Some(result),
        };
        let Some(result) = result else {
            break StopReason::Done;
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                let stop = if e.is_connection_closed() {
                    tracing::info!(reason = %e, "Peer closed connection");
                    StopReason::PeerClosed
                } else {
                    tracing::warn!(error = %e, "Failed to read frame");
                    StopReason::TransportError(e.to_string())
                };

                if let Err(e) = session.kill() {
                    tracing::warn!(error = %e, "Failed to kill shell after connection loss");
                }
                break stop;
            }
        };
        frames += 1;

        match frame.frame_type {
            FrameType::Data => {
                let len = frame.payload.len() as u64;
                let writer = Arc::clone(&session);
                let payload = frame.payload;
                let write = tokio::task::spawn_blocking(move || writer.write(&payload));

                let result = tokio::select! {
                    biased;
                    _ = done.cancelled() => None,
                    result = write => Some(result),
                };
                match result {
                    None => break StopReason::Done,
                    Some(Ok(Ok(()))) => bytes += len,
                    Some(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "Failed to write to terminal");
                        break StopReason::TerminalError(e.to_string());
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Terminal write task panicked");
                        break StopReason::Panicked(e.to_string());
                    }
                }
            }
            FrameType::WindowSize => {
                apply_window_size(&session, &frame.payload);
            }
            FrameType::Unknown(frame_type) => {
                tracing::debug!(
                    frame_type,
                    len = frame.payload.len(),
                    "Ignoring unknown frame type"
                );
            }
        }
    };

    done.cancel();
    tracing::debug!(frames, bytes, stop = %stop, "Input pump stopped");

    PumpReport {
        frames,
        bytes,
        stop,
    }
}

/// Applies a WindowSize payload to the terminal.
///
/// Returns the applied `(cols, rows)`, or `None` when the payload is too
/// short or the resize failed. Neither case ends the session.
pub fn apply_window_size(session: &TerminalSession, payload: &[u8]) -> Option<(u16, u16)> {
    let Some(size) = WindowSize::from_payload(payload) else {
        tracing::debug!(len = payload.len(), "Ignoring short window size payload");
        return None;
    };

    let (cols, rows) = size.to_terminal_dimensions();
    match session.resize(cols, rows) {
        Ok(()) => Some((cols, rows)),
        Err(e) => {
            tracing::warn!(cols, rows, error = %e, "Failed to resize terminal");
            None
        }
    }
}

/// Waits for the shell to exit, then fires the done signal and closes the
/// connection so a pump parked in a connection read wakes up.
pub async fn watch_exit<W>(
    session: Arc<TerminalSession>,
    sink: Arc<FrameSink<W>>,
    done: CancellationToken,
) -> SessionStatus
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let status = session.wait_exit().await;
    tracing::info!(pid = ?session.pid(), status = ?status, "Shell exited");

    done.cancel();
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Error closing connection after shell exit");
    }

    status
}
