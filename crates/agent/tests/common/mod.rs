//! Shared helpers for the agent integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::timeout;
use vshell_agent::SessionConfig;
use vshell_protocol::{Frame, FrameCodec, FrameType, WindowSize};

/// How long a test waits for the shell before giving up.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A `/bin/sh` session without login flag or MOTD, so tests don't depend on
/// the host's login scripts.
pub fn sh_config() -> SessionConfig {
    SessionConfig {
        shells: vec!["/bin/sh".to_string()],
        login_flag: String::new(),
        motd_dir: PathBuf::from("/nonexistent/vshell/motd.d"),
        ..SessionConfig::default()
    }
}

/// The host side of a connection.
pub struct TestClient<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    codec: FrameCodec,
    output: String,
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            codec: FrameCodec::new(),
            output: String::new(),
        }
    }

    pub async fn send(&mut self, frame_type: FrameType, payload: &[u8]) {
        self.codec
            .write_parts(&mut self.writer, frame_type, payload)
            .await
            .unwrap();
    }

    pub async fn send_input(&mut self, input: &str) {
        self.send(FrameType::Data, input.as_bytes()).await;
    }

    pub async fn send_window_size(&mut self, cols: u32, rows: u32) {
        self.send(FrameType::WindowSize, &WindowSize::new(cols, rows).to_payload())
            .await;
    }

    /// Reads Data frames until the accumulated output contains `marker`.
    pub async fn read_until(&mut self, marker: &str) -> String {
        let read = async {
            while !self.output.contains(marker) {
                let frame = self
                    .codec
                    .read_frame(&mut self.reader)
                    .await
                    .unwrap_or_else(|e| {
                        panic!("connection ended before {:?}: {}\n{}", marker, e, self.output)
                    });
                assert_eq!(frame.frame_type, FrameType::Data);
                self.output.push_str(&String::from_utf8_lossy(&frame.payload));
            }
        };
        timeout(TEST_TIMEOUT, read)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {:?}", marker));

        std::mem::take(&mut self.output)
    }

    /// Reads frames until the agent closes the connection.
    pub async fn read_to_end(&mut self) -> Vec<Frame> {
        let read = async {
            let mut frames = Vec::new();
            loop {
                match self.codec.read_frame(&mut self.reader).await {
                    Ok(frame) => frames.push(frame),
                    Err(e) => {
                        assert!(e.is_connection_closed(), "unexpected error: {}", e);
                        return frames;
                    }
                }
            }
        };
        timeout(TEST_TIMEOUT, read)
            .await
            .expect("agent did not close the connection")
    }
}
