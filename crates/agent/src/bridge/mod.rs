//! Session bridge.
//!
//! A [`SessionBridge`] binds one connection to one [`TerminalSession`]. It
//! starts the shell, runs the two pumps and the exit watcher, waits for both
//! pumps to stop and then tears everything down.
//!
//! ```text
//! Starting ──ok──▶ Running ──both pumps stopped──▶ Draining ──▶ Closed
//!     │                                                          ▲
//!     └──────────── no shell started (error frame sent) ─────────┘
//! ```

pub mod pump;
pub mod sink;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vshell_protocol::FrameType;

use crate::config::SessionConfig;
use crate::session::{SessionError, SessionStatus, TerminalSession};

pub use pump::{PumpReport, StopReason};
pub use sink::FrameSink;

/// How long teardown waits for the killed shell to be reaped so its exit
/// status can be reported. Teardown proceeds either way.
const EXIT_STATUS_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// The shell is being started.
    Starting,
    /// Pumps and exit watcher are live.
    Running,
    /// Both pumps have stopped; the shell and connection are being released.
    Draining,
    /// Everything has been released.
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Starting => "starting",
            BridgeState::Running => "running",
            BridgeState::Draining => "draining",
            BridgeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct BridgeReport {
    /// The shell that ran.
    pub shell: String,
    /// Its process ID, if one was reported.
    pub pid: Option<u32>,
    /// Exit status as known at teardown.
    pub exit_status: SessionStatus,
    /// Terminal to connection.
    pub output: PumpReport,
    /// Connection to terminal.
    pub input: PumpReport,
}

/// Relays one connection to one shell.
pub struct SessionBridge<S> {
    stream: Option<S>,
    config: Arc<SessionConfig>,
    done: CancellationToken,
    state: BridgeState,
}

impl<S> SessionBridge<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a bridge over an accepted connection.
    pub fn new(stream: S, config: Arc<SessionConfig>) -> Self {
        Self {
            stream: Some(stream),
            config,
            done: CancellationToken::new(),
            state: BridgeState::Starting,
        }
    }

    /// Uses `done` as the done signal, e.g. a child of a server-wide
    /// shutdown token.
    pub fn with_done_signal(mut self, done: CancellationToken) -> Self {
        self.done = done;
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> BridgeState {
        self.state
    }

    fn transition(&mut self, next: BridgeState) {
        tracing::debug!(from = %self.state, to = %next, "Bridge state change");
        self.state = next;
    }

    /// Runs the session to completion.
    ///
    /// If no shell can be started, the failure is sent to the peer as a
    /// single Data frame, the connection is closed and the error returned.
    /// A bridge runs once; later calls return [`SessionError::AlreadyClosed`].
    pub async fn run(&mut self) -> Result<BridgeReport, SessionError> {
        let Some(stream) = self.stream.take() else {
            return Err(SessionError::AlreadyClosed);
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let codec = self.config.codec();
        let sink = Arc::new(FrameSink::new(write_half, codec));

        let config = Arc::clone(&self.config);
        let started = tokio::task::spawn_blocking(move || TerminalSession::start(&config))
            .await
            .unwrap_or_else(|e| Err(SessionError::SpawnFailed(e.to_string())));

        let session = match started {
            Ok(session) => Arc::new(session),
            Err(e) => {
                tracing::error!(error = %e, "Could not start a shell");
                let message = format!("Failed to start any command: {}", e);
                let sent = tokio::select! {
                    biased;
                    _ = self.done.cancelled() => None,
                    result = sink.send(FrameType::Data, message.as_bytes()) => Some(result),
                };
                if let Some(Err(send_err)) = sent {
                    tracing::warn!(error = %send_err, "Failed to report startup failure to peer");
                }
                if let Err(close_err) = sink.close().await {
                    tracing::debug!(error = %close_err, "Error closing connection");
                }
                self.transition(BridgeState::Closed);
                return Err(e);
            }
        };

        self.transition(BridgeState::Running);
        let pid = session.pid();
        let span = tracing::Span::current();

        let mut watcher = tokio::spawn(
            pump::watch_exit(Arc::clone(&session), Arc::clone(&sink), self.done.clone())
                .instrument(span.clone()),
        );
        let output = tokio::spawn(
            pump::terminal_to_connection(
                Arc::clone(&session),
                Arc::clone(&sink),
                self.done.clone(),
                self.config.read_buffer_size,
            )
            .instrument(span.clone()),
        );
        let input = tokio::spawn(
            pump::connection_to_terminal(
                Arc::clone(&session),
                read_half,
                codec,
                self.done.clone(),
            )
            .instrument(span),
        );

        let (output, input) = tokio::join!(output, input);
        let output =
            output.unwrap_or_else(|e| PumpReport::stopped(StopReason::Panicked(e.to_string())));
        let input =
            input.unwrap_or_else(|e| PumpReport::stopped(StopReason::Panicked(e.to_string())));

        self.transition(BridgeState::Draining);
        self.done.cancel();

        if let Err(e) = session.kill() {
            tracing::warn!(pid = ?pid, error = %e, "Failed to kill shell");
        }
        let exit_status = match tokio::time::timeout(EXIT_STATUS_GRACE, &mut watcher).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Exit watcher ended abnormally");
                session.exit_status()
            }
            Err(_) => {
                watcher.abort();
                tracing::warn!(pid = ?pid, "Shell still running after kill");
                session.exit_status()
            }
        };
        session.release();
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Error closing connection");
        }

        let report = BridgeReport {
            shell: session.shell().to_string(),
            pid,
            exit_status,
            output,
            input,
        };
        self.transition(BridgeState::Closed);

        tracing::info!(
            pid = ?report.pid,
            exit_status = ?report.exit_status,
            output_stop = %report.output.stop,
            input_stop = %report.input.stop,
            bytes_out = report.output.bytes,
            bytes_in = report.input.bytes,
            "Session closed"
        );

        Ok(report)
    }
}
