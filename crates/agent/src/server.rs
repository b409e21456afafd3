//! Connection acceptor.
//!
//! Accepts connections from a [`Listener`] and runs one [`SessionBridge`]
//! per connection, each in its own task.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::bridge::SessionBridge;
use crate::config::SessionConfig;
use crate::network::{BoxedStream, Listener, PeerAddr};

/// Serves shell sessions on a bound listener.
pub struct Acceptor {
    listener: Listener,
    config: Arc<SessionConfig>,
    tracker: TaskTracker,
}

impl Acceptor {
    /// Creates an acceptor for `listener`.
    pub fn new(listener: Listener, config: SessionConfig) -> Self {
        Self {
            listener,
            config: Arc::new(config),
            tracker: TaskTracker::new(),
        }
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.tracker.len()
    }

    /// Accepts connections until `shutdown` fires or accepting fails.
    ///
    /// A failed accept is fatal and returned as an error. Either way, every
    /// running session is told to stop and awaited before this returns.
    pub async fn serve(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let result = self.accept_loop(&shutdown).await;

        // Sessions are children of the shutdown token.
        shutdown.cancel();
        self.tracker.close();
        tracing::info!(sessions = self.tracker.len(), "Waiting for sessions to close");
        self.tracker.wait().await;

        result
    }

    async fn accept_loop(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Acceptor received shutdown signal");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = accepted.context("Failed to accept connection")?;
            self.spawn_session(stream, peer, shutdown.child_token());
        }
    }

    fn spawn_session(&self, stream: BoxedStream, peer: PeerAddr, done: CancellationToken) {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", %session_id, %peer);
        let config = Arc::clone(&self.config);

        self.tracker.spawn(
            async move {
                tracing::info!("Accepted connection");
                let mut bridge = SessionBridge::new(stream, config).with_done_signal(done);
                if let Err(e) = bridge.run().await {
                    tracing::warn!(error = %e, "Session ended without a shell");
                }
            }
            .instrument(span),
        );
    }
}
