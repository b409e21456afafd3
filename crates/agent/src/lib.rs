//! # vshell Agent Library
//!
//! The in-guest half of vshell: listens for host connections (normally on
//! vsock) and gives each one an interactive login shell on its own
//! pseudo-terminal.
//!
//! ## Overview
//!
//! - **Terminal Sessions**: start a shell from an ordered list of candidates,
//!   resize it, kill it, and learn when it exits
//! - **Session Bridge**: relay terminal bytes and window size updates between
//!   the pty and the connection using the `vshell-protocol` framing
//! - **Network**: vsock, unix socket and TCP listeners behind one type
//! - **Acceptor**: one bridge per accepted connection, graceful shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Acceptor                          │
//! │                 (one task per connection)                │
//! ├──────────────────────────────────────────────────────────┤
//! │                     Session Bridge                       │
//! │                                                          │
//! │   pty ──read──▶ output pump ──Data──▶ FrameSink ──▶ conn │
//! │   pty ◀─write── input pump ◀──Data/WindowSize─────  conn │
//! │   exit watcher ──▶ done signal + close connection        │
//! ├──────────────────────────────────────────────────────────┤
//! │        TerminalSession (portable-pty)  │  Listener       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use vshell_agent::{Acceptor, Config, Listener};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let listener = Listener::bind(&config.listener).await?;
//!     let acceptor = Acceptor::new(listener, config.session);
//!
//!     acceptor.serve(CancellationToken::new()).await
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod network;
pub mod server;
pub mod session;

pub use bridge::{BridgeReport, BridgeState, PumpReport, SessionBridge, StopReason};
pub use config::{Config, ConfigError, SessionConfig, Transport};
pub use network::{BoxedStream, Listener, PeerAddr};
pub use server::Acceptor;
pub use session::{SessionError, SessionStatus, TerminalSession};
