//! Terminal session module.
//!
//! A session is one shell process attached to one pseudo-terminal, started
//! from an ordered list of candidate shells.

pub mod command;
pub mod pty;

pub use command::ShellCommand;
pub use pty::{SessionError, SessionStatus, TerminalSession};
