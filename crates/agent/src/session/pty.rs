//! PTY session management.
//!
//! A [`TerminalSession`] owns one pseudo-terminal and the shell process
//! attached to it. Reads and writes are blocking; callers on an async runtime
//! run them on the blocking pool. Process exit is reported asynchronously
//! through [`TerminalSession::wait_exit`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, ChildKiller, MasterPty, PtyPair, PtySize};
use thiserror::Error;
use tokio::sync::watch;

use super::command::ShellCommand;
use crate::config::SessionConfig;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Every candidate shell failed to start.
    #[error("failed to start any shell after {attempts} attempt(s): {last}")]
    NoShellStarted {
        /// Number of candidates tried.
        attempts: usize,
        /// The last failure.
        last: String,
    },

    /// Failed to allocate the PTY or spawn the shell.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the shell process.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// The terminal has already been released.
    #[error("terminal already closed")]
    AlreadyClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status of the shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The process is still running.
    Running,
    /// The process exited with this code (signal deaths report 1).
    Exited(u32),
    /// The process is gone but its status could not be collected.
    Unknown,
}

/// A pseudo-terminal with a shell process attached.
pub struct TerminalSession {
    /// The shell that was started.
    shell: String,

    /// Process ID of the shell.
    pid: Option<u32>,

    /// The PTY master handle, `None` once released.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// Reader for terminal output, `None` once released.
    reader: Mutex<Option<Box<dyn Read + Send>>>,

    /// Set by [`TerminalSession::release`].
    released: AtomicBool,

    /// Writer for terminal input, `None` once released.
    writer: Mutex<Option<Box<dyn Write + Send>>>,

    /// Set once by the waiter thread when the process exits.
    exit_rx: watch::Receiver<Option<SessionStatus>>,

    /// Signal sent by [`TerminalSession::kill`].
    kill_signal: Signal,
}

impl TerminalSession {
    /// Starts a shell on a new pseudo-terminal.
    ///
    /// Tries each of `config.shells` in order and returns the first one that
    /// starts. The terminal is set to the configured initial geometry before
    /// returning. If every candidate fails, the error carries the last
    /// failure.
    pub fn start(config: &SessionConfig) -> Result<Self, SessionError> {
        let kill_signal = config
            .kill_signal()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut last_error = None;

        for shell in &config.shells {
            tracing::debug!(shell = %shell, "Trying to start shell");

            match Self::spawn_shell(shell, config, kill_signal) {
                Ok(session) => {
                    tracing::info!(shell = %shell, pid = ?session.pid, "Started shell");
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(shell = %shell, error = %e, "Failed to start shell");
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::NoShellStarted {
            attempts: config.shells.len(),
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate shells configured".to_string()),
        })
    }

    fn spawn_shell(
        shell: &str,
        config: &SessionConfig,
        kill_signal: Signal,
    ) -> Result<Self, SessionError> {
        let size = PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let PtyPair { master, slave } = native_pty_system()
            .openpty(size)
            .map_err(|e| SessionError::SpawnFailed(format!("failed to allocate pty: {}", e)))?;

        let command = ShellCommand::build(shell, config);
        tracing::debug!(program = %command.program, args = ?command.args, "Starting shell");

        let mut child = slave
            .spawn_command(command.to_command_builder())
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", shell, e)))?;

        // Only the child keeps the slave open, so the master sees EOF on exit.
        drop(slave);

        let pid = child.process_id();

        let handles = master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, master.take_writer()?)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::SpawnFailed(e.to_string()));
            }
        };

        let exit_rx = spawn_exit_waiter(child, pid)?;

        let session = Self {
            shell: shell.to_string(),
            pid,
            master: Mutex::new(Some(master)),
            reader: Mutex::new(Some(reader)),
            released: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            exit_rx,
            kill_signal,
        };

        // Set the geometry before any output is pumped so it isn't mis-wrapped.
        session.resize(config.cols, config.rows)?;

        Ok(session)
    }

    /// The shell binary that was started.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the shell process is still running.
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Returns the current process status without waiting.
    pub fn exit_status(&self) -> SessionStatus {
        (*self.exit_rx.borrow()).unwrap_or(SessionStatus::Running)
    }

    /// Waits until the shell process exits, whatever the cause.
    ///
    /// Can be awaited from any number of tasks; every waiter observes the
    /// same status.
    pub async fn wait_exit(&self) -> SessionStatus {
        let mut exit_rx = self.exit_rx.clone();
        let status = match exit_rx.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        status.unwrap_or(SessionStatus::Unknown)
    }

    /// Reads terminal output into `buf`. Blocks until data is available.
    ///
    /// `Ok(0)` means end of stream or a released terminal. On Linux a
    /// closed terminal usually surfaces as an `EIO` error instead.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = lock(&self.reader);
        let Some(inner) = reader.as_mut() else {
            return Ok(0);
        };

        let result = inner.read(buf);
        if self.released.load(Ordering::Acquire) {
            reader.take();
        }
        result
    }

    /// Writes input bytes to the terminal. Blocks until accepted.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(SessionError::AlreadyClosed)?;

        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Resizes the terminal. Repeated calls only change the geometry.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = lock(&self.master);
        let master = master.as_ref().ok_or(SessionError::AlreadyClosed)?;

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        tracing::debug!(cols = cols, rows = rows, "Resized PTY");
        Ok(())
    }

    /// Returns the current terminal size as `(cols, rows)`.
    pub fn size(&self) -> Result<(u16, u16), SessionError> {
        let master = lock(&self.master);
        let master = master.as_ref().ok_or(SessionError::AlreadyClosed)?;

        let size = master
            .get_size()
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        Ok((size.cols, size.rows))
    }

    /// Sends the configured kill signal to the shell.
    ///
    /// Killing a process that has already exited succeeds without doing
    /// anything.
    pub fn kill(&self) -> Result<(), SessionError> {
        if !self.is_running() {
            return Ok(());
        }

        let pid = self
            .pid
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| SessionError::KillFailed("process id unavailable".to_string()))?;

        match signal::kill(Pid::from_raw(pid), self.kill_signal) {
            Ok(()) => {
                tracing::debug!(pid = pid, signal = ?self.kill_signal, "Signalled shell");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SessionError::KillFailed(e.to_string())),
        }
    }

    /// Drops the terminal's master, writer and reader handles.
    ///
    /// A read already blocked on the terminal is not interrupted. It keeps
    /// the reader, and with it the master side of the terminal, open until
    /// it returns, then drops the reader itself. A background job that holds
    /// the terminal open without writing can keep such a read blocked for as
    /// long as the job lives.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        lock(&self.writer).take();
        lock(&self.master).take();

        match self.reader.try_lock() {
            Ok(mut reader) => {
                reader.take();
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
            }
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(
                    pid = ?self.pid,
                    "Terminal read in flight; reader released when it returns"
                );
            }
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::warn!(pid = ?self.pid, error = %e, "Failed to kill shell on drop");
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reaps the child on a dedicated thread and publishes its exit status.
fn spawn_exit_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
) -> Result<watch::Receiver<Option<SessionStatus>>, SessionError> {
    let (exit_tx, exit_rx) = watch::channel(None);
    let mut killer = child.clone_killer();

    let spawned = std::thread::Builder::new()
        .name("pty-exit-waiter".to_string())
        .spawn(move || {
            let status = match child.wait() {
                Ok(status) => SessionStatus::Exited(status.exit_code()),
                Err(e) => {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to wait for shell");
                    SessionStatus::Unknown
                }
            };
            tracing::debug!(pid = ?pid, status = ?status, "Shell process exited");
            exit_tx.send_replace(Some(status));
        });

    if let Err(e) = spawned {
        let _ = killer.kill();
        return Err(SessionError::SpawnFailed(format!(
            "failed to start exit waiter: {}",
            e
        )));
    }

    Ok(exit_rx)
}
