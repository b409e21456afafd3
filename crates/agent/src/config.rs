//! Configuration management for the vshell agent.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/vshell/agent.toml`; a missing
//! file means "all defaults".

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vshell_protocol::{FrameCodec, MAX_PAYLOAD_SIZE};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("shells must list at least one candidate shell")]
    EmptyShellList,

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("read_buffer_size must be between 1 and {max} bytes, got {got}")]
    InvalidReadBufferSize { got: usize, max: usize },

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("kill_signal is not a known signal: {0}")]
    InvalidKillSignal(String),

    #[error("transport must be one of: vsock, unix, tcp; got {0}")]
    InvalidTransport(String),

    #[error("tcp_address is not a valid socket address: {0}")]
    InvalidTcpAddress(String),

    #[error("unix_path must not be empty when the unix transport is selected")]
    InvalidUnixPath,

    #[error("vsock port must be non-zero")]
    InvalidPort,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the terminal read buffer.
const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default vsock port the agent listens on.
pub const DEFAULT_VSOCK_PORT: u32 = 514;

/// Wildcard vsock context id (`VMADDR_CID_ANY`).
pub const VSOCK_CID_ANY: u32 = u32::MAX;

/// Main configuration structure for the vshell agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General agent configuration.
    pub agent: AgentConfig,

    /// Listening transport configuration.
    pub listener: ListenerConfig,

    /// Per-connection shell session configuration.
    pub session: SessionConfig,
}

/// General agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// The socket family the agent listens on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// `AF_VSOCK`, the hypervisor socket transport.
    Vsock,
    /// A unix domain socket.
    Unix,
    /// Plain TCP, for development.
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Vsock => "vsock",
            Transport::Unix => "unix",
            Transport::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vsock" => Ok(Transport::Vsock),
            "unix" => Ok(Transport::Unix),
            "tcp" => Ok(Transport::Tcp),
            _ => Err(ConfigError::InvalidTransport(s.to_string())),
        }
    }
}

/// Listening transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Which transport to listen on.
    pub transport: Transport,

    /// vsock port.
    pub port: u32,

    /// vsock context id to bind (defaults to any).
    pub cid: u32,

    /// Socket path for the unix transport.
    pub unix_path: PathBuf,

    /// `host:port` for the tcp transport.
    pub tcp_address: String,
}

/// Shell session configuration.
///
/// Handed to [`crate::session::TerminalSession::start`] for every accepted
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Candidate shells, tried in order until one starts.
    pub shells: Vec<String>,

    /// Flag passed to make the shell a login shell. Empty disables it.
    pub login_flag: String,

    /// Value of `TERM` for the shell.
    pub term: String,

    /// Value of `SSH_TTY` for the shell.
    pub ssh_tty: String,

    /// If this directory exists, its scripts run before the interactive shell.
    pub motd_dir: PathBuf,

    /// Program used to run the scripts in `motd_dir`.
    pub motd_runner: String,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Size of each terminal read, and so the largest outbound data frame.
    pub read_buffer_size: usize,

    /// Signal used to terminate the shell on teardown.
    pub kill_signal: String,

    /// Largest inbound frame payload accepted before the session is dropped.
    pub max_frame_payload: u32,

    /// Extra environment variables for the shell.
    pub env: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Vsock,
            port: DEFAULT_VSOCK_PORT,
            cid: VSOCK_CID_ANY,
            unix_path: PathBuf::from("/run/vshell/agent.sock"),
            tcp_address: "127.0.0.1:5140".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shells: vec![
                "/bin/bash".to_string(),
                "/bin/sh".to_string(),
                "/usr/bin/sh".to_string(),
            ],
            login_flag: "--login".to_string(),
            term: "xterm-256color".to_string(),
            ssh_tty: "/dev/pts/0".to_string(),
            motd_dir: PathBuf::from("/etc/update-motd.d"),
            motd_runner: "/usr/bin/run-parts".to_string(),
            cols: 80,
            rows: 24,
            read_buffer_size: 32 * 1024,
            kill_signal: "SIGKILL".to_string(),
            max_frame_payload: u32::MAX,
            env: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// The login flag, if one is configured.
    pub fn login_flag(&self) -> Option<&str> {
        let flag = self.login_flag.trim();
        (!flag.is_empty()).then_some(flag)
    }

    /// The parsed teardown signal.
    pub fn kill_signal(&self) -> Result<Signal, ConfigError> {
        parse_signal(&self.kill_signal)
    }

    /// Frame codec honoring `max_frame_payload`.
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::with_max_payload((self.max_frame_payload as usize).min(MAX_PAYLOAD_SIZE))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vshell")
        .join("agent.toml")
}

/// Parse a signal string into a signal.
///
/// Accepts numeric signals ("9", "15") and names with or without the `SIG`
/// prefix ("SIGKILL", "term").
pub fn parse_signal(signal_str: &str) -> Result<Signal, ConfigError> {
    let invalid = || ConfigError::InvalidKillSignal(signal_str.to_string());
    let trimmed = signal_str.trim();

    if let Ok(num) = trimmed.parse::<i32>() {
        return Signal::try_from(num).map_err(|_| invalid());
    }

    let name = trimmed.to_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{}", name)
    };

    Signal::from_str(&name).map_err(|_| invalid())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - VSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - VSHELL_TRANSPORT: Override transport (vsock, unix, tcp)
    /// - VSHELL_PORT: Override vsock port
    /// - VSHELL_SHELLS: Override candidate shells (colon-separated)
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = non_empty_env("VSHELL_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.agent.log_level = level;
        }

        if let Some(transport) = non_empty_env("VSHELL_TRANSPORT") {
            match transport.parse::<Transport>() {
                Ok(transport) => {
                    tracing::info!("Overriding transport from environment: {}", transport);
                    self.listener.transport = transport;
                }
                Err(e) => tracing::warn!("Ignoring VSHELL_TRANSPORT: {}", e),
            }
        }

        if let Some(port) = non_empty_env("VSHELL_PORT") {
            match port.parse::<u32>() {
                Ok(port) => {
                    tracing::info!("Overriding vsock port from environment: {}", port);
                    self.listener.port = port;
                }
                Err(e) => tracing::warn!("Ignoring VSHELL_PORT={}: {}", port, e),
            }
        }

        if let Some(shells) = non_empty_env("VSHELL_SHELLS") {
            let shells: Vec<String> = shells
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !shells.is_empty() {
                tracing::info!("Overriding shells from environment: {:?}", shells);
                self.session.shells = shells;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Candidate shells are not required to exist: the session falls back
    /// through the list at connection time. A warning is logged when none of
    /// them can be found right now.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.shells.is_empty() {
            return Err(ConfigError::EmptyShellList);
        }

        if session.cols == 0 || session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: session.cols,
                rows: session.rows,
            });
        }

        if session.read_buffer_size == 0 || session.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::InvalidReadBufferSize {
                got: session.read_buffer_size,
                max: MAX_READ_BUFFER_SIZE,
            });
        }

        session.kill_signal()?;

        let level = self.agent.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.agent.log_level.clone()));
        }

        match self.listener.transport {
            Transport::Vsock => {
                if self.listener.port == 0 {
                    return Err(ConfigError::InvalidPort);
                }
            }
            Transport::Unix => {
                if self.listener.unix_path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidUnixPath);
                }
            }
            Transport::Tcp => {
                if self.listener.tcp_address.parse::<SocketAddr>().is_err() {
                    return Err(ConfigError::InvalidTcpAddress(
                        self.listener.tcp_address.clone(),
                    ));
                }
            }
        }

        if !session.shells.iter().any(|shell| which::which(shell).is_ok()) {
            tracing::warn!(
                shells = ?session.shells,
                "None of the configured shells can be found; sessions will fail to start"
            );
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
