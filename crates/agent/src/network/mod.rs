//! Network module for accepting host connections.
//!
//! The agent serves a single kind of connection, an ordered and reliable
//! byte stream, over one of three transports:
//! - vsock, the hypervisor socket used in production (Linux only)
//! - a unix domain socket, for local supervisors and tests
//! - TCP, for development

mod vsock;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

use crate::config::{ListenerConfig, Transport};

/// A bidirectional byte stream accepted from any transport.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An accepted connection with its transport erased.
pub type BoxedStream = Box<dyn ByteStream>;

/// Address of the remote end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// A vsock peer.
    Vsock {
        /// Context ID of the peer.
        cid: u32,
        /// Peer port.
        port: u32,
    },
    /// A unix socket peer; usually unnamed.
    Unix(Option<PathBuf>),
    /// A TCP peer.
    Tcp(std::net::SocketAddr),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Vsock { cid, port } => write!(f, "vsock:{}:{}", cid, port),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => write!(f, "unix:unnamed"),
            PeerAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// A bound listening endpoint.
pub enum Listener {
    /// vsock listener.
    Vsock(vsock::VsockListener),
    /// Unix socket listener and the path it owns.
    Unix {
        /// The listener.
        listener: UnixListener,
        /// Socket path, removed on drop.
        path: PathBuf,
    },
    /// TCP listener.
    Tcp(TcpListener),
}

impl Listener {
    /// Binds the transport selected in `config`.
    pub async fn bind(config: &ListenerConfig) -> io::Result<Self> {
        match config.transport {
            Transport::Vsock => Ok(Listener::Vsock(vsock::VsockListener::bind(
                config.cid,
                config.port,
            )?)),
            Transport::Unix => Self::bind_unix(&config.unix_path),
            Transport::Tcp => Ok(Listener::Tcp(TcpListener::bind(&config.tcp_address).await?)),
        }
    }

    /// Binds a unix socket at `path`.
    ///
    /// Missing parent directories are created and a stale socket file left
    /// by a previous run is replaced.
    pub fn bind_unix(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Listener::Unix {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Waits for the next connection.
    pub async fn accept(&self) -> io::Result<(BoxedStream, PeerAddr)> {
        match self {
            Listener::Vsock(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((stream, peer))
            }
            Listener::Unix { listener, .. } => {
                let (stream, addr) = listener.accept().await?;
                let peer = PeerAddr::Unix(addr.as_pathname().map(Path::to_path_buf));
                Ok((Box::new(stream), peer))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                Ok((Box::new(stream), PeerAddr::Tcp(addr)))
            }
        }
    }

    /// Human-readable local address, for the startup log.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Vsock(listener) => listener.local_addr(),
            Listener::Unix { path, .. } => Ok(format!("unix:{}", path.display())),
            Listener::Tcp(listener) => Ok(format!("tcp:{}", listener.local_addr()?)),
        }
    }

    /// The bound TCP address, if this is a TCP listener.
    pub fn tcp_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket");
                }
            }
        }
    }
}
