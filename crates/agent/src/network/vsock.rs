//! vsock transport.
//!
//! `AF_VSOCK` only exists on Linux. Elsewhere binding fails with
//! [`io::ErrorKind::Unsupported`] so the other transports keep working.

use std::io;

use super::{BoxedStream, PeerAddr};

#[cfg(target_os = "linux")]
pub struct VsockListener {
    inner: tokio_vsock::VsockListener,
}

#[cfg(target_os = "linux")]
impl VsockListener {
    pub fn bind(cid: u32, port: u32) -> io::Result<Self> {
        let inner = tokio_vsock::VsockListener::bind(tokio_vsock::VsockAddr::new(cid, port))?;
        Ok(Self { inner })
    }

    pub async fn accept(&self) -> io::Result<(BoxedStream, PeerAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        let peer = PeerAddr::Vsock {
            cid: addr.cid(),
            port: addr.port(),
        };
        Ok((Box::new(stream), peer))
    }

    pub fn local_addr(&self) -> io::Result<String> {
        let addr = self.inner.local_addr()?;
        Ok(format!("vsock:{}:{}", addr.cid(), addr.port()))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct VsockListener {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl VsockListener {
    pub fn bind(_cid: u32, _port: u32) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on Linux",
        ))
    }

    pub async fn accept(&self) -> io::Result<(BoxedStream, PeerAddr)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on Linux",
        ))
    }

    pub fn local_addr(&self) -> io::Result<String> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on Linux",
        ))
    }
}
