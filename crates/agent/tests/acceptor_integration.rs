//! Acceptor tests over real sockets.
//!
//! These tests verify:
//! - Sessions over TCP and unix sockets
//! - Independent concurrent sessions
//! - Graceful shutdown with live sessions

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{sh_config, TestClient, TEST_TIMEOUT};
use tempfile::TempDir;
use tokio::net::{TcpStream, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use vshell_agent::config::ListenerConfig;
use vshell_agent::{Acceptor, Listener, SessionConfig, Transport};

struct RunningAcceptor {
    acceptor: Arc<Acceptor>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningAcceptor {
    fn start(listener: Listener, config: SessionConfig) -> Self {
        let acceptor = Arc::new(Acceptor::new(listener, config));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let acceptor = Arc::clone(&acceptor);
            let shutdown = shutdown.clone();
            async move { acceptor.serve(shutdown).await }
        });

        Self {
            acceptor,
            shutdown,
            task,
        }
    }

    async fn wait_for_sessions(&self, count: usize) {
        let acceptor = Arc::clone(&self.acceptor);
        timeout(TEST_TIMEOUT, async move {
            while acceptor.active_sessions() != count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} active sessions", count));
    }

    async fn stop(self) {
        self.shutdown.cancel();
        timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("acceptor did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(self.acceptor.active_sessions(), 0);
    }
}

async fn tcp_acceptor() -> (RunningAcceptor, std::net::SocketAddr) {
    let config = ListenerConfig {
        transport: Transport::Tcp,
        tcp_address: "127.0.0.1:0".to_string(),
        ..ListenerConfig::default()
    };
    let listener = Listener::bind(&config).await.unwrap();
    let addr = listener.tcp_addr().unwrap();
    (RunningAcceptor::start(listener, sh_config()), addr)
}

// =============================================================================
// Transports
// =============================================================================

#[tokio::test]
async fn test_tcp_session() {
    let (running, addr) = tcp_acceptor().await;

    let mut client = TestClient::new(TcpStream::connect(addr).await.unwrap());
    client.send_input("echo $((6*7))_over_tcp\n").await;
    client.read_until("42_over_tcp").await;

    client.send_input("exit\n").await;
    client.read_to_end().await;

    running.wait_for_sessions(0).await;
    running.stop().await;
}

#[tokio::test]
async fn test_unix_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run").join("agent.sock");
    let config = ListenerConfig {
        transport: Transport::Unix,
        unix_path: path.clone(),
        ..ListenerConfig::default()
    };
    let listener = Listener::bind(&config).await.unwrap();
    let running = RunningAcceptor::start(listener, sh_config());

    let mut client = TestClient::new(UnixStream::connect(&path).await.unwrap());
    client.send_window_size(120, 40).await;
    client.send_input("stty size\n").await;
    client.read_until("40 120").await;

    client.send_input("exit\n").await;
    client.read_to_end().await;

    running.stop().await;
}

// =============================================================================
// Isolation and Shutdown
// =============================================================================

#[tokio::test]
async fn test_sessions_are_independent() {
    let (running, addr) = tcp_acceptor().await;

    let mut first = TestClient::new(TcpStream::connect(addr).await.unwrap());
    let mut second = TestClient::new(TcpStream::connect(addr).await.unwrap());
    running.wait_for_sessions(2).await;

    // Ending one session leaves the other usable.
    first.send_input("exit\n").await;
    first.read_to_end().await;
    running.wait_for_sessions(1).await;

    second.send_input("echo $((6*7))_still_here\n").await;
    second.read_until("42_still_here").await;

    running.stop().await;
    second.read_to_end().await;
}

#[tokio::test]
async fn test_failed_session_does_not_stop_acceptor() {
    let config = ListenerConfig {
        transport: Transport::Tcp,
        tcp_address: "127.0.0.1:0".to_string(),
        ..ListenerConfig::default()
    };
    let listener = Listener::bind(&config).await.unwrap();
    let addr = listener.tcp_addr().unwrap();
    let session_config = SessionConfig {
        shells: vec!["/nonexistent/vshell/sh".to_string()],
        ..sh_config()
    };
    let running = RunningAcceptor::start(listener, session_config);

    for _ in 0..2 {
        let mut client = TestClient::new(TcpStream::connect(addr).await.unwrap());
        let frames = client.read_to_end().await;
        assert_eq!(frames.len(), 1);
    }

    assert!(!running.task.is_finished());
    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let (running, addr) = tcp_acceptor().await;

    let mut client = TestClient::new(TcpStream::connect(addr).await.unwrap());
    client.send_input("echo $((6*7))_ready\n").await;
    client.read_until("42_ready").await;

    running.stop().await;
    client.read_to_end().await;
}
