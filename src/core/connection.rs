/// Backend TCP connections
///
/// A `BackendConnector` knows how to reach one backend host: it dials with a
/// timeout, tunes the socket and runs the `AUTH` handshake when the host
/// carries a password. Every pooled connection is produced by it.
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::session::BackendSession;
use crate::error::{CancelaError, CancelaResult};
use crate::protocol::RespEncoder;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One established backend transport connection
#[derive(Debug)]
pub struct BackendConnection {
    id: u64,
    addr: SocketAddr,
    stream: TcpStream,
}

/// Dials a single backend host
#[derive(Debug, Clone)]
pub struct BackendConnector {
    addr: SocketAddr,
    connect_timeout: Duration,
    password: Option<String>,
}

impl BackendConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl BackendConnector {
    pub fn new(addr: SocketAddr, connect_timeout: Duration, password: Option<String>) -> Self {
        Self {
            addr,
            connect_timeout,
            password,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Establish a new, authenticated connection
    pub async fn connect(&self) -> CancelaResult<BackendConnection> {
        let stream = self.dial().await?;
        let mut conn = BackendConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr: self.addr,
            stream,
        };
        self.authenticate(&mut conn.stream).await?;
        debug!("Connected to backend {} (conn {})", self.addr, conn.id);
        Ok(conn)
    }

    /// Close and re-establish `conn` in place, keeping its identity
    pub async fn reconnect(&self, conn: &mut BackendConnection) -> CancelaResult<()> {
        let mut stream = self.dial().await?;
        self.authenticate(&mut stream).await?;
        conn.stream = stream;
        debug!("Repaired backend connection {} to {}", conn.id, self.addr);
        Ok(())
    }

    async fn dial(&self) -> CancelaResult<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = configure_backend_stream(&stream) {
                    warn!("Failed to configure backend stream: {}", e);
                }
                Ok(stream)
            }
            Ok(Err(e)) => {
                debug!("Failed to connect to backend {}: {}", self.addr, e);
                Err(CancelaError::Network(e))
            }
            Err(_) => {
                debug!("Timeout connecting to backend {}", self.addr);
                Err(CancelaError::timeout(format!("connect to {}", self.addr)))
            }
        }
    }

    async fn authenticate(&self, stream: &mut TcpStream) -> CancelaResult<()> {
        let Some(password) = &self.password else {
            return Ok(());
        };

        let request = RespEncoder::encode_command(&[b"AUTH", password.as_bytes()]);
        let reply = BackendSession::new(stream).execute(&request).await?;
        if reply.as_ref() == b"+OK\r\n" {
            Ok(())
        } else {
            Err(CancelaError::auth(format!(
                "backend {} rejected AUTH: {}",
                self.addr,
                String::from_utf8_lossy(&reply).trim_end()
            )))
        }
    }
}

/// Configure backend stream for low latency and dead-peer detection
fn configure_backend_stream(stream: &TcpStream) -> Result<(), io::Error> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MockBackend;

    #[tokio::test]
    async fn test_backend_connection_success() {
        let backend = MockBackend::start().await;
        let connector = BackendConnector::new(backend.addr, Duration::from_secs(1), None);

        let conn = connector.connect().await.unwrap();
        assert_eq!(conn.addr(), backend.addr);
    }

    #[tokio::test]
    async fn test_backend_connection_refused() {
        let connector =
            BackendConnector::new("127.0.0.1:65534".parse().unwrap(), Duration::from_secs(1), None);

        let result = connector.connect().await;
        assert!(matches!(result, Err(CancelaError::Network(_))));
    }

    #[tokio::test]
    async fn test_backend_auth_handshake() {
        let backend = MockBackend::with_password("secret").await;

        let good = BackendConnector::new(backend.addr, Duration::from_secs(1), Some("secret".into()));
        let mut conn = good.connect().await.unwrap();
        let reply = BackendSession::new(conn.stream_mut())
            .execute(b"*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        assert_eq!(reply.as_ref(), b"+PONG\r\n");

        let bad = BackendConnector::new(backend.addr, Duration::from_secs(1), Some("wrong".into()));
        assert!(matches!(bad.connect().await, Err(CancelaError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_reconnect_keeps_identity() {
        let backend = MockBackend::start().await;
        let connector = BackendConnector::new(backend.addr, Duration::from_secs(1), None);

        let mut conn = connector.connect().await.unwrap();
        let id = conn.id();
        connector.reconnect(&mut conn).await.unwrap();
        assert_eq!(conn.id(), id);
    }
}
