/// Client accept loop
///
/// Each accepted connection gets its own task running a `ClientSession`.
/// The number of concurrent clients is capped; connections over the cap are
/// dropped as soon as they are accepted.
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::CancelaResult;
use crate::proxy::{ClientSession, Proxy};
use crate::utils::generate_id;

pub struct ProxyServer {
    listener: TcpListener,
    proxy: Arc<Proxy>,
    max_connections: usize,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, proxy: Arc<Proxy>, max_connections: usize) -> CancelaResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            proxy,
            max_connections,
        })
    }

    pub fn local_addr(&self) -> CancelaResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> CancelaResult<()>
    where
        F: Future<Output = ()>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        info!(
            "Proxy listening on {} (max {} connections)",
            self.local_addr()?,
            self.max_connections
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting clients");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Failed to accept client: {}", e);
                            continue;
                        }
                    };

                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Connection limit reached, dropping client {}", peer);
                            drop(stream);
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let id = generate_id("client");
                    debug!("Client {} connected from {}", id, peer);
                    let session = ClientSession::new(id, stream, Arc::clone(&self.proxy));
                    tokio::spawn(async move {
                        if let Err(e) = session.run().await {
                            if e.is_recoverable() {
                                debug!("Client {} session ended with error: {}", peer, e);
                            } else {
                                warn!("Client {} session failed: {}", peer, e);
                            }
                        }
                        drop(permit);
                    });
                }
            }
        }

        self.proxy.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::servant::{Servant, ServantOptions};
    use crate::core::testing::MockBackend;
    use crate::group::policy::PolicyKind;
    use crate::group::Group;
    use crate::health::{GroupHealthManager, HealthOptions};
    use crate::routing::hash::HashKind;
    use crate::routing::RoutingTable;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn proxy_for(backend: &MockBackend) -> Arc<Proxy> {
        let mut group = Group::new(0, "g0", 1, PolicyKind::MasterOnly);
        group.add_servant(Arc::new(Servant::new("m0", backend.addr, true, ServantOptions::default())));
        let group = Arc::new(group);
        group.set_enabled(true).await;

        let routing = Arc::new(RoutingTable::direct(HashKind::Bytes, vec![group], &[0, 0, 0, 0]));
        let health = Arc::new(GroupHealthManager::new(Arc::clone(&routing), HealthOptions::default()));
        Arc::new(Proxy::new(routing, health, None, None))
    }

    async fn read_reply(client: &mut TcpStream, expected: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        let backend = MockBackend::start().await;
        backend.set("greeting", "hello");
        let proxy = proxy_for(&backend).await;

        let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), proxy, 16)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$8\r\ngreeting\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        let expected = b"$5\r\nhello\r\n+OK\r\n";
        assert_eq!(read_reply(&mut client, expected).await, expected);
        assert_eq!(backend.get("k"), Some(b"v".to_vec()));

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client, b"+PONG\r\n").await, b"+PONG\r\n");

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let backend = MockBackend::start().await;
        let proxy = proxy_for(&backend).await;
        let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), proxy, 1)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut first, b"+PONG\r\n").await, b"+PONG\r\n");

        // Over the cap: accepted, then closed without a reply
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];
        let n = second.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();
    }
}
