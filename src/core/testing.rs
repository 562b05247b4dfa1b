/// In-process RESP backend for tests
///
/// Understands PING, AUTH, GET, SET and DEL against an in-memory map. Keys
/// starting with `slow:` are answered after a short delay so tests can force
/// out-of-order completion.
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::protocol::{RespEncoder, RespParser};

pub struct MockBackend {
    pub addr: SocketAddr,
    store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    shutdown: watch::Sender<bool>,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap(), None).await
    }

    pub async fn with_password(password: &str) -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap(), Some(password.to_string())).await
    }

    /// Bind a fresh backend on a specific address
    pub async fn start_on(addr: SocketAddr) -> Self {
        Self::bind(addr, None).await
    }

    async fn bind(addr: SocketAddr, password: Option<String>) -> Self {
        // A killed backend releases its port asynchronously
        let mut listener = TcpListener::bind(addr).await;
        for _ in 0..50 {
            if listener.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            listener = TcpListener::bind(addr).await;
        }
        let listener = listener.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, _) = watch::channel(false);

        let accept_store = Arc::clone(&store);
        let mut accept_shutdown = shutdown.subscribe();
        let conn_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let store = Arc::clone(&accept_store);
                        let password = password.clone();
                        let shutdown = conn_shutdown.subscribe();
                        tokio::spawn(serve(stream, store, password, shutdown));
                    }
                }
            }
        });

        Self {
            addr,
            store,
            shutdown,
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.store
            .lock()
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().get(key.as_bytes()).cloned()
    }

    /// Stop listening and close every open connection
    pub fn kill(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn serve(
    mut stream: TcpStream,
    store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    password: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending = BytesMut::new();
    let mut authed = password.is_none();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            read = stream.read_buf(&mut pending) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        }

        loop {
            let buf: Bytes = pending.clone().freeze();
            let Ok(Some((msg, consumed))) = RespParser::parse(&buf) else {
                break;
            };
            let _ = pending.split_to(consumed);

            let command = msg
                .token(0)
                .map(|t| t.to_ascii_uppercase())
                .unwrap_or_default();
            let key = msg.token(1).unwrap_or_default().to_vec();

            if key.starts_with(b"slow:") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            let reply: Bytes = match (command.as_slice(), authed) {
                (b"AUTH", _) => {
                    if password.as_deref().map(str::as_bytes) == msg.token(1) {
                        authed = true;
                        Bytes::from_static(b"+OK\r\n")
                    } else {
                        Bytes::from_static(b"-ERR invalid password\r\n")
                    }
                }
                (_, false) => Bytes::from_static(b"-NOAUTH Authentication required.\r\n"),
                (b"PING", _) => Bytes::from_static(b"+PONG\r\n"),
                (b"GET", _) => match store.lock().get(&key) {
                    Some(value) => {
                        let mut out = BytesMut::new();
                        RespEncoder::bulk_into(&mut out, value);
                        out.freeze()
                    }
                    None => Bytes::from_static(b"$-1\r\n"),
                },
                (b"SET", _) => {
                    let value = msg.token(2).unwrap_or_default().to_vec();
                    store.lock().insert(key, value);
                    Bytes::from_static(b"+OK\r\n")
                }
                (b"DEL", _) => {
                    let removed = store.lock().remove(&key).is_some();
                    Bytes::from(if removed { ":1\r\n" } else { ":0\r\n" })
                }
                _ => Bytes::from_static(b"-ERR unknown command\r\n"),
            };

            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}
