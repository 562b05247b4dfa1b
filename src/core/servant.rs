/// A single backend host inside a group
///
/// The servant owns the host's connection pool, an active flag driven by
/// the watchdog in `health::monitor`, and a FIFO of requests waiting for a
/// connection while the pool is exhausted.
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::connection::{BackendConnection, BackendConnector};
use crate::core::pool::{ConnectionPool, PoolStats};
use crate::core::session::BackendSession;
use crate::error::{CancelaError, CancelaResult};
use crate::health::monitor;

/// Per-servant tuning taken from configuration
#[derive(Debug, Clone)]
pub struct ServantOptions {
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub password: Option<String>,
    pub retry_interval: Duration,
    pub retry_limit: u32,
    pub backend_timeout: Option<Duration>,
}

impl Default for ServantOptions {
    fn default() -> Self {
        Self {
            pool_size: 50,
            connect_timeout: Duration::from_secs(1),
            password: None,
            retry_interval: Duration::from_secs(1),
            retry_limit: 100,
            backend_timeout: None,
        }
    }
}

pub struct Servant {
    name: String,
    addr: SocketAddr,
    master: bool,
    pool: ConnectionPool,
    active: AtomicBool,
    reconnects: AtomicU32,
    pending: Mutex<VecDeque<oneshot::Sender<BackendConnection>>>,
    options: ServantOptions,
    generation: watch::Sender<u64>,
}

impl Servant {
    pub fn new(name: impl Into<String>, addr: SocketAddr, master: bool, options: ServantOptions) -> Self {
        let connector = BackendConnector::new(addr, options.connect_timeout, options.password.clone());
        let (generation, _) = watch::channel(0);
        Self {
            name: name.into(),
            addr,
            master,
            pool: ConnectionPool::new(connector, options.pool_size),
            active: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            pending: Mutex::new(VecDeque::new()),
            options,
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn mark_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn options(&self) -> &ServantOptions {
        &self.options
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnects.store(attempts, Ordering::Relaxed);
    }

    /// Receiver that fires when the servant is stopped
    pub(crate) fn subscribe_stop(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Open the pool and the watch connection, then mark the servant active.
    ///
    /// Boxed because the watchdog spawned here may call back into `start`
    /// when it reconnects.
    pub fn start(self: &Arc<Self>) -> BoxFuture<'static, CancelaResult<()>> {
        let servant = Arc::clone(self);
        async move {
            servant.pool.open().await?;
            let watch_conn = match servant.pool.connector().connect().await {
                Ok(conn) => conn,
                Err(e) => {
                    servant.pool.close();
                    return Err(e);
                }
            };

            let stop = servant.subscribe_stop();
            servant.set_reconnect_attempts(0);
            servant.mark_active(true);
            tokio::spawn(monitor::watch(Arc::clone(&servant), watch_conn, stop));

            info!("Servant {} ({}) started", servant.name, servant.addr);
            Ok(())
        }
        .boxed()
    }

    /// Mark inactive, close the pool and fail every queued request.
    /// Cancels the watchdog and any reconnect loop.
    pub fn stop(&self) {
        self.shutdown();
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Stop serving without cancelling the reconnect machinery
    pub(crate) fn shutdown(&self) {
        self.mark_active(false);
        self.pool.close();
        let waiters: Vec<_> = self.pending.lock().drain(..).collect();
        if !waiters.is_empty() {
            debug!(
                "Servant {} failed {} queued requests",
                self.name,
                waiters.len()
            );
        }
    }

    /// Forward one request and return the raw backend reply.
    ///
    /// The round trip runs in its own task so a vanished client can never
    /// strand a checked-out connection.
    pub async fn execute(self: &Arc<Self>, request: Bytes) -> CancelaResult<Bytes> {
        let servant = Arc::clone(self);
        match tokio::spawn(async move { servant.round_trip(request).await }).await {
            Ok(result) => result,
            Err(e) => Err(CancelaError::internal(format!("backend task failed: {}", e))),
        }
    }

    async fn round_trip(self: Arc<Self>, request: Bytes) -> CancelaResult<Bytes> {
        let mut conn = self.checkout().await?;

        let exchange = BackendSession::new(conn.stream_mut()).execute(&request);
        let outcome = match self.options.backend_timeout {
            Some(deadline) => match timeout(deadline, exchange).await {
                Ok(result) => result,
                Err(_) => Err(CancelaError::timeout(format!("backend {}", self.addr))),
            },
            None => exchange.await,
        };

        match outcome {
            Ok(reply) => {
                self.complete(conn);
                Ok(reply)
            }
            Err(e) => {
                warn!("Request to servant {} failed: {}", self.name, e);
                self.recover(conn).await;
                Err(e)
            }
        }
    }

    /// Get a connection from the pool, queueing when it is exhausted
    async fn checkout(&self) -> CancelaResult<BackendConnection> {
        loop {
            if !self.is_active() {
                return Err(self.unavailable());
            }
            if let Some(conn) = self.pool.acquire().await? {
                return Ok(conn);
            }

            let waiter = {
                let mut pending = self.pending.lock();
                if let Some(conn) = self.pool.try_take_idle() {
                    return Ok(conn);
                }
                if self.pool.has_capacity() {
                    continue;
                }
                if !self.is_active() {
                    return Err(self.unavailable());
                }
                let (tx, rx) = oneshot::channel();
                pending.push_back(tx);
                rx
            };

            return waiter.await.map_err(|_| self.unavailable());
        }
    }

    /// Hand a healthy connection to the oldest waiter, else back to the pool
    fn complete(&self, conn: BackendConnection) {
        let mut pending = self.pending.lock();
        let mut conn = conn;
        while let Some(waiter) = pending.pop_front() {
            match waiter.send(conn) {
                Ok(()) => return,
                Err(returned) => conn = returned,
            }
        }
        self.pool.release(conn);
    }

    /// Repair a failed connection in place, or discard it
    async fn recover(self: &Arc<Self>, mut conn: BackendConnection) {
        match self.pool.repair(&mut conn).await {
            Ok(()) => self.complete(conn),
            Err(e) => {
                debug!("Could not repair connection to {}: {}", self.addr, e);
                let has_waiters = {
                    let pending = self.pending.lock();
                    self.pool.discard(conn);
                    !pending.is_empty()
                };
                if has_waiters {
                    self.refill();
                }
            }
        }
    }

    /// Dial a replacement connection for the oldest waiter
    fn refill(self: &Arc<Self>) {
        let servant = Arc::clone(self);
        tokio::spawn(async move {
            match servant.pool.acquire().await {
                Ok(Some(conn)) => servant.complete(conn),
                Ok(None) => {}
                Err(e) => {
                    debug!("Refill for servant {} failed: {}", servant.name, e);
                    servant.pending.lock().pop_front();
                }
            }
        });
    }

    fn unavailable(&self) -> CancelaError {
        CancelaError::backend(format!("servant {} ({}) unavailable", self.name, self.addr))
    }
}

impl std::fmt::Debug for Servant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Servant")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("master", &self.master)
            .field("active", &self.is_active())
            .finish()
    }
}
