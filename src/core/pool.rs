/// Per-servant backend connection pool
///
/// Capacity is enforced over `active + idle`. Connections are created lazily
/// on `acquire` and are owned either by the pool or by exactly one caller.
use parking_lot::Mutex;
use std::mem;
use tracing::{debug, info};

use crate::core::connection::{BackendConnection, BackendConnector};
use crate::error::{CancelaError, CancelaResult};

/// Bounded pool of connections to one backend host
#[derive(Debug)]
pub struct ConnectionPool {
    connector: BackendConnector,
    capacity: usize,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<BackendConnection>,
    active: usize,
    open: bool,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub capacity: usize,
}

/// A reserved slot for a connection being established. Dropping it before
/// `commit` hands the capacity back.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut state = self.pool.state.lock();
            state.active = state.active.saturating_sub(1);
        }
    }
}

impl ConnectionPool {
    pub fn new(connector: BackendConnector, capacity: usize) -> Self {
        Self {
            connector,
            capacity,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn connector(&self) -> &BackendConnector {
        &self.connector
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open the pool with one verified connection
    pub async fn open(&self) -> CancelaResult<()> {
        let conn = self.connector.connect().await?;
        let mut state = self.state.lock();
        state.open = true;
        if state.active + state.idle.len() < self.capacity {
            state.idle.push(conn);
        }
        info!(
            "Connection pool to {} opened (capacity {})",
            self.connector.addr(),
            self.capacity
        );
        Ok(())
    }

    /// Close the pool, dropping idle connections. Connections still checked
    /// out are dropped when they come back.
    pub fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.open = false;
            mem::take(&mut state.idle)
        };
        debug!(
            "Connection pool to {} closed, {} idle connections dropped",
            self.connector.addr(),
            drained.len()
        );
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Check out a connection.
    ///
    /// Returns `Ok(None)` when the pool is at capacity; the caller must
    /// queue. A failed connect is reported to the caller, no retry here.
    pub async fn acquire(&self) -> CancelaResult<Option<BackendConnection>> {
        let reservation = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(CancelaError::backend(format!(
                    "pool to {} is closed",
                    self.connector.addr()
                )));
            }
            if let Some(conn) = state.idle.pop() {
                state.active += 1;
                return Ok(Some(conn));
            }
            if state.active + state.idle.len() >= self.capacity {
                return Ok(None);
            }
            state.active += 1;
            Reservation {
                pool: self,
                committed: false,
            }
        };

        let conn = self.connector.connect().await?;
        reservation.commit();
        Ok(Some(conn))
    }

    /// Take an idle connection without dialing
    pub fn try_take_idle(&self) -> Option<BackendConnection> {
        let mut state = self.state.lock();
        if !state.open {
            return None;
        }
        let conn = state.idle.pop()?;
        state.active += 1;
        Some(conn)
    }

    /// True when `acquire` could dial a new connection right now
    pub fn has_capacity(&self) -> bool {
        let state = self.state.lock();
        state.open && state.active + state.idle.len() < self.capacity
    }

    /// Return a checked-out connection
    pub fn release(&self, conn: BackendConnection) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.open && state.active + state.idle.len() < self.capacity {
            state.idle.push(conn);
        }
    }

    /// Re-establish a checked-out connection in place
    pub async fn repair(&self, conn: &mut BackendConnection) -> CancelaResult<()> {
        self.connector.reconnect(conn).await
    }

    /// Destroy a checked-out connection, freeing its capacity
    pub fn discard(&self, conn: BackendConnection) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        debug!("Discarded backend connection {} to {}", conn.id(), conn.addr());
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            capacity: self.capacity,
        }
    }
}
