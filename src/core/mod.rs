/// Backend plumbing: connections, pools, servants and request round trips
pub mod connection;
pub mod pool;
pub mod servant;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{BackendConnection, BackendConnector};
pub use pool::{ConnectionPool, PoolStats};
pub use servant::{Servant, ServantOptions};
pub use session::BackendSession;
