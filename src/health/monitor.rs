/// Servant disconnect watchdog and reconnect loop
///
/// Each started servant keeps one dedicated connection that carries no
/// traffic. A read on it only completes when the backend closes the socket
/// or the link breaks, which is how a dead backend is noticed.
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::connection::BackendConnection;
use crate::core::servant::Servant;
use crate::utils::format_duration;

/// Outcome of watching a servant's backend link
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Unhealthy { reason: String },
    Cancelled,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Watch the servant's link until it breaks or the servant is stopped.
/// On a break the servant is shut down and the reconnect loop takes over.
pub async fn watch(servant: Arc<Servant>, conn: BackendConnection, stop: watch::Receiver<u64>) {
    let mut stop = stop;
    let status = watch_link(conn, &mut stop).await;

    match status {
        HealthStatus::Cancelled => {
            debug!("Watchdog for servant {} cancelled", servant.name());
        }
        status => {
            warn!(
                "Servant {} ({}) disconnected: {}",
                servant.name(),
                servant.addr(),
                status
            );
            servant.shutdown();
            reconnect(servant, stop).await;
        }
    }
}

async fn watch_link(mut conn: BackendConnection, stop: &mut watch::Receiver<u64>) -> HealthStatus {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = stop.changed() => return HealthStatus::Cancelled,
            read = conn.stream_mut().read(&mut buf) => match read {
                Ok(0) => {
                    return HealthStatus::Unhealthy {
                        reason: "connection closed by backend".to_string(),
                    }
                }
                Ok(n) => debug!("Ignoring {} unsolicited bytes on watch connection", n),
                Err(e) => {
                    return HealthStatus::Unhealthy {
                        reason: e.to_string(),
                    }
                }
            },
        }
    }
}

/// Keep retrying a servant whose first start failed
pub fn spawn_reconnect(servant: &Arc<Servant>) -> JoinHandle<()> {
    let stop = servant.subscribe_stop();
    tokio::spawn(reconnect(Arc::clone(servant), stop))
}

/// Retry `start` every retry interval until it succeeds, the attempt limit
/// is reached, or the servant is stopped explicitly.
async fn reconnect(servant: Arc<Servant>, mut stop: watch::Receiver<u64>) {
    let interval = servant.options().retry_interval;
    let limit = servant.options().retry_limit;

    while servant.reconnect_attempts() < limit {
        tokio::select! {
            _ = stop.changed() => {
                debug!("Reconnect loop for servant {} cancelled", servant.name());
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let attempt = servant.reconnect_attempts() + 1;
        servant.set_reconnect_attempts(attempt);
        match servant.start().await {
            Ok(()) => {
                info!(
                    "Servant {} reconnected after {} attempts",
                    servant.name(),
                    attempt
                );
                return;
            }
            Err(e) => debug!(
                "Reconnect attempt {}/{} for servant {} failed: {}",
                attempt,
                limit,
                servant.name(),
                e
            ),
        }
    }

    error!(
        "Giving up on servant {} after {} attempts ({} apart)",
        servant.name(),
        limit,
        format_duration(interval)
    );
}
