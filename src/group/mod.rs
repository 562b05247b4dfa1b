/// Shard groups: one or more masters plus replicas, selected as a unit
pub mod policy;

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::servant::Servant;
use crate::health::monitor;
use policy::{PolicyKind, SelectionPolicy};

pub struct Group {
    id: usize,
    name: String,
    weight: u32,
    kind: PolicyKind,
    policy: Box<dyn SelectionPolicy>,
    masters: Vec<Arc<Servant>>,
    slaves: Vec<Arc<Servant>>,
}

impl Group {
    pub fn new(id: usize, name: impl Into<String>, weight: u32, kind: PolicyKind) -> Self {
        Self {
            id,
            name: name.into(),
            weight,
            kind,
            policy: kind.build(),
            masters: Vec::new(),
            slaves: Vec::new(),
        }
    }

    /// Add a servant at startup, before the group is shared
    pub fn add_servant(&mut self, servant: Arc<Servant>) {
        if servant.is_master() {
            self.masters.push(servant);
        } else {
            self.slaves.push(servant);
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn policy(&self) -> PolicyKind {
        self.kind
    }

    pub fn masters(&self) -> &[Arc<Servant>] {
        &self.masters
    }

    pub fn slaves(&self) -> &[Arc<Servant>] {
        &self.slaves
    }

    /// Masters first, then replicas
    pub fn servants(&self) -> impl Iterator<Item = &Arc<Servant>> {
        self.masters.iter().chain(self.slaves.iter())
    }

    /// A group is enabled while any of its servants is active
    pub fn is_enabled(&self) -> bool {
        self.servants().any(|s| s.is_active())
    }

    /// Pick a servant for a request under the group's policy
    pub fn select_servant(&self, mutating: bool) -> Option<Arc<Servant>> {
        self.policy.select(&self.masters, &self.slaves, mutating)
    }

    /// Start every inactive servant, or stop every servant
    pub async fn set_enabled(&self, enabled: bool) {
        if !enabled {
            for servant in self.servants() {
                servant.stop();
            }
            info!("Group {} disabled", self.name);
            return;
        }

        let starting: Vec<_> = self.servants().filter(|s| !s.is_active()).collect();
        let results = join_all(starting.iter().map(|s| s.start())).await;
        for (servant, result) in starting.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "Group {}: servant {} ({}) failed to start: {}",
                    self.name,
                    servant.name(),
                    servant.addr(),
                    e
                );
                monitor::spawn_reconnect(servant);
            }
        }
        info!(
            "Group {} started, enabled={}",
            self.name,
            self.is_enabled()
        );
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.kind)
            .field("masters", &self.masters)
            .field("slaves", &self.slaves)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::servant::ServantOptions;
    use crate::core::testing::MockBackend;

    fn servant(name: &str, addr: std::net::SocketAddr, master: bool) -> Arc<Servant> {
        Arc::new(Servant::new(name, addr, master, ServantOptions::default()))
    }

    #[test]
    fn test_group_enabled_tracks_servants() {
        let addr = "127.0.0.1:6379".parse().unwrap();
        let mut group = Group::new(0, "g0", 1, PolicyKind::MasterOnly);
        let master = servant("m0", addr, true);
        let slave = servant("s0", addr, false);
        group.add_servant(Arc::clone(&master));
        group.add_servant(Arc::clone(&slave));

        assert_eq!(group.masters().len(), 1);
        assert_eq!(group.slaves().len(), 1);
        assert!(!group.is_enabled());

        slave.mark_active(true);
        assert!(group.is_enabled());
        assert_eq!(group.select_servant(false).unwrap().name(), "s0");
    }

    #[tokio::test]
    async fn test_set_enabled_starts_and_stops() {
        let backend = MockBackend::start().await;
        let mut group = Group::new(0, "g0", 1, PolicyKind::ReadBalance);
        group.add_servant(servant("m0", backend.addr, true));
        group.add_servant(servant("dead", "127.0.0.1:65534".parse().unwrap(), false));

        group.set_enabled(true).await;
        assert!(group.is_enabled());
        assert!(group.masters()[0].is_active());
        assert!(!group.slaves()[0].is_active());

        group.set_enabled(false).await;
        assert!(!group.is_enabled());
    }
}
