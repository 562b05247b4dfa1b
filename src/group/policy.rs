/// Servant selection policies
///
/// Selection never blocks: it walks the targeted list once from a
/// round-robin cursor, skipping inactive servants, then tries the other
/// list once before giving up.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::servant::Servant;

/// Policy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    MasterOnly,
    ReadBalance,
}

impl PolicyKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "master_only" => Some(PolicyKind::MasterOnly),
            "read_balance" => Some(PolicyKind::ReadBalance),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::MasterOnly => "master_only",
            PolicyKind::ReadBalance => "read_balance",
        }
    }

    pub fn build(&self) -> Box<dyn SelectionPolicy> {
        match self {
            PolicyKind::MasterOnly => Box::new(MasterOnly::new()),
            PolicyKind::ReadBalance => Box::new(ReadBalance::new()),
        }
    }
}

/// Servant selection algorithm trait
pub trait SelectionPolicy: Send + Sync {
    /// Pick a servant for a request; `mutating` marks write commands
    fn select(&self, masters: &[Arc<Servant>], slaves: &[Arc<Servant>], mutating: bool)
        -> Option<Arc<Servant>>;
}

/// Independent round-robin cursors for the master and replica lists
#[derive(Debug, Default)]
pub struct ServantSelect {
    master_cursor: AtomicUsize,
    slave_cursor: AtomicUsize,
}

impl ServantSelect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active master, falling back to an active replica
    pub fn select_master(&self, masters: &[Arc<Servant>], slaves: &[Arc<Servant>]) -> Option<Arc<Servant>> {
        round_robin(masters, &self.master_cursor).or_else(|| round_robin(slaves, &self.slave_cursor))
    }

    /// Active replica, falling back to an active master
    pub fn select_slave(&self, masters: &[Arc<Servant>], slaves: &[Arc<Servant>]) -> Option<Arc<Servant>> {
        round_robin(slaves, &self.slave_cursor).or_else(|| round_robin(masters, &self.master_cursor))
    }
}

fn round_robin(servants: &[Arc<Servant>], cursor: &AtomicUsize) -> Option<Arc<Servant>> {
    if servants.is_empty() {
        return None;
    }

    let start = cursor.fetch_add(1, Ordering::Relaxed);
    (0..servants.len())
        .map(|offset| &servants[start.wrapping_add(offset) % servants.len()])
        .find(|servant| servant.is_active())
        .cloned()
}

/// Every request goes to a master
#[derive(Debug, Default)]
pub struct MasterOnly {
    select: ServantSelect,
}

impl MasterOnly {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for MasterOnly {
    fn select(&self, masters: &[Arc<Servant>], slaves: &[Arc<Servant>], _mutating: bool) -> Option<Arc<Servant>> {
        self.select.select_master(masters, slaves)
    }
}

/// Writes go to a master; reads alternate between master and replica
#[derive(Debug, Default)]
pub struct ReadBalance {
    select: ServantSelect,
    reads: AtomicUsize,
}

impl ReadBalance {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for ReadBalance {
    fn select(&self, masters: &[Arc<Servant>], slaves: &[Arc<Servant>], mutating: bool) -> Option<Arc<Servant>> {
        if mutating {
            return self.select.select_master(masters, slaves);
        }

        let call = self.reads.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if call % 2 == 0 {
            self.select.select_slave(masters, slaves)
        } else {
            self.select.select_master(masters, slaves)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::servant::ServantOptions;

    fn servant(name: &str, master: bool, active: bool) -> Arc<Servant> {
        let servant = Servant::new(name, "127.0.0.1:6379".parse().unwrap(), master, ServantOptions::default());
        servant.mark_active(active);
        Arc::new(servant)
    }

    fn names(picks: Vec<Option<Arc<Servant>>>) -> Vec<String> {
        picks
            .into_iter()
            .map(|s| s.map(|s| s.name().to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(PolicyKind::from_name("master_only"), Some(PolicyKind::MasterOnly));
        assert_eq!(PolicyKind::from_name("read_balance"), Some(PolicyKind::ReadBalance));
        assert_eq!(PolicyKind::from_name("random"), None);
        assert_eq!(PolicyKind::ReadBalance.name(), "read_balance");
    }

    #[test]
    fn test_master_only_round_robin_skips_inactive() {
        let masters = vec![servant("m0", true, true), servant("m1", true, false), servant("m2", true, true)];
        let policy = MasterOnly::new();

        let picks = (0..4).map(|_| policy.select(&masters, &[], false)).collect();
        assert_eq!(names(picks), vec!["m0", "m2", "m2", "m0"]);
    }

    #[test]
    fn test_master_only_falls_back_to_replica() {
        let masters = vec![servant("m0", true, false)];
        let slaves = vec![servant("s0", false, true)];
        let policy = MasterOnly::new();

        let picked = policy.select(&masters, &slaves, true).unwrap();
        assert_eq!(picked.name(), "s0");
    }

    #[test]
    fn test_nothing_active_returns_none() {
        let masters = vec![servant("m0", true, false)];
        let slaves = vec![servant("s0", false, false)];

        assert!(MasterOnly::new().select(&masters, &slaves, false).is_none());
        assert!(ReadBalance::new().select(&masters, &slaves, false).is_none());
        assert!(MasterOnly::new().select(&[], &[], false).is_none());
    }

    #[test]
    fn test_read_balance_alternates_reads() {
        let masters = vec![servant("m0", true, true)];
        let slaves = vec![servant("s0", false, true)];
        let policy = ReadBalance::new();

        let picks = (0..4).map(|_| policy.select(&masters, &slaves, false)).collect();
        assert_eq!(names(picks), vec!["m0", "s0", "m0", "s0"]);

        let writes = (0..3).map(|_| policy.select(&masters, &slaves, true)).collect();
        assert_eq!(names(writes), vec!["m0", "m0", "m0"]);
    }

    #[test]
    fn test_read_balance_replica_fallback_to_master() {
        let masters = vec![servant("m0", true, true)];
        let slaves = vec![servant("s0", false, false)];
        let policy = ReadBalance::new();

        let picks = (0..2).map(|_| policy.select(&masters, &slaves, false)).collect();
        assert_eq!(names(picks), vec!["m0", "m0"]);
    }
}
