/// Group health: ejection of unavailable groups and slot restoration
///
/// When a request finds no usable servant in its group, the group's slots
/// are handed to the remaining enabled groups and a retry timer is armed.
/// With `eject_after_restore` the original slots are given back once the
/// group is active again; otherwise they stay where they were moved.
pub mod monitor;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GroupOptionConfig;
use crate::group::Group;
use crate::routing::RoutingTable;
use crate::utils::format_duration;

/// Ejection tuning
#[derive(Debug, Clone)]
pub struct HealthOptions {
    pub auto_eject: bool,
    pub eject_after_restore: bool,
    pub retry_time: Duration,
    pub restore_poll: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            auto_eject: false,
            eject_after_restore: false,
            retry_time: Duration::from_secs(30),
            restore_poll: Duration::from_millis(500),
        }
    }
}

impl From<&GroupOptionConfig> for HealthOptions {
    fn from(config: &GroupOptionConfig) -> Self {
        Self {
            auto_eject: config.auto_eject_group,
            eject_after_restore: config.eject_after_restore,
            retry_time: Duration::from_secs(config.group_retry_time),
            ..Default::default()
        }
    }
}

/// Per-group ejection bookkeeping, kept for the life of the process
#[derive(Debug)]
struct EjectionRecord {
    snapshot: Vec<usize>,
    can_eject: bool,
    timer: Option<JoinHandle<()>>,
}

impl EjectionRecord {
    fn new() -> Self {
        Self {
            snapshot: Vec::new(),
            can_eject: true,
            timer: None,
        }
    }
}

pub struct GroupHealthManager {
    routing: Arc<RoutingTable>,
    options: HealthOptions,
    records: Mutex<HashMap<usize, EjectionRecord>>,
}

impl GroupHealthManager {
    pub fn new(routing: Arc<RoutingTable>, options: HealthOptions) -> Self {
        Self {
            routing,
            options,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &HealthOptions {
        &self.options
    }

    /// Called when no servant of `group` could serve a request. Returns true
    /// when this call ejected the group.
    pub fn report_unavailable(self: &Arc<Self>, group: &Arc<Group>) -> bool {
        if !self.options.auto_eject {
            return false;
        }

        let mut records = self.records.lock();
        let record = records.entry(group.id()).or_insert_with(EjectionRecord::new);
        if !record.can_eject {
            return false;
        }

        record.snapshot = self.eject(group);
        record.can_eject = false;
        let manager = Arc::clone(self);
        let timer_group = Arc::clone(group);
        record.timer = Some(tokio::spawn(async move {
            manager.on_retry_timer(timer_group).await;
        }));

        info!(
            "Group {} ejected, {} slots redistributed, retry in {}",
            group.name(),
            record.snapshot.len(),
            format_duration(self.options.retry_time)
        );
        true
    }

    /// True while an ejection of the group is pending re-evaluation
    pub fn is_ejected(&self, group_id: usize) -> bool {
        self.records
            .lock()
            .get(&group_id)
            .map_or(false, |record| !record.can_eject)
    }

    /// Cancel every pending timer
    pub fn shutdown(&self) {
        for record in self.records.lock().values_mut() {
            if let Some(timer) = record.timer.take() {
                timer.abort();
            }
        }
    }

    /// Move the group's slots round-robin onto the other enabled groups
    fn eject(&self, group: &Arc<Group>) -> Vec<usize> {
        let targets: Vec<Arc<Group>> = self
            .routing
            .groups()
            .iter()
            .filter(|g| g.id() != group.id() && g.is_enabled())
            .cloned()
            .collect();

        if targets.is_empty() {
            warn!(
                "No enabled group left to take over slots of group {}",
                group.name()
            );
        }
        self.routing.eject(group.id(), &targets)
    }

    async fn on_retry_timer(self: Arc<Self>, group: Arc<Group>) {
        tokio::time::sleep(self.options.retry_time).await;

        if self.options.eject_after_restore {
            if !group.is_enabled() {
                let taken = self.eject(&group);
                if !taken.is_empty() {
                    if let Some(record) = self.records.lock().get_mut(&group.id()) {
                        if record.snapshot.is_empty() {
                            record.snapshot = taken;
                        }
                    }
                }
            }

            while !group.is_enabled() {
                tokio::time::sleep(self.options.restore_poll).await;
            }

            let mut records = self.records.lock();
            if let Some(record) = records.get_mut(&group.id()) {
                let snapshot = std::mem::take(&mut record.snapshot);
                self.routing.restore(&snapshot, &group);
                record.can_eject = true;
                record.timer = None;
                info!(
                    "Group {} restored with {} slots",
                    group.name(),
                    snapshot.len()
                );
            }
            return;
        }

        if group.is_enabled() {
            info!("Group {} is back, ejection cancelled", group.name());
        } else {
            let taken = self.eject(&group);
            debug!(
                "Group {} still unavailable, re-ejected {} slots",
                group.name(),
                taken.len()
            );
        }

        if let Some(record) = self.records.lock().get_mut(&group.id()) {
            record.can_eject = true;
            record.timer = None;
        }
    }
}
