/// Key to group routing
///
/// Lookups are lock-free: the slot array and the key override map are
/// swapped whole on every change, so a reader sees either the old or the new
/// table, never a partial one. Writers serialize on `writer`.
pub mod hash;
pub mod ring;
pub mod slots;

use arc_swap::ArcSwap;
use bytes::Bytes;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::config::RoutingMode;
use crate::group::Group;
use hash::HashKind;
use slots::Slot;

pub struct RoutingTable {
    mode: RoutingMode,
    hasher: HashKind,
    groups: Vec<Arc<Group>>,
    slots: ArcSwap<Vec<Slot>>,
    key_overrides: ArcSwap<FnvHashMap<Bytes, Arc<Group>>>,
    writer: Mutex<()>,
}

impl RoutingTable {
    /// Direct table; `assignments[i]` is the index in `groups` owning slot `i`
    pub fn direct(hasher: HashKind, groups: Vec<Arc<Group>>, assignments: &[usize]) -> Self {
        let slots = slots::build_direct(&groups, assignments);
        Self::with_slots(RoutingMode::Direct, hasher, groups, slots)
    }

    /// Consistent-hash ring over `groups`
    pub fn ring(hasher: HashKind, groups: Vec<Arc<Group>>) -> Self {
        let points = ring::build(&groups);
        Self::with_slots(RoutingMode::Ring, hasher, groups, points)
    }

    fn with_slots(mode: RoutingMode, hasher: HashKind, groups: Vec<Arc<Group>>, slots: Vec<Slot>) -> Self {
        info!(
            "Routing table built: {:?} mode, {} slots, {} groups, hash {:?}",
            mode,
            slots.len(),
            groups.len(),
            hasher
        );
        Self {
            mode,
            hasher,
            groups,
            slots: ArcSwap::from_pointee(slots),
            key_overrides: ArcSwap::from_pointee(FnvHashMap::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn group_by_name(&self, name: &[u8]) -> Option<&Arc<Group>> {
        self.groups.iter().find(|g| g.name().as_bytes() == name)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.load().len()
    }

    /// Slot index a key hashes to, ignoring key overrides
    pub fn slot_index(&self, key: &[u8]) -> Option<usize> {
        let slots = self.slots.load();
        if slots.is_empty() {
            return None;
        }

        let index = match self.mode {
            RoutingMode::Direct => self.hasher.hash(key) as usize % slots.len(),
            RoutingMode::Ring => {
                let hash = if key.is_empty() || self.groups.len() == 1 {
                    0
                } else {
                    self.hasher.hash(key)
                };
                ring::lookup(&slots, hash)
            }
        };
        Some(index)
    }

    /// Group owning `key`. Key overrides win even when the mapped group is
    /// disabled; callers check enablement separately.
    pub fn resolve(&self, key: &[u8]) -> Option<Arc<Group>> {
        if let Some(group) = self.key_overrides.load().get(key) {
            return Some(Arc::clone(group));
        }

        let index = self.slot_index(key)?;
        self.slots.load().get(index).and_then(|slot| slot.group.clone())
    }

    /// Reassign one slot. Returns false when `index` is out of range.
    pub fn set_slot(&self, index: usize, group: &Arc<Group>) -> bool {
        let _guard = self.writer.lock();
        let current = self.slots.load();
        if index >= current.len() {
            return false;
        }
        let mut next = Vec::clone(&current);
        slots::assign(&mut next, &[index], group);
        self.slots.store(Arc::new(next));
        true
    }

    pub fn add_key_override(&self, key: Bytes, group: &Arc<Group>) {
        let _guard = self.writer.lock();
        let mut next = FnvHashMap::clone(&self.key_overrides.load());
        next.insert(key, Arc::clone(group));
        self.key_overrides.store(Arc::new(next));
    }

    /// Returns true when the key had an override
    pub fn remove_key_override(&self, key: &[u8]) -> bool {
        let _guard = self.writer.lock();
        let current = self.key_overrides.load();
        if !current.contains_key(key) {
            return false;
        }
        let mut next = FnvHashMap::clone(&current);
        next.remove(key);
        self.key_overrides.store(Arc::new(next));
        true
    }

    /// Indices of every slot a group currently owns
    pub fn slots_owned_by(&self, group_id: usize) -> Vec<usize> {
        slots::owned_by(&self.slots.load(), group_id)
    }

    /// Take every slot away from `group_id` and spread them round-robin over
    /// `targets`. Returns the indices taken.
    pub fn eject(&self, group_id: usize, targets: &[Arc<Group>]) -> Vec<usize> {
        let _guard = self.writer.lock();
        let current = self.slots.load();
        let owned = slots::owned_by(&current, group_id);
        if owned.is_empty() {
            return owned;
        }
        let mut next = Vec::clone(&current);
        slots::redistribute(&mut next, &owned, targets);
        self.slots.store(Arc::new(next));
        owned
    }

    /// Give `indices` back to `group`
    pub fn restore(&self, indices: &[usize], group: &Arc<Group>) {
        let _guard = self.writer.lock();
        let mut next = Vec::clone(&self.slots.load());
        slots::assign(&mut next, indices, group);
        self.slots.store(Arc::new(next));
    }

    /// Current owner name per slot
    pub fn slot_owners(&self) -> Vec<Option<String>> {
        self.slots
            .load()
            .iter()
            .map(|slot| slot.group.as_ref().map(|g| g.name().to_string()))
            .collect()
    }

    /// Override keys per group, sorted for stable output
    pub fn key_overrides(&self) -> Vec<(Bytes, Arc<Group>)> {
        let mut entries: Vec<_> = self
            .key_overrides
            .load()
            .iter()
            .map(|(key, group)| (key.clone(), Arc::clone(group)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::policy::PolicyKind;

    fn groups(n: usize) -> Vec<Arc<Group>> {
        (0..n)
            .map(|id| Arc::new(Group::new(id, format!("g{}", id), 1, PolicyKind::MasterOnly)))
            .collect()
    }

    /// Find a key hashing to `slot` in a table of `count` slots
    fn key_for_slot(hasher: HashKind, slot: usize, count: usize) -> Vec<u8> {
        (0..100_000)
            .map(|i| format!("key:{}", i).into_bytes())
            .find(|key| hasher.hash(key) as usize % count == slot)
            .unwrap()
    }

    #[test]
    fn test_direct_slot_coverage() {
        let table = RoutingTable::direct(HashKind::Bytes, groups(2), &[0, 0, 1, 1]);
        for slot in 0..4 {
            let key = key_for_slot(HashKind::Bytes, slot, 4);
            assert_eq!(table.slot_index(&key), Some(slot));
            let group = table.resolve(&key).unwrap();
            assert_eq!(group.id(), if slot < 2 { 0 } else { 1 });
        }
    }

    #[test]
    fn test_key_override_precedence() {
        let groups = groups(2);
        let table = RoutingTable::direct(HashKind::Bytes, groups.clone(), &[0, 0, 0, 0]);
        assert_eq!(table.resolve(b"session").unwrap().id(), 0);

        table.add_key_override(Bytes::from_static(b"session"), &groups[1]);
        assert_eq!(table.resolve(b"session").unwrap().id(), 1);
        assert_eq!(table.key_overrides().len(), 1);

        assert!(table.remove_key_override(b"session"));
        assert!(!table.remove_key_override(b"session"));
        assert_eq!(table.resolve(b"session").unwrap().id(), 0);
    }

    #[test]
    fn test_set_slot() {
        let groups = groups(2);
        let table = RoutingTable::direct(HashKind::Bytes, groups.clone(), &[0, 0, 1, 1]);
        assert!(table.set_slot(3, &groups[0]));
        assert!(!table.set_slot(4, &groups[0]));
        assert_eq!(table.slots_owned_by(0), vec![0, 1, 3]);
        assert_eq!(table.slot_owners()[3].as_deref(), Some("g0"));
    }

    #[test]
    fn test_eject_and_restore() {
        let groups = groups(2);
        let table = RoutingTable::direct(HashKind::Bytes, groups.clone(), &[0, 0, 1, 1]);
        let key = key_for_slot(HashKind::Bytes, 3, 4);
        assert_eq!(table.resolve(&key).unwrap().id(), 1);

        let taken = table.eject(1, &[Arc::clone(&groups[0])]);
        assert_eq!(taken, vec![2, 3]);
        assert_eq!(table.resolve(&key).unwrap().id(), 0);
        assert!(table.eject(1, &[Arc::clone(&groups[0])]).is_empty());

        table.restore(&taken, &groups[1]);
        assert_eq!(table.resolve(&key).unwrap().id(), 1);
    }

    #[test]
    fn test_eject_without_targets_unroutes() {
        let groups = groups(1);
        let table = RoutingTable::direct(HashKind::Bytes, groups, &[0, 0]);
        table.eject(0, &[]);
        assert!(table.resolve(b"anything").is_none());
    }

    #[test]
    fn test_ring_resolve_deterministic() {
        let table = RoutingTable::ring(HashKind::Md5, groups(3));
        assert_eq!(table.slot_count(), 480);
        for i in 0..100 {
            let key = format!("user:{}", i);
            let first = table.resolve(key.as_bytes()).unwrap().id();
            let second = table.resolve(key.as_bytes()).unwrap().id();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_ring_empty_key_and_single_group_hash_zero() {
        let table = RoutingTable::ring(HashKind::Md5, groups(3));
        assert_eq!(table.slot_index(b""), Some(0));

        let single = RoutingTable::ring(HashKind::Md5, groups(1));
        assert_eq!(single.slot_index(b"a"), Some(0));
        assert_eq!(single.slot_index(b"zzz"), Some(0));
    }

    #[test]
    fn test_group_by_name() {
        let table = RoutingTable::direct(HashKind::Bytes, groups(2), &[0, 1]);
        assert_eq!(table.group_by_name(b"g1").unwrap().id(), 1);
        assert!(table.group_by_name(b"g9").is_none());
    }
}
