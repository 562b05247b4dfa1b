/// Slot table entries and copy-on-write slot operations

use std::sync::Arc;

use crate::group::Group;

/// One routing table entry
#[derive(Debug, Clone)]
pub struct Slot {
    /// Owning group; `None` once ejection left the slot with nowhere to go
    pub group: Option<Arc<Group>>,
    /// Ring position (ring mode only)
    pub position: u32,
}

impl Slot {
    pub fn new(group: Arc<Group>, position: u32) -> Self {
        Self {
            group: Some(group),
            position,
        }
    }

    pub fn is_owned_by(&self, group_id: usize) -> bool {
        self.group.as_ref().map_or(false, |g| g.id() == group_id)
    }
}

/// Direct mode table: slot `i` belongs to `groups[assignments[i]]`
pub fn build_direct(groups: &[Arc<Group>], assignments: &[usize]) -> Vec<Slot> {
    assignments
        .iter()
        .enumerate()
        .map(|(index, &owner)| Slot {
            group: groups.get(owner).cloned(),
            position: index as u32,
        })
        .collect()
}

/// Indices of every slot owned by a group
pub fn owned_by(slots: &[Slot], group_id: usize) -> Vec<usize> {
    slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_owned_by(group_id))
        .map(|(index, _)| index)
        .collect()
}

/// Hand `indices` out round-robin across `targets`; with no targets the
/// slots are left unassigned.
pub fn redistribute(slots: &mut [Slot], indices: &[usize], targets: &[Arc<Group>]) {
    for (n, &index) in indices.iter().enumerate() {
        if let Some(slot) = slots.get_mut(index) {
            slot.group = if targets.is_empty() {
                None
            } else {
                Some(Arc::clone(&targets[n % targets.len()]))
            };
        }
    }
}

/// Assign every index in `indices` to `group`
pub fn assign(slots: &mut [Slot], indices: &[usize], group: &Arc<Group>) {
    for &index in indices {
        if let Some(slot) = slots.get_mut(index) {
            slot.group = Some(Arc::clone(group));
        }
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

    #[test]
    fn test_build_direct() {
        let groups = groups(2);
        let slots = build_direct(&groups, &[0, 0, 1, 1]);
        assert_eq!(slots.len(), 4);
        assert!(slots[1].is_owned_by(0));
        assert!(slots[2].is_owned_by(1));
        assert_eq!(owned_by(&slots, 1), vec![2, 3]);
    }

    #[test]
    fn test_redistribute_round_robin() {
        let groups = groups(3);
        let mut slots = build_direct(&groups, &[0, 0, 0, 0, 1, 2]);
        let ejected = owned_by(&slots, 0);

        redistribute(&mut slots, &ejected, &[Arc::clone(&groups[1]), Arc::clone(&groups[2])]);
        assert_eq!(owned_by(&slots, 0), Vec::<usize>::new());
        assert_eq!(owned_by(&slots, 1), vec![0, 2, 4]);
        assert_eq!(owned_by(&slots, 2), vec![1, 3, 5]);

        assign(&mut slots, &ejected, &groups[0]);
        assert_eq!(owned_by(&slots, 0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_redistribute_without_targets_unassigns() {
        let groups = groups(1);
        let mut slots = build_direct(&groups, &[0, 0]);
        redistribute(&mut slots, &[0, 1], &[]);
        assert!(slots.iter().all(|s| s.group.is_none()));
    }
}
