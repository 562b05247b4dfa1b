/// Consistent-hash ring (ketama layout)
///
/// Each group contributes points derived from MD5 digests of
/// `"{group name}-{index}"`, four little-endian words per digest. All points
/// are sorted ascending and lookups take the first point at or after the key
/// hash, wrapping to the start.
use std::sync::Arc;

use crate::group::Group;
use crate::routing::slots::Slot;

/// Points per group when all weights are equal
pub const POINTS_PER_GROUP: usize = 160;
const POINTS_PER_DIGEST: usize = 4;

/// Number of ring points for a group of `weight` out of `total_weight`
/// across `group_count` groups
pub fn point_count(weight: u32, total_weight: u64, group_count: usize) -> usize {
    if total_weight == 0 {
        return 0;
    }
    // floor(weight / total * 40 * count), kept in integers so equal weights
    // land exactly on 160
    let digests = weight as u64 * (POINTS_PER_GROUP / POINTS_PER_DIGEST) as u64 * group_count as u64
        / total_weight;
    digests as usize * POINTS_PER_DIGEST
}

/// Build the sorted ring for `groups`
pub fn build(groups: &[Arc<Group>]) -> Vec<Slot> {
    let total_weight: u64 = groups.iter().map(|g| g.weight() as u64).sum();
    let mut points = Vec::new();

    for group in groups {
        let count = point_count(group.weight(), total_weight, groups.len());
        for index in 0..count / POINTS_PER_DIGEST {
            let digest = md5::compute(format!("{}-{}", group.name(), index));
            for word in digest.0.chunks_exact(4) {
                let position = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                points.push(Slot::new(Arc::clone(group), position));
            }
        }
    }

    points.sort_by_key(|slot| slot.position);
    points
}

/// Index of the first point whose position is >= `hash`, wrapping to 0
pub fn lookup(points: &[Slot], hash: u32) -> usize {
    let index = points.partition_point(|slot| slot.position < hash);
    if index == points.len() {
        0
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::policy::PolicyKind;
    use crate::routing::hash::md5_hash;

    fn groups(weights: &[u32]) -> Vec<Arc<Group>> {
        weights
            .iter()
            .enumerate()
            .map(|(id, &w)| Arc::new(Group::new(id, format!("g{}", id), w, PolicyKind::MasterOnly)))
            .collect()
    }

    #[test]
    fn test_point_count_weights() {
        assert_eq!(point_count(1, 3, 3), 160);
        assert_eq!(point_count(1, 1, 1), 160);
        // weight 2 of total 3 across 2 groups: floor(2/3 * 40 * 2) * 4
        assert_eq!(point_count(2, 3, 2), 212);
        assert_eq!(point_count(1, 3, 2), 104);
        assert_eq!(point_count(1, 0, 2), 0);
    }

    #[test]
    fn test_ring_is_sorted() {
        let ring = build(&groups(&[1, 1, 1]));
        assert_eq!(ring.len(), 480);
        assert!(ring.windows(2).all(|w| w[0].position <= w[1].position));
    }

    #[test]
    fn test_ring_points_match_digest() {
        let ring = build(&groups(&[1]));
        let first_word = md5_hash(b"g0-0");
        assert!(ring.iter().any(|slot| slot.position == first_word));
    }

    #[test]
    fn test_lookup_wraps() {
        let ring = build(&groups(&[1, 1]));
        let last = ring.last().unwrap().position;
        assert_eq!(lookup(&ring, 0), 0);
        assert_eq!(lookup(&ring, ring[0].position), 0);
        if last < u32::MAX {
            assert_eq!(lookup(&ring, last + 1), 0);
        }
        if ring[4].position < ring[5].position {
            let between = ring[4].position + (ring[5].position - ring[4].position) / 2 + 1;
            assert_eq!(ring[lookup(&ring, between)].position, ring[5].position);
        }
    }

    #[test]
    fn test_adding_group_moves_only_neighbouring_keys() {
        let before = build(&groups(&[1, 1, 1]));
        let after = build(&groups(&[1, 1, 1, 1]));

        let mut moved = 0;
        for i in 0..2000u32 {
            let hash = md5_hash(format!("key:{}", i).as_bytes());
            let old = before[lookup(&before, hash)].group.as_ref().unwrap().id();
            let new = after[lookup(&after, hash)].group.as_ref().unwrap().id();
            if old != new {
                // Keys only move onto the new group
                assert_eq!(new, 3);
                moved += 1;
            }
        }
        assert!(moved > 0 && moved < 1000, "moved {}", moved);
    }
}
