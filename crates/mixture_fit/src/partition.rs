//! Parent/child adjacency for one level of the hierarchy.
//!
//! Every point still being refined belongs to exactly one active parent slot,
//! and every slot owns `fanout` consecutive children. The E-step only touches
//! `active points × fanout` entries instead of a dense points × all-children
//! table.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct LevelPartition {
    fanout: usize,
    /// Global index of the parent behind each slot; `None` for the root.
    parents: Vec<Option<usize>>,
    /// Indices into the full point cloud.
    point_indices: Vec<usize>,
    /// Slot of each active point, aligned with `point_indices`.
    point_slots: Vec<usize>,
    points_per_slot: Vec<usize>,
}

impl LevelPartition {
    /// A single virtual root that owns every point.
    pub fn root(n_points: usize, fanout: usize) -> Self {
        let n_slots = usize::from(n_points > 0);
        Self {
            fanout,
            parents: vec![None; n_slots],
            point_indices: (0..n_points).collect(),
            point_slots: vec![0; n_points],
            points_per_slot: vec![n_points; n_slots],
        }
    }

    /// Groups points by the cluster they were hard-assigned to. Points whose
    /// cluster is not `expandable` drop out of the refinement.
    pub fn from_assignment(
        assignment: &[Option<usize>],
        fanout: usize,
        expandable: impl Fn(usize) -> bool,
    ) -> Self {
        let mut slot_of: BTreeMap<usize, usize> = BTreeMap::new();
        for cluster in assignment.iter().flatten() {
            if !slot_of.contains_key(cluster) && expandable(*cluster) {
                slot_of.insert(*cluster, 0);
            }
        }
        // Slots follow global index order.
        for (slot, entry) in slot_of.values_mut().enumerate() {
            *entry = slot;
        }

        let parents: Vec<Option<usize>> = slot_of.keys().map(|&g| Some(g)).collect();
        let mut points_per_slot = vec![0; parents.len()];
        let mut point_indices = Vec::new();
        let mut point_slots = Vec::new();
        for (index, cluster) in assignment.iter().enumerate() {
            let Some(slot) = cluster.and_then(|c| slot_of.get(&c).copied()) else {
                continue;
            };
            point_indices.push(index);
            point_slots.push(slot);
            points_per_slot[slot] += 1;
        }

        Self {
            fanout,
            parents,
            point_indices,
            point_slots,
            points_per_slot,
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn n_slots(&self) -> usize {
        self.parents.len()
    }

    pub fn n_children(&self) -> usize {
        self.parents.len() * self.fanout
    }

    pub fn n_active_points(&self) -> usize {
        self.point_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point_indices.is_empty()
    }

    pub fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    pub fn point_indices(&self) -> &[usize] {
        &self.point_indices
    }

    pub fn point_slots(&self) -> &[usize] {
        &self.point_slots
    }

    pub fn points_per_slot(&self) -> &[usize] {
        &self.points_per_slot
    }

    /// Slot owning the child at local index `child`.
    #[inline]
    pub fn slot_of_child(&self, child: usize) -> usize {
        child / self.fanout
    }

    /// Local index range of the children of `slot`.
    #[inline]
    pub fn children_of_slot(&self, slot: usize) -> std::ops::Range<usize> {
        slot * self.fanout..(slot + 1) * self.fanout
    }

    /// Gathers the active points out of the full cloud.
    pub fn gather<T: Copy>(&self, cloud: &[T]) -> Vec<T> {
        self.point_indices.iter().map(|&i| cloud[i]).collect()
    }
}
