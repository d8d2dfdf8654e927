//! Independent subgraphs of the plant.
//!
//! Two units share a partition when a transport links them. Units in
//! different partitions never touch the same inventory, so their engine work
//! within a sub-phase can run on separate threads.

use crate::id::{ProcessStepId, TransportId};
use crate::process::ProcessStep;
use crate::transport::TransportSystem;
use slotmap::{SecondaryMap, SlotMap};

/// One connected component, members in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub steps: Vec<ProcessStepId>,
    pub transports: Vec<TransportId>,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Smaller root wins, so a component's root is its first member.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Split the graph into connected components, ordered by their first step
/// (or transport, for components without steps).
pub fn partition(
    steps: &SlotMap<ProcessStepId, ProcessStep>,
    transports: &SlotMap<TransportId, TransportSystem>,
) -> Vec<Partition> {
    let mut step_index = SecondaryMap::new();
    for (i, id) in steps.keys().enumerate() {
        step_index.insert(id, i);
    }
    let offset = steps.len();
    let mut set = DisjointSet::new(offset + transports.len());

    for (i, (_, transport)) in transports.iter().enumerate() {
        let node = offset + i;
        for end in [transport.start, transport.end].into_iter().flatten() {
            if let Some(&s) = step_index.get(end) {
                set.union(node, s);
            }
        }
    }

    let mut by_root: Vec<Option<usize>> = vec![None; offset + transports.len()];
    let mut partitions: Vec<Partition> = Vec::new();
    let mut slot_for = |set: &mut DisjointSet, node: usize, partitions: &mut Vec<Partition>| {
        let root = set.find(node);
        *by_root[root].get_or_insert_with(|| {
            partitions.push(Partition::default());
            partitions.len() - 1
        })
    };

    for (i, id) in steps.keys().enumerate() {
        let slot = slot_for(&mut set, i, &mut partitions);
        partitions[slot].steps.push(id);
    }
    for (i, id) in transports.keys().enumerate() {
        let slot = slot_for(&mut set, offset + i, &mut partitions);
        partitions[slot].transports.push(id);
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed64;
    use crate::id::InventoryId;
    use crate::sim::UnitStatus;
    use crate::transport::TransportKind;

    fn step(name: &str) -> ProcessStep {
        ProcessStep {
            name: name.into(),
            location: None,
            active: true,
            status: UnitStatus::Idle,
            input_speed: 1,
            output_speed: 1,
            recipe_rate: 1,
            duration: 1,
            error_rate: Fixed64::ZERO,
            inventory: InventoryId::default(),
            recipe: None,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    fn link(start: Option<ProcessStepId>, end: Option<ProcessStepId>) -> TransportSystem {
        TransportSystem {
            name: "t".into(),
            kind: TransportKind::Conveyor,
            active: true,
            status: UnitStatus::Idle,
            input_speed: 1,
            output_speed: 1,
            min_quantity: 0,
            transport_delay: 0,
            filter: None,
            start,
            end,
            supply: None,
            inventory: InventoryId::default(),
        }
    }

    #[test]
    fn linked_steps_share_a_partition() {
        let mut steps = SlotMap::with_key();
        let a = steps.insert(step("a"));
        let b = steps.insert(step("b"));
        let c = steps.insert(step("c"));
        let mut transports = SlotMap::with_key();
        let ab = transports.insert(link(Some(a), Some(b)));
        let feed_c = transports.insert(link(None, Some(c)));
        let sink = transports.insert(link(None, None));

        let parts = partition(&steps, &transports);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].steps, vec![a, b]);
        assert_eq!(parts[0].transports, vec![ab]);
        assert_eq!(parts[1].steps, vec![c]);
        assert_eq!(parts[1].transports, vec![feed_c]);
        assert!(parts[2].steps.is_empty());
        assert_eq!(parts[2].transports, vec![sink]);
    }

    #[test]
    fn chain_collapses_to_one_partition() {
        let mut steps = SlotMap::with_key();
        let a = steps.insert(step("a"));
        let b = steps.insert(step("b"));
        let c = steps.insert(step("c"));
        let mut transports = SlotMap::with_key();
        transports.insert(link(Some(b), Some(c)));
        transports.insert(link(Some(a), Some(b)));

        let parts = partition(&steps, &transports);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].steps, vec![a, b, c]);
        assert_eq!(parts[0].transports.len(), 2);
    }
}
