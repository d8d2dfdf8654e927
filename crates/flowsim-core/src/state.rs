//! The explicit simulation state owned by the coordinator.
//!
//! Engines borrow it for the duration of one sub-phase and hand back outcome
//! values; nothing outside the coordinator keeps references across ticks.

use crate::error::InvariantViolation;
use crate::fixed::Ticks;
use crate::id::*;
use crate::inventory::InventoryStore;
use crate::model::{Location, Resource, WorkerRole};
use crate::order::OrderTracker;
use crate::process::{ProcessStep, StepState};
use crate::sensor::{Probe, Sensor, SensorTarget, TelemetryLog};
use crate::sim::{MaterialLedger, StateHash, UnitStatus};
use crate::transport::{TransportStats, TransportSystem};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    /// The next tick to run.
    pub(crate) tick: Ticks,
    pub(crate) locations: SlotMap<LocationId, Location>,
    pub(crate) worker_roles: SlotMap<WorkerRoleId, WorkerRole>,
    pub(crate) resources: SlotMap<ResourceId, Resource>,

    // -- Per-step state (SoA, keyed by ProcessStepId) --
    pub(crate) steps: SlotMap<ProcessStepId, ProcessStep>,
    pub(crate) step_states: SecondaryMap<ProcessStepId, StepState>,

    // -- Per-transport state (SoA, keyed by TransportId) --
    pub(crate) transports: SlotMap<TransportId, TransportSystem>,
    pub(crate) transport_stats: SecondaryMap<TransportId, TransportStats>,

    pub(crate) inventories: InventoryStore,
    pub(crate) orders: OrderTracker,
    pub(crate) sensors: SlotMap<SensorId, Sensor>,
    pub(crate) log: TelemetryLog,
    pub(crate) ledger: MaterialLedger,
}

impl SimulationState {
    pub fn new(log_capacity: Option<usize>) -> Self {
        Self {
            tick: 0,
            locations: SlotMap::with_key(),
            worker_roles: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            steps: SlotMap::with_key(),
            step_states: SecondaryMap::new(),
            transports: SlotMap::with_key(),
            transport_stats: SecondaryMap::new(),
            inventories: InventoryStore::new(),
            orders: OrderTracker::default(),
            sensors: SlotMap::with_key(),
            log: TelemetryLog::with_capacity_limit(log_capacity),
            ledger: MaterialLedger::default(),
        }
    }

    pub fn unit_inventory(&self, unit: UnitId) -> Option<InventoryId> {
        match unit {
            UnitId::ProcessStep(id) => self.steps.get(id).map(|s| s.inventory),
            UnitId::Transport(id) => self.transports.get(id).map(|t| t.inventory),
        }
    }

    pub fn unit_status(&self, unit: UnitId) -> Option<UnitStatus> {
        match unit {
            UnitId::ProcessStep(id) => self.steps.get(id).map(|s| s.status),
            UnitId::Transport(id) => self.transports.get(id).map(|t| t.status),
        }
    }

    pub fn unit_name(&self, unit: UnitId) -> Option<&str> {
        match unit {
            UnitId::ProcessStep(id) => self.steps.get(id).map(|s| s.name.as_str()),
            UnitId::Transport(id) => self.transports.get(id).map(|t| t.name.as_str()),
        }
    }

    /// Entries held across every inventory.
    pub fn held(&self) -> u64 {
        self.inventories.total_entries()
    }

    /// Capacity on every inventory, then material conservation against the ledger.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut violation = None;
        self.inventories.for_each(|id, inv| {
            if violation.is_none() && inv.len() > inv.limit() {
                violation = Some(InvariantViolation::CapacityExceeded {
                    inventory: id,
                    len: inv.len(),
                    limit: inv.limit(),
                });
            }
        });
        if let Some(v) = violation {
            return Err(v);
        }

        let held = self.held();
        let expected = self.ledger.expected_held();
        if expected != held as i64 {
            return Err(InvariantViolation::Conservation { expected, held });
        }
        Ok(())
    }

    /// Deterministic hash of everything that evolves during a run.
    pub fn compute_hash(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.tick);

        for (id, step) in &self.steps {
            hasher.write_u64(key_bits(id));
            hasher.write_u32(step.status.code() as u32);
            hasher.write_u32(u32::from(step.active));
            if let Some(state) = self.step_states.get(id) {
                hasher.write_u64(state.cycles_started);
                hasher.write_u64(state.cycles_failed);
                for cycle in &state.in_flight {
                    hasher.write_u64(cycle.completes_at);
                    hasher.write_u32(u32::from(cycle.failed));
                }
            }
        }

        for (id, transport) in &self.transports {
            hasher.write_u64(key_bits(id));
            hasher.write_u32(transport.status.code() as u32);
            hasher.write_u32(u32::from(transport.active));
            if let Some(stats) = self.transport_stats.get(id) {
                hasher.write_u64(stats.picked_up);
                hasher.write_u64(stats.delivered);
                hasher.write_u64(stats.exported);
            }
        }

        self.inventories.for_each(|id, inv| {
            hasher.write_u64(key_bits(id));
            hasher.write_u32(inv.held());
            for entry in inv.entries() {
                hasher.write_u64(entry.id.0);
                hasher.write_u32(entry.material.0);
                hasher.write_u32(entry.lane as u32);
                hasher.write_u64(entry.added_at);
                hasher.write_u64(entry.order.map_or(0, key_bits));
            }
        });

        for (id, order) in self.orders.iter() {
            hasher.write_u64(key_bits(id));
            hasher.write_u32(order.status as u32);
            hasher.write_u32(order.produced);
        }

        for (_, sensor) in &self.sensors {
            hasher.write_fixed64(sensor.value);
        }

        hasher.write_u64(self.log.next_id().0);
        hasher.write_u64(self.ledger.entered);
        hasher.write_u64(self.ledger.produced);
        hasher.write_u64(self.ledger.consumed);
        hasher.write_u64(self.ledger.exported);
        hasher.finish()
    }
}

impl Probe for SimulationState {
    fn inventory_level(&self, target: SensorTarget, material: Option<MaterialId>) -> Option<u32> {
        let inventory = self.unit_inventory(target.unit())?;
        self.inventories
            .with(inventory, |inv| match material {
                Some(m) => inv.count_where(|e| e.material == m),
                None => inv.len(),
            })
            .ok()
    }

    fn in_transit(&self, target: SensorTarget) -> Option<u32> {
        match target {
            SensorTarget::ProcessStep(id) => self
                .step_states
                .get(id)
                .map(|s| s.in_flight.len() as u32),
            SensorTarget::Transport(id) => {
                let inventory = self.transports.get(id)?.inventory;
                self.inventories.with(inventory, |inv| inv.len()).ok()
            }
        }
    }

    fn status(&self, target: SensorTarget) -> Option<UnitStatus> {
        self.unit_status(target.unit())
    }

    fn throughput_counter(&self, target: SensorTarget) -> Option<u64> {
        match target {
            SensorTarget::ProcessStep(id) => self.step_states.get(id).map(StepState::throughput_counter),
            SensorTarget::Transport(id) => self
                .transport_stats
                .get(id)
                .map(TransportStats::throughput_counter),
        }
    }

    fn error_count(&self, target: SensorTarget) -> Option<u64> {
        match target {
            SensorTarget::ProcessStep(id) => self.step_states.get(id).map(StepState::error_count),
            SensorTarget::Transport(id) => self.transport_stats.get(id).map(|s| s.errors),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryOwner, Lane};

    fn one_bin(limit: u32) -> (SimulationState, InventoryId) {
        let mut state = SimulationState::new(None);
        let mut steps: SlotMap<ProcessStepId, ()> = SlotMap::with_key();
        let owner = steps.insert(());
        let inv = state
            .inventories
            .create(InventoryOwner::ProcessStep(owner), limit);
        (state, inv)
    }

    #[test]
    fn conservation_holds_when_ledger_matches() {
        let (mut state, inv) = one_bin(5);
        state
            .inventories
            .add(inv, Lane::Input, MaterialId(0), 3, None, 0)
            .unwrap();
        state.ledger.entered = 3;
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn conservation_violation_detected() {
        let (mut state, inv) = one_bin(5);
        state
            .inventories
            .add(inv, Lane::Input, MaterialId(0), 2, None, 0)
            .unwrap();
        state.ledger.entered = 3;
        assert_eq!(
            state.check_invariants(),
            Err(InvariantViolation::Conservation {
                expected: 3,
                held: 2
            })
        );
    }

    #[test]
    fn hash_tracks_inventory_contents() {
        let (mut state, inv) = one_bin(5);
        let before = state.compute_hash();
        state
            .inventories
            .add(inv, Lane::Output, MaterialId(1), 1, None, 0)
            .unwrap();
        assert_ne!(before, state.compute_hash());
    }
}
