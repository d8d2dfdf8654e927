//! Read-only query API for inspecting simulation state.
//!
//! Snapshot types are owned copies, safe to hand to reporting code or across
//! threads while the engine keeps running.

use crate::engine::Engine;
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::inventory::{Inventory, InventoryOwner, Lane};
use crate::model::ResourceKind;
use crate::order::OrderStatus;
use crate::sim::UnitStatus;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialCount {
    pub material: MaterialId,
    pub name: Option<String>,
    pub quantity: u32,
}

/// Contents of one inventory, grouped by lane and material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub id: InventoryId,
    pub owner: InventoryOwner,
    pub limit: u32,
    pub held: u32,
    pub free: u32,
    pub input: Vec<MaterialCount>,
    pub output: Vec<MaterialCount>,
}

impl InventorySnapshot {
    pub fn total(&self) -> u32 {
        self.input.iter().chain(&self.output).map(|c| c.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: ProcessStepId,
    pub name: String,
    pub active: bool,
    pub status: UnitStatus,
    pub recipe: Option<String>,
    pub cycles_in_flight: usize,
    pub cycles_started: u64,
    pub cycles_failed: u64,
    pub units_produced: u64,
    /// Fraction of completed cycles that failed, 0 when none completed.
    pub failure_ratio: Fixed64,
    pub inventory: InventorySnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSnapshot {
    pub id: TransportId,
    pub name: String,
    pub kind: TransportKind,
    pub active: bool,
    pub status: UnitStatus,
    pub start: Option<ProcessStepId>,
    pub end: Option<ProcessStepId>,
    pub in_transit: u32,
    pub picked_up: u64,
    pub delivered: u64,
    pub exported: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub name: Option<String>,
    pub material: String,
    pub quantity: u32,
    pub produced: u32,
    pub status: OrderStatus,
    pub started_tick: Option<Ticks>,
    pub completed_tick: Option<Ticks>,
    pub canceled_tick: Option<Ticks>,
    pub overdue: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub name: String,
    pub location: Option<String>,
    pub process_step: Option<ProcessStepId>,
    pub machine: bool,
    /// Machine model or worker role name.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine query methods
// ---------------------------------------------------------------------------

impl Engine {
    fn counts(&self, inv: &Inventory, lane: Lane) -> Vec<MaterialCount> {
        let mut by_material: BTreeMap<MaterialId, u32> = BTreeMap::new();
        for entry in inv.entries().iter().filter(|e| e.lane == lane) {
            *by_material.entry(entry.material).or_default() += 1;
        }
        by_material
            .into_iter()
            .map(|(material, quantity)| MaterialCount {
                material,
                name: self.registry.material_name(material).map(str::to_string),
                quantity,
            })
            .collect()
    }

    pub fn snapshot_inventory(&self, id: InventoryId) -> Option<InventorySnapshot> {
        let inv = self.state.inventories.snapshot(id)?;
        Some(InventorySnapshot {
            id,
            owner: inv.owner(),
            limit: inv.limit(),
            held: inv.held(),
            free: inv.free_capacity(),
            input: self.counts(&inv, Lane::Input),
            output: self.counts(&inv, Lane::Output),
        })
    }

    pub fn snapshot_step(&self, id: ProcessStepId) -> Option<StepSnapshot> {
        let step = self.state.steps.get(id)?;
        let state = self.state.step_states.get(id)?;
        let failure_ratio = if state.cycles_completed == 0 {
            Fixed64::ZERO
        } else {
            Fixed64::from_num(state.cycles_failed) / Fixed64::from_num(state.cycles_completed)
        };
        Some(StepSnapshot {
            id,
            name: step.name.clone(),
            active: step.active,
            status: step.status,
            recipe: step
                .recipe
                .and_then(|r| self.registry.get_recipe(r))
                .map(|r| r.name.clone()),
            cycles_in_flight: state.in_flight.len(),
            cycles_started: state.cycles_started,
            cycles_failed: state.cycles_failed,
            units_produced: state.units_produced,
            failure_ratio,
            inventory: self.snapshot_inventory(step.inventory)?,
        })
    }

    pub fn snapshot_all_steps(&self) -> Vec<StepSnapshot> {
        self.state
            .steps
            .keys()
            .filter_map(|id| self.snapshot_step(id))
            .collect()
    }

    pub fn snapshot_transport(&self, id: TransportId) -> Option<TransportSnapshot> {
        let t = self.state.transports.get(id)?;
        let stats = self.state.transport_stats.get(id)?;
        let in_transit = self.state.inventories.with(t.inventory, |inv| inv.len()).ok()?;
        Some(TransportSnapshot {
            id,
            name: t.name.clone(),
            kind: t.kind,
            active: t.active,
            status: t.status,
            start: t.start,
            end: t.end,
            in_transit,
            picked_up: stats.picked_up,
            delivered: stats.delivered,
            exported: stats.exported,
        })
    }

    pub fn snapshot_all_transports(&self) -> Vec<TransportSnapshot> {
        self.state
            .transports
            .keys()
            .filter_map(|id| self.snapshot_transport(id))
            .collect()
    }

    pub fn snapshot_order(&self, id: OrderId) -> Option<OrderSnapshot> {
        let o = self.state.orders.get(id)?;
        let now = self.state.tick;
        Some(OrderSnapshot {
            id,
            name: o.name.clone(),
            material: self
                .registry
                .material_name(o.material)
                .unwrap_or_default()
                .to_string(),
            quantity: o.quantity,
            produced: o.produced,
            status: o.status,
            started_tick: o.started_tick,
            completed_tick: o.completed_tick,
            canceled_tick: o.canceled_tick,
            overdue: !o.status.is_terminal() && o.due_tick.is_some_and(|due| now > due),
        })
    }

    pub fn snapshot_all_orders(&self) -> Vec<OrderSnapshot> {
        self.state
            .orders
            .iter()
            .filter_map(|(id, _)| self.snapshot_order(id))
            .collect()
    }

    pub fn snapshot_resource(&self, id: ResourceId) -> Option<ResourceSnapshot> {
        let r = self.state.resources.get(id)?;
        let detail = match &r.kind {
            ResourceKind::Machine(m) => m.model.clone(),
            ResourceKind::Worker(w) => w
                .role
                .and_then(|role| self.state.worker_roles.get(role))
                .map(|role| role.name.clone()),
        };
        Some(ResourceSnapshot {
            id,
            name: r.name.clone(),
            location: r
                .location
                .and_then(|l| self.state.locations.get(l))
                .map(|l| l.name.clone()),
            process_step: r.process_step,
            machine: r.is_machine(),
            detail,
        })
    }

    /// Resources placed at a location.
    pub fn resources_at(&self, location: LocationId) -> Vec<ResourceId> {
        self.state
            .resources
            .iter()
            .filter(|(_, r)| r.location == Some(location))
            .map(|(id, _)| id)
            .collect()
    }

    /// Resources assigned to a process step.
    pub fn resources_for(&self, step: ProcessStepId) -> Vec<ResourceId> {
        self.state
            .resources
            .iter()
            .filter(|(_, r)| r.process_step == Some(step))
            .map(|(id, _)| id)
            .collect()
    }

    /// Steps placed at a location.
    pub fn steps_at(&self, location: LocationId) -> Vec<ProcessStepId> {
        self.state
            .steps
            .iter()
            .filter(|(_, s)| s.location == Some(location))
            .map(|(id, _)| id)
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
