//! Profiling and diagnostic instrumentation for the coordinator.
//!
//! - [`TickProfile`] captures per-sub-phase timing from the most recent tick.
//!   Only populated when the `profiling` feature is enabled.
//! - [`StepDiagnosis`] explains why a step is in its current status.
//!   Always available.

use std::time::Duration;

use crate::engine::Engine;
use crate::id::{MaterialId, ProcessStepId};
use crate::inventory::Lane;
use crate::recipe;
use crate::sim::UnitStatus;

/// Per-sub-phase timing from the most recent tick.
#[derive(Debug, Clone, Default)]
pub struct TickProfile {
    pub collect: Duration,
    pub pickup: Duration,
    pub produce: Duration,
    pub deliver: Duration,
    pub sample: Duration,
    pub reconcile: Duration,
    pub total: Duration,
    pub tick: u64,
}

impl TickProfile {
    /// Name and duration of the slowest sub-phase.
    pub fn bottleneck_phase(&self) -> (&'static str, Duration) {
        let phases = [
            ("collect", self.collect),
            ("pickup", self.pickup),
            ("produce", self.produce),
            ("deliver", self.deliver),
            ("sample", self.sample),
            ("reconcile", self.reconcile),
        ];
        phases
            .into_iter()
            .max_by_key(|(_, d)| *d)
            .unwrap_or(("collect", Duration::ZERO))
    }
}

/// Why a step is in its current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDiagnosis {
    pub step: ProcessStepId,
    pub status: UnitStatus,
    pub active: bool,
    /// (material, available, needed per cycle) for each recipe input.
    pub input_summary: Vec<(MaterialId, u32, u32)>,
    pub free_capacity: u32,
    pub held: u32,
    pub cycles_in_flight: usize,
    pub inbound: usize,
    pub outbound: usize,
    /// Set when the step has no recipe and passes input straight through.
    pub pass_through: bool,
}

impl Engine {
    /// Diagnose a step. `None` for an unknown step.
    pub fn diagnose_step(&self, id: ProcessStepId) -> Option<StepDiagnosis> {
        let step = self.state.steps.get(id)?;
        let inventory = self.state.inventories.snapshot(step.inventory)?;
        let input_summary = match recipe::resolve(&self.registry, step.recipe) {
            Ok(resolved) => resolved
                .inputs
                .iter()
                .map(|input| {
                    let have = inventory.available_where(|e| {
                        e.lane == Lane::Input && e.material == input.material
                    });
                    (input.material, have, input.quantity)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Some(StepDiagnosis {
            step: id,
            status: step.status,
            active: step.active,
            input_summary,
            free_capacity: inventory.free_capacity(),
            held: inventory.held(),
            cycles_in_flight: self
                .state
                .step_states
                .get(id)
                .map_or(0, |s| s.in_flight.len()),
            inbound: step.inbound.len(),
            outbound: step.outbound.len(),
            pass_through: step.is_pass_through(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
