//! Process Step Engine.
//!
//! A step with a recipe runs production cycles: each cycle consumes the
//! recipe inputs from the Input lane when it starts and, `duration` ticks
//! later, places the outputs on the Output lane. Output capacity is held for
//! the whole cycle so completions never overflow. A step without a recipe
//! moves entries from its Input lane to its Output lane unchanged.
//!
//! Steps never touch the plant state directly. `run_step` works through the
//! inventory store and returns a `StepOutcome` the coordinator applies.

use crate::error::UnitError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::inventory::{InventoryEntry, InventoryError, InventoryStore, Lane};
use crate::order::OrderTracker;
use crate::recipe::{self, RecipeError, ResolvedRecipe};
use crate::registry::{MaterialQty, Registry};
use crate::rng::SimRng;
use crate::sim::UnitStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// A production node in the plant graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: String,
    pub location: Option<LocationId>,
    pub active: bool,
    pub status: UnitStatus,
    /// Max input units consumed per tick.
    pub input_speed: u32,
    /// Max units moved per tick when the step has no recipe.
    pub output_speed: u32,
    /// Max cycles in flight at once.
    pub recipe_rate: u32,
    /// Ticks from cycle start to completion.
    pub duration: u32,
    /// Probability in [0, 1] that a cycle fails and scraps its inputs.
    pub error_rate: Fixed64,
    pub inventory: InventoryId,
    pub recipe: Option<RecipeId>,
    pub inbound: Vec<TransportId>,
    pub outbound: Vec<TransportId>,
}

impl ProcessStep {
    pub fn is_pass_through(&self) -> bool {
        self.recipe.is_none()
    }

    /// Free slots the step needs beyond its consumed inputs to start one cycle
    /// of its current recipe. Deliveries leave this much room so a full Input
    /// lane cannot lock the step out of its own outputs.
    pub fn output_headroom(&self, registry: &Registry) -> u32 {
        match recipe::resolve(registry, self.recipe) {
            Ok(resolved) => resolved.total_output().saturating_sub(resolved.total_input()),
            Err(_) => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// A production cycle whose inputs are consumed and whose outputs are pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub started_at: Ticks,
    pub completes_at: Ticks,
    pub outputs: Vec<MaterialQty>,
    pub inputs: u32,
    pub failed: bool,
    pub order: Option<OrderId>,
}

/// Runtime state of a step, tracked in SoA storage next to the step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub in_flight: Vec<Cycle>,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub units_produced: u64,
    pub units_passed: u64,
    /// Isolated failures recorded by the coordinator (errors, deadline overruns).
    pub unit_errors: u64,
}

impl StepState {
    /// Monotonic counter read by throughput sensors.
    pub fn throughput_counter(&self) -> u64 {
        self.units_produced + self.units_passed
    }

    /// Failed cycles plus unit failures, read by error-count sensors.
    pub fn error_count(&self) -> u64 {
        self.cycles_failed + self.unit_errors
    }
}

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// Read-only view of the plant handed to each step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub tick: Ticks,
    pub seed: u64,
    pub registry: &'a Registry,
    pub inventories: &'a InventoryStore,
    pub orders: &'a OrderTracker,
}

/// Units placed on a step's Output lane by a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    pub material: MaterialId,
    pub quantity: u32,
    pub order: Option<OrderId>,
}

/// The outcome of a single tick for a step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: ProcessStepId,
    pub state: StepState,
    pub status: UnitStatus,
    /// Input units consumed by cycles started this tick.
    pub consumed: u64,
    pub produced: Vec<Production>,
    /// Input units lost to failed cycles completing this tick.
    pub scrapped: u64,
    /// Entries moved Input to Output by a pass-through step.
    pub passed: u32,
    /// Orders whose tagged entries this step handled without producing.
    pub passed_orders: Vec<OrderId>,
    /// Orders that had inputs committed on their behalf this tick.
    pub started_orders: Vec<OrderId>,
    pub cycles_started: u32,
    pub cycles_failed: u32,
    pub error: Option<UnitError>,
}

impl StepOutcome {
    fn new(step: ProcessStepId, state: StepState) -> Self {
        Self {
            step,
            state,
            status: UnitStatus::Idle,
            consumed: 0,
            produced: Vec::new(),
            scrapped: 0,
            passed: 0,
            passed_orders: Vec::new(),
            started_orders: Vec::new(),
            cycles_started: 0,
            cycles_failed: 0,
            error: None,
        }
    }

    pub fn produced_total(&self) -> u64 {
        self.produced.iter().map(|p| u64::from(p.quantity)).sum()
    }
}

// ---------------------------------------------------------------------------
// run_step
// ---------------------------------------------------------------------------

/// Advance one active step by one tick.
pub fn run_step(
    ctx: &StepContext<'_>,
    id: ProcessStepId,
    step: &ProcessStep,
    state: StepState,
) -> StepOutcome {
    let mut outcome = StepOutcome::new(id, state);
    let result = match recipe::resolve(ctx.registry, step.recipe) {
        Ok(resolved) => run_recipe(ctx, id, step, &resolved, &mut outcome),
        // Cycles started under a recipe that was since swapped out still finish.
        Err(RecipeError::NoRecipe) => complete_due(ctx, step, &mut outcome)
            .and_then(|completed| run_pass_through(ctx, step, completed, &mut outcome)),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        outcome.status = UnitStatus::Error;
        outcome.error = Some(e);
    }
    outcome
}

fn run_recipe(
    ctx: &StepContext<'_>,
    id: ProcessStepId,
    step: &ProcessStep,
    recipe: &ResolvedRecipe,
    outcome: &mut StepOutcome,
) -> Result<(), UnitError> {
    let mut completed = complete_due(ctx, step, outcome)?;
    let blocked = start_cycles(ctx, id, step, recipe, outcome)?;
    // Single-tick cycles finish in the tick they start.
    completed += complete_due(ctx, step, outcome)?;

    outcome.status = if outcome.cycles_started > 0 && outcome.cycles_failed == outcome.cycles_started {
        UnitStatus::Error
    } else if blocked {
        UnitStatus::Blocked
    } else if outcome.cycles_started > 0 || completed > 0 || !outcome.state.in_flight.is_empty() {
        UnitStatus::Running
    } else {
        UnitStatus::Idle
    };
    Ok(())
}

/// Finish every in-flight cycle due at or before this tick.
fn complete_due(
    ctx: &StepContext<'_>,
    step: &ProcessStep,
    outcome: &mut StepOutcome,
) -> Result<u32, UnitError> {
    let (due, pending): (Vec<Cycle>, Vec<Cycle>) = std::mem::take(&mut outcome.state.in_flight)
        .into_iter()
        .partition(|c| c.completes_at <= ctx.tick);
    outcome.state.in_flight = pending;

    let mut completed = 0;
    for cycle in due {
        if cycle.failed {
            outcome.scrapped += u64::from(cycle.inputs);
        } else {
            ctx.inventories
                .add_held(step.inventory, Lane::Output, &cycle.outputs, cycle.order, ctx.tick)?;
            for output in &cycle.outputs {
                outcome.state.units_produced += u64::from(output.quantity);
                outcome.produced.push(Production {
                    material: output.material,
                    quantity: output.quantity,
                    order: cycle.order,
                });
            }
        }
        outcome.state.cycles_completed += 1;
        completed += 1;
    }
    Ok(completed)
}

/// Start as many cycles as rate, speed, stock and capacity allow.
/// Returns true when output capacity was the limiting factor.
fn start_cycles(
    ctx: &StepContext<'_>,
    id: ProcessStepId,
    step: &ProcessStep,
    recipe: &ResolvedRecipe,
    outcome: &mut StepOutcome,
) -> Result<bool, UnitError> {
    let total_in = recipe.total_input();
    let total_out = recipe.total_output();
    let slots = step
        .recipe_rate
        .saturating_sub(outcome.state.in_flight.len() as u32);
    let by_speed = step.input_speed.checked_div(total_in).unwrap_or(slots);
    let wanted = slots.min(by_speed);
    if wanted == 0 {
        return Ok(false);
    }

    let assigned = ctx.orders.preferred_for(id, |m| recipe.produces(m));
    let mut rng = SimRng::for_unit(ctx.seed, ctx.tick, key_bits(id));
    let completes_at = ctx.tick + u64::from(step.duration.max(1)) - 1;

    for _ in 0..wanted {
        let free = ctx.inventories.free_capacity(step.inventory)?;
        if free + total_in < total_out {
            return inputs_available(ctx.inventories, step.inventory, recipe).map_err(UnitError::from);
        }
        let Some(consumed) = take_inputs(ctx.inventories, step.inventory, recipe)? else {
            break;
        };

        let order = consumed.iter().find_map(|e| e.order).or(assigned);
        let failed = rng.chance(step.error_rate);
        if !failed {
            ctx.inventories.hold(step.inventory, total_out)?;
        }
        if let Some(order) = order
            && !outcome.started_orders.contains(&order)
        {
            outcome.started_orders.push(order);
        }

        outcome.consumed += u64::from(total_in);
        outcome.state.in_flight.push(Cycle {
            started_at: ctx.tick,
            completes_at,
            outputs: recipe.outputs.clone(),
            inputs: total_in,
            failed,
            order,
        });
        outcome.state.cycles_started += 1;
        outcome.cycles_started += 1;
        if failed {
            outcome.state.cycles_failed += 1;
            outcome.cycles_failed += 1;
        }
    }
    Ok(false)
}

fn inputs_available(
    inventories: &InventoryStore,
    inventory: InventoryId,
    recipe: &ResolvedRecipe,
) -> Result<bool, InventoryError> {
    inventories.with(inventory, |inv| {
        recipe.inputs.iter().all(|input| {
            inv.available_where(|e| e.lane == Lane::Input && e.material == input.material)
                >= input.quantity
        })
    })
}

/// Reserve every recipe input, then commit them together. `None` when any
/// input is short; nothing is consumed in that case.
fn take_inputs(
    inventories: &InventoryStore,
    inventory: InventoryId,
    recipe: &ResolvedRecipe,
) -> Result<Option<Vec<InventoryEntry>>, UnitError> {
    let mut reservations = Vec::with_capacity(recipe.inputs.len());
    for input in &recipe.inputs {
        match inventories.reserve(inventory, Lane::Input, input.material, input.quantity) {
            Ok(reservation) => reservations.push(reservation),
            Err(err) => {
                for reservation in reservations {
                    inventories.release(reservation)?;
                }
                return match err {
                    InventoryError::InsufficientStock { .. } => Ok(None),
                    other => Err(other.into()),
                };
            }
        }
    }

    let mut consumed = Vec::with_capacity(recipe.total_input() as usize);
    for reservation in reservations {
        consumed.extend(inventories.commit(reservation)?);
    }
    Ok(Some(consumed))
}

fn run_pass_through(
    ctx: &StepContext<'_>,
    step: &ProcessStep,
    completed: u32,
    outcome: &mut StepOutcome,
) -> Result<(), UnitError> {
    let limit = step.input_speed.min(step.output_speed);
    let reservation = ctx
        .inventories
        .reserve_up_to(step.inventory, limit, |e| e.lane == Lane::Input)?;
    let moved = ctx.inventories.commit(reservation)?;
    let items: Vec<(MaterialId, Option<OrderId>)> =
        moved.iter().map(|e| (e.material, e.order)).collect();
    ctx.inventories
        .insert(step.inventory, Lane::Output, &items, ctx.tick)?;

    for order in items.iter().filter_map(|(_, order)| *order) {
        if !outcome.passed_orders.contains(&order) {
            outcome.passed_orders.push(order);
        }
    }
    outcome.passed = items.len() as u32;
    outcome.state.units_passed += items.len() as u64;
    outcome.status = if items.is_empty() && completed == 0 && outcome.state.in_flight.is_empty() {
        UnitStatus::Idle
    } else {
        UnitStatus::Running
    };
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
