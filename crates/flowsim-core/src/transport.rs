//! Transport Engine: moves material along directed edges of the plant graph.
//!
//! Each transport owns an in-transit buffer inventory. A tick has two halves
//! run in separate coordinator sub-phases:
//!
//! - [`pickup`] takes entries from the source step's Output lane (or from an
//!   external supply when the transport has no start step) into the buffer,
//!   stamping them with the current tick.
//! - [`deliver`] moves entries that have aged `transport_delay` ticks into the
//!   destination step's Input lane, or exports them when there is no end step.
//!
//! Transport kinds share one movement model and differ only in labelling, so
//! they dispatch through a plain enum tag.

use crate::error::UnitError;
use crate::fixed::Ticks;
use crate::id::*;
use crate::inventory::{InventoryEntry, InventoryStore, Lane};
use crate::process::ProcessStep;
use crate::registry::{MaterialQty, Registry};
use crate::sim::UnitStatus;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Transport configuration
// ---------------------------------------------------------------------------

/// Kind of transport hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Conveyor,
    Agv,
    Forklift,
    Pipe,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Only listed materials may pass.
    Allow,
    /// Listed materials may not pass.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub material: MaterialId,
    pub added_at: Ticks,
}

/// Allow-list or reject-list of materials for one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub mode: FilterMode,
    pub entries: Vec<FilterEntry>,
}

impl Filter {
    pub fn new(mode: FilterMode, materials: &[MaterialId], tick: Ticks) -> Self {
        Self {
            mode,
            entries: materials
                .iter()
                .map(|&material| FilterEntry {
                    material,
                    added_at: tick,
                })
                .collect(),
        }
    }

    pub fn permits(&self, material: MaterialId) -> bool {
        let listed = self.entries.iter().any(|e| e.material == material);
        match self.mode {
            FilterMode::Allow => listed,
            FilterMode::Reject => !listed,
        }
    }
}

/// How much an external source can still provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Supply {
    /// Never runs out.
    Unlimited,
    /// Fixed amount remaining; once zero the source stops.
    Finite { remaining: u64 },
}

/// Material entering the plant through a transport with no start step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSupply {
    pub material: MaterialId,
    pub supply: Supply,
}

impl ExternalSupply {
    /// Units available this tick, capped at `budget`.
    fn available(&self, budget: u32) -> u32 {
        match self.supply {
            Supply::Unlimited => budget,
            Supply::Finite { remaining } => budget.min(remaining.min(u64::from(u32::MAX)) as u32),
        }
    }

    fn draw(&mut self, quantity: u32) {
        if let Supply::Finite { remaining } = &mut self.supply {
            *remaining = remaining.saturating_sub(u64::from(quantity));
        }
    }
}

/// A directed edge in the plant graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSystem {
    pub name: String,
    pub kind: TransportKind,
    pub active: bool,
    pub status: UnitStatus,
    /// Max entries picked up per tick.
    pub input_speed: u32,
    /// Max entries delivered per tick.
    pub output_speed: u32,
    /// Pickups happen in whole batches of this size. 0 or 1 disables gating.
    pub min_quantity: u32,
    /// Ticks an entry spends in transit before it may be delivered.
    pub transport_delay: u32,
    pub filter: Option<Filter>,
    pub start: Option<ProcessStepId>,
    pub end: Option<ProcessStepId>,
    pub supply: Option<ExternalSupply>,
    pub inventory: InventoryId,
}

impl TransportSystem {
    pub fn permits(&self, material: MaterialId) -> bool {
        self.filter.as_ref().is_none_or(|f| f.permits(material))
    }

    fn batch_size(&self) -> u32 {
        self.min_quantity.max(1)
    }
}

/// Cumulative movement counters, tracked in SoA storage next to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub picked_up: u64,
    pub delivered: u64,
    pub exported: u64,
    pub errors: u64,
}

impl TransportStats {
    /// Monotonic counter read by throughput sensors.
    pub fn throughput_counter(&self) -> u64 {
        self.delivered + self.exported
    }
}

// ---------------------------------------------------------------------------
// Tick results
// ---------------------------------------------------------------------------

/// Read-only view of the plant handed to each transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportContext<'a> {
    pub tick: Ticks,
    pub registry: &'a Registry,
    pub inventories: &'a InventoryStore,
    pub steps: &'a SlotMap<ProcessStepId, ProcessStep>,
}

#[derive(Debug, Clone)]
pub struct PickupOutcome {
    pub transport: TransportId,
    pub picked_up: u32,
    /// Units drawn from external supply; these enter the plant this tick.
    pub entered: u32,
    /// Supply state after this tick's draw.
    pub supply: Option<ExternalSupply>,
    /// True when a batch could not be formed.
    pub gated: bool,
    pub orders: Vec<OrderId>,
    pub error: Option<UnitError>,
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub transport: TransportId,
    pub delivered: u32,
    pub exported: Vec<MaterialQty>,
    /// True when destination capacity stopped eligible entries from moving.
    pub blocked: bool,
    pub orders: Vec<OrderId>,
    pub error: Option<UnitError>,
}

impl DeliveryOutcome {
    pub fn exported_total(&self) -> u32 {
        self.exported.iter().map(|e| e.quantity).sum()
    }
}

// ---------------------------------------------------------------------------
// Pickup
// ---------------------------------------------------------------------------

/// Fill the in-transit buffer from the source.
pub fn pickup(ctx: &TransportContext<'_>, id: TransportId, transport: &TransportSystem) -> PickupOutcome {
    let mut outcome = PickupOutcome {
        transport: id,
        picked_up: 0,
        entered: 0,
        supply: transport.supply.clone(),
        gated: false,
        orders: Vec::new(),
        error: None,
    };
    let result = match transport.start {
        Some(step) => pickup_from_step(ctx, transport, step, &mut outcome),
        None => pickup_from_supply(ctx, id, transport, &mut outcome),
    };
    if let Err(e) = result {
        outcome.error = Some(e);
    }
    outcome
}

/// Largest whole number of batches within `budget`. Sets `gated` when a
/// batch transport moves nothing, whether the source is short or the buffer
/// has no room for a whole batch.
fn batch_take(transport: &TransportSystem, available: u32, budget: u32, gated: &mut bool) -> u32 {
    let batch = transport.batch_size();
    let take = available.min(budget);
    let take = take - take % batch;
    *gated = take == 0 && batch > 1;
    take
}

fn pickup_from_step(
    ctx: &TransportContext<'_>,
    transport: &TransportSystem,
    step: ProcessStepId,
    outcome: &mut PickupOutcome,
) -> Result<(), UnitError> {
    let source = ctx.steps.get(step).ok_or(UnitError::UnknownStep(step))?.inventory;
    let eligible = |e: &InventoryEntry| e.lane == Lane::Output && transport.permits(e.material);

    let free = ctx.inventories.free_capacity(transport.inventory)?;
    let budget = transport.input_speed.min(free);
    let available = ctx.inventories.available_where(source, eligible)?;
    let take = batch_take(transport, available, budget, &mut outcome.gated);
    if take == 0 {
        return Ok(());
    }

    let reservation = ctx.inventories.reserve_up_to(source, take, eligible)?;
    let moved = ctx.inventories.commit(reservation)?;
    let items: Vec<(MaterialId, Option<OrderId>)> =
        moved.iter().map(|e| (e.material, e.order)).collect();
    ctx.inventories
        .insert(transport.inventory, Lane::Input, &items, ctx.tick)?;

    outcome.picked_up = items.len() as u32;
    outcome.orders = collect_orders(&items);
    Ok(())
}

fn pickup_from_supply(
    ctx: &TransportContext<'_>,
    id: TransportId,
    transport: &TransportSystem,
    outcome: &mut PickupOutcome,
) -> Result<(), UnitError> {
    let Some(supply) = outcome.supply.as_mut() else {
        return Err(UnitError::MissingSupply(id));
    };
    if !transport.permits(supply.material) {
        return Ok(());
    }

    let free = ctx.inventories.free_capacity(transport.inventory)?;
    let budget = transport.input_speed.min(free);
    let available = supply.available(u32::MAX);
    let take = batch_take(transport, available, budget, &mut outcome.gated);
    if take == 0 {
        return Ok(());
    }

    ctx.inventories
        .add(transport.inventory, Lane::Input, supply.material, take, None, ctx.tick)?;
    supply.draw(take);
    outcome.picked_up = take;
    outcome.entered = take;
    Ok(())
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Move aged entries out of the in-transit buffer.
pub fn deliver(ctx: &TransportContext<'_>, id: TransportId, transport: &TransportSystem) -> DeliveryOutcome {
    let mut outcome = DeliveryOutcome {
        transport: id,
        delivered: 0,
        exported: Vec::new(),
        blocked: false,
        orders: Vec::new(),
        error: None,
    };
    if let Err(e) = deliver_inner(ctx, transport, &mut outcome) {
        outcome.error = Some(e);
    }
    outcome
}

fn deliver_inner(
    ctx: &TransportContext<'_>,
    transport: &TransportSystem,
    outcome: &mut DeliveryOutcome,
) -> Result<(), UnitError> {
    let tick = ctx.tick;
    let delay = u64::from(transport.transport_delay);
    let eligible = |e: &InventoryEntry| tick.saturating_sub(e.added_at) >= delay;

    let ready = ctx.inventories.available_where(transport.inventory, eligible)?;
    let wanted = transport.output_speed.min(ready);
    if wanted == 0 {
        return Ok(());
    }

    let destination = match transport.end {
        Some(step) => Some(ctx.steps.get(step).ok_or(UnitError::UnknownStep(step))?),
        None => None,
    };
    let count = match destination {
        Some(dest) => {
            let free = ctx
                .inventories
                .free_capacity(dest.inventory)?
                .saturating_sub(dest.output_headroom(ctx.registry));
            outcome.blocked = free < wanted;
            wanted.min(free)
        }
        None => wanted,
    };
    if count == 0 {
        return Ok(());
    }

    let reservation = ctx
        .inventories
        .reserve_up_to(transport.inventory, count, eligible)?;
    let moved = ctx.inventories.commit(reservation)?;
    let items: Vec<(MaterialId, Option<OrderId>)> =
        moved.iter().map(|e| (e.material, e.order)).collect();
    outcome.orders = collect_orders(&items);

    match destination {
        Some(dest) => {
            ctx.inventories.insert(dest.inventory, Lane::Input, &items, tick)?;
            outcome.delivered = items.len() as u32;
        }
        None => {
            for (material, _) in &items {
                match outcome.exported.iter_mut().find(|e| e.material == *material) {
                    Some(existing) => existing.quantity += 1,
                    None => outcome.exported.push(MaterialQty::new(*material, 1)),
                }
            }
        }
    }
    Ok(())
}

fn collect_orders(items: &[(MaterialId, Option<OrderId>)]) -> Vec<OrderId> {
    let mut orders: Vec<OrderId> = items.iter().filter_map(|(_, order)| *order).collect();
    orders.sort();
    orders.dedup();
    orders
}

/// Status for a transport after both halves of its tick.
pub fn transport_status(
    pickup: Option<&PickupOutcome>,
    delivery: Option<&DeliveryOutcome>,
    in_transit: u32,
) -> UnitStatus {
    let errored = pickup.is_some_and(|p| p.error.is_some()) || delivery.is_some_and(|d| d.error.is_some());
    if errored {
        return UnitStatus::Error;
    }
    if delivery.is_some_and(|d| d.blocked) {
        return UnitStatus::Blocked;
    }
    let moved = pickup.is_some_and(|p| p.picked_up > 0)
        || delivery.is_some_and(|d| d.delivered > 0 || !d.exported.is_empty());
    if moved || in_transit > 0 {
        UnitStatus::Running
    } else {
        UnitStatus::Idle
    }
}

// ===========================================================================
// Tests
// ===========================================================================
