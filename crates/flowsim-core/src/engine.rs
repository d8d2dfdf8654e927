//! The simulation coordinator: owns the plant state and runs the per-tick
//! sub-phase pipeline.
//!
//! # Sub-phases
//!
//! Each `advance(tick)` runs, in order:
//! 1. **Collect** -- apply queued commands (orders, activation, recipe swaps)
//! 2. **Pickup** -- transports fill their in-transit buffers
//! 3. **Produce** -- process steps complete and start cycles
//! 4. **Deliver** -- transports move aged entries to their destination or sink
//! 5. **Sample** -- due sensors read their unit and log the reading
//! 6. **Reconcile** -- check capacity and conservation, hash, flush to persistence
//!
//! Engines run read-only against [`SimulationState`], touching inventories
//! only through the per-inventory locks of the store, and hand back outcome
//! values. The coordinator applies outcomes in key order. Any coordinator
//! error restores the pre-tick state, so a tick is committed whole or not at all.

use crate::command_queue::{Command, CommandError, CommandQueue};
use crate::config::EngineConfig;
use crate::error::{SimError, UnitError};
use crate::fixed::{Fixed64, Ticks, count_to_fixed64};
use crate::id::*;
use crate::inventory::Inventory;
use crate::layout::{self, LayoutError, NameIndex, PlantLayout};
use crate::order::{Order, OrderSpec, OrderTransition};
use crate::partition::{self, Partition};
use crate::persistence::Persistence;
use crate::process::{self, ProcessStep, StepContext, StepOutcome, StepState};
use crate::registry::Registry;
use crate::sensor::{self, LogEntry, LogInputType, LogRecord, Sample, Sensor, TelemetryLog};
use crate::sim::{
    CommandFailure, CreatedOrder, MaterialLedger, OrderChange, OrderProgress, SensorReading,
    TickReport, UnitFailure, UnitStatus,
};
use crate::state::SimulationState;
use crate::transport::{
    self, DeliveryOutcome, PickupOutcome, TransportContext, TransportStats, TransportSystem,
};
use slotmap::SecondaryMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag for canceling ticks from another thread, e.g. on shutdown.
///
/// Checked before a tick and between sub-phases. A canceled tick is discarded
/// whole. The flag stays set until [`CancelToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The simulation coordinator. The only component with global visibility.
pub struct Engine {
    /// Materials and recipes, frozen at load.
    pub(crate) registry: Registry,

    /// Everything that evolves tick to tick.
    pub(crate) state: SimulationState,

    pub(crate) config: EngineConfig,

    /// Commands waiting for the next collect sub-phase.
    pub(crate) commands: CommandQueue,

    /// Connected components of the plant graph, fixed at load.
    pub(crate) partitions: Vec<Partition>,

    /// Hash after the most recent committed tick.
    pub(crate) last_state_hash: u64,

    cancel: CancelToken,

    persistence: Option<Box<dyn Persistence>>,

    /// Timing profile for the most recent tick (profiling feature only).
    #[cfg(feature = "profiling")]
    pub(crate) last_profile: Option<crate::profiling::TickProfile>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick", &self.state.tick)
            .field("steps", &self.state.steps.len())
            .field("transports", &self.state.transports.len())
            .field("partitions", &self.partitions.len())
            .field("last_state_hash", &self.last_state_hash)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn from_parts(registry: Registry, state: SimulationState, config: EngineConfig) -> Self {
        let partitions = partition::partition(&state.steps, &state.transports);
        let last_state_hash = state.compute_hash();
        Self {
            registry,
            commands: CommandQueue::with_max_history(config.command_history),
            state,
            config,
            partitions,
            last_state_hash,
            cancel: CancelToken::new(),
            persistence: None,
            #[cfg(feature = "profiling")]
            last_profile: None,
        }
    }

    /// Resolve a layout into a ready-to-run engine.
    pub fn from_layout(
        layout: &PlantLayout,
        config: EngineConfig,
    ) -> Result<(Self, NameIndex), LayoutError> {
        let (registry, state, index) = layout::build(layout, &config)?;
        info!(
            steps = state.steps.len(),
            transports = state.transports.len(),
            orders = state.orders.len(),
            seed = config.seed,
            "plant loaded"
        );
        Ok((Self::from_parts(registry, state, config), index))
    }

    /// Load the graph from a persistence collaborator and keep it attached
    /// for end-of-tick flushes. Uses the layout's embedded engine config.
    pub fn load(mut persistence: Box<dyn Persistence>) -> Result<(Self, NameIndex), SimError> {
        let layout = persistence.load_graph()?;
        let config = layout.engine.clone().unwrap_or_default();
        let (mut engine, index) = Self::from_layout(&layout, config)?;
        engine.persistence = Some(persistence);
        Ok((engine, index))
    }

    pub fn attach_persistence(&mut self, persistence: Box<dyn Persistence>) {
        self.persistence = Some(persistence);
    }

    pub fn detach_persistence(&mut self) -> Option<Box<dyn Persistence>> {
        self.persistence.take()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub fn submit(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Queue an order. Resolve the handle with [`TickReport::resolve_order`].
    pub fn create_order(&mut self, order: OrderSpec) -> PendingOrderId {
        self.commands.create_order(order)
    }

    pub fn cancel_order(&mut self, order: OrderId) {
        self.commands.push(Command::CancelOrder { order });
    }

    pub fn set_active(&mut self, unit: impl Into<UnitId>, active: bool) {
        self.commands.push(Command::SetActive {
            unit: unit.into(),
            active,
        });
    }

    pub fn swap_recipe(&mut self, step: ProcessStepId, recipe: Option<RecipeId>) {
        self.commands.push(Command::SwapRecipe { step, recipe });
    }

    pub fn set_sensor_delay(&mut self, sensor: SensorId, delay: u32) {
        self.commands.push(Command::SetSensorDelay { sensor, delay });
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.pending_count()
    }

    pub fn command_history(&self) -> &[(Ticks, Command)] {
        self.commands.history()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // -----------------------------------------------------------------------
    // Advance
    // -----------------------------------------------------------------------

    /// Run tick `current_tick`, which must equal [`Engine::tick`].
    ///
    /// Unit-local failures are recorded in the report. Coordinator errors
    /// (invariant violations, cancellation, persistence) roll the whole tick
    /// back and re-queue its commands.
    pub fn advance(&mut self, current_tick: Ticks) -> Result<TickReport, SimError> {
        let expected = self.state.tick;
        if current_tick != expected {
            return Err(SimError::TickOutOfOrder {
                expected,
                got: current_tick,
            });
        }
        if self.cancel.is_canceled() {
            warn!(tick = current_tick, "tick canceled before start");
            return Err(SimError::Canceled { tick: current_tick });
        }

        // The log is append-only, so it stays out of the checkpoint and is
        // cut back to its mark instead.
        let log = std::mem::take(&mut self.state.log);
        let checkpoint = self.state.clone();
        self.state.log = log;
        let log_mark = self.state.log.mark();
        let commands = self.commands.drain(current_tick);
        match self.run_tick(current_tick, &commands) {
            Ok(report) => {
                debug!(
                    tick = current_tick,
                    produced = report.ledger.produced,
                    exported = report.ledger.exported,
                    errors = report.errors.len(),
                    samples = report.sensor_samples.len(),
                    "tick committed"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(tick = current_tick, error = %err, "tick rolled back");
                let mut log = std::mem::take(&mut self.state.log);
                log.truncate_to(log_mark);
                self.state = checkpoint;
                self.state.log = log;
                self.commands.requeue(commands);
                Err(err)
            }
        }
    }

    /// Run the next tick.
    pub fn step(&mut self) -> Result<TickReport, SimError> {
        self.advance(self.state.tick)
    }

    /// Run `ticks` ticks, stopping at the first coordinator error.
    pub fn run(&mut self, ticks: u64) -> Result<Vec<TickReport>, SimError> {
        (0..ticks).map(|_| self.step()).collect()
    }

    fn run_tick(&mut self, tick: Ticks, commands: &[Command]) -> Result<TickReport, SimError> {
        #[cfg(feature = "profiling")]
        let tick_start = Instant::now();

        let mut report = TickReport::new(tick);
        let ledger_before = self.state.ledger;
        let log_mark = self.state.log.next_id();
        let dropped_before = self.state.log.dropped();
        let statuses_before = self.unit_statuses();

        // Sub-phase 1: Collect.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        self.phase_collect(tick, commands, &mut report);
        self.check_canceled(tick)?;
        #[cfg(feature = "profiling")]
        let collect_dur = phase_start.elapsed();

        // Sub-phase 2: Pickup.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        let mut unit_time: SecondaryMap<TransportId, Duration> = SecondaryMap::new();
        let pickups = self.phase_pickup(tick, &mut unit_time, &mut report);
        self.check_canceled(tick)?;
        #[cfg(feature = "profiling")]
        let pickup_dur = phase_start.elapsed();

        // Sub-phase 3: Produce.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        self.phase_produce(tick, &mut report);
        self.check_canceled(tick)?;
        #[cfg(feature = "profiling")]
        let produce_dur = phase_start.elapsed();

        // Sub-phase 4: Deliver, then settle transport statuses.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        let deliveries = self.phase_deliver(tick, &mut unit_time, &mut report);
        self.settle_transports(tick, &pickups, &deliveries, &unit_time, &mut report);
        self.log_status_changes(tick, &statuses_before);
        self.check_canceled(tick)?;
        #[cfg(feature = "profiling")]
        let deliver_dur = phase_start.elapsed();

        // Sub-phase 5: Sample.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        self.phase_sample(tick, &mut report);
        self.check_canceled(tick)?;
        #[cfg(feature = "profiling")]
        let sample_dur = phase_start.elapsed();

        // Sub-phase 6: Reconcile.
        #[cfg(feature = "profiling")]
        let phase_start = Instant::now();
        self.phase_reconcile(tick, ledger_before, log_mark, dropped_before, &mut report)?;
        #[cfg(feature = "profiling")]
        {
            self.last_profile = Some(crate::profiling::TickProfile {
                collect: collect_dur,
                pickup: pickup_dur,
                produce: produce_dur,
                deliver: deliver_dur,
                sample: sample_dur,
                reconcile: phase_start.elapsed(),
                total: tick_start.elapsed(),
                tick,
            });
        }

        Ok(report)
    }

    fn check_canceled(&self, tick: Ticks) -> Result<(), SimError> {
        if self.cancel.is_canceled() {
            return Err(SimError::Canceled { tick });
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.unit_deadline_ms.map(Duration::from_millis)
    }

    // -----------------------------------------------------------------------
    // Sub-phase 1: Collect
    // -----------------------------------------------------------------------

    fn phase_collect(&mut self, tick: Ticks, commands: &[Command], report: &mut TickReport) {
        for command in commands {
            if let Err(error) = self.apply_command(tick, command, report) {
                debug!(tick, ?command, %error, "command rejected");
                report.command_failures.push(CommandFailure {
                    command: command.clone(),
                    error,
                });
            }
        }
    }

    fn apply_command(
        &mut self,
        tick: Ticks,
        command: &Command,
        report: &mut TickReport,
    ) -> Result<(), CommandError> {
        match command {
            Command::CreateOrder { pending, order } => {
                if self.registry.get_material(order.material).is_none() {
                    return Err(CommandError::UnknownMaterial(order.material));
                }
                if let Some(&step) = order
                    .assigned_steps
                    .iter()
                    .find(|s| !self.state.steps.contains_key(**s))
                {
                    return Err(CommandError::UnknownUnit(step.into()));
                }
                let id = self.state.orders.create(order.clone(), tick)?;
                info!(tick, order = ?id, quantity = order.quantity, "order created");
                report.created_orders.push(CreatedOrder {
                    pending: *pending,
                    order: id,
                });
            }
            Command::CancelOrder { order } => {
                let transition = self.state.orders.cancel(*order, tick)?;
                self.log_order_transitions(*order, &[transition], tick, report);
            }
            Command::SetActive { unit, active } => {
                let flag = match *unit {
                    UnitId::ProcessStep(id) => self.state.steps.get_mut(id).map(|s| &mut s.active),
                    UnitId::Transport(id) => self.state.transports.get_mut(id).map(|t| &mut t.active),
                };
                *flag.ok_or(CommandError::UnknownUnit(*unit))? = *active;
            }
            Command::SwapRecipe { step, recipe } => {
                if let Some(r) = recipe
                    && self.registry.get_recipe(*r).is_none()
                {
                    return Err(CommandError::UnknownRecipe(*r));
                }
                self.state
                    .steps
                    .get_mut(*step)
                    .ok_or(CommandError::UnknownUnit((*step).into()))?
                    .recipe = *recipe;
            }
            Command::SetSensorDelay { sensor, delay } => {
                self.state
                    .sensors
                    .get_mut(*sensor)
                    .ok_or(CommandError::UnknownSensor(*sensor))?
                    .sensor_delay = *delay;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sub-phase 2: Pickup
    // -----------------------------------------------------------------------

    fn phase_pickup(
        &mut self,
        tick: Ticks,
        unit_time: &mut SecondaryMap<TransportId, Duration>,
        report: &mut TickReport,
    ) -> SecondaryMap<TransportId, PickupOutcome> {
        let state = &self.state;
        let ctx = TransportContext {
            tick,
            registry: &self.registry,
            inventories: &state.inventories,
            steps: &state.steps,
        };
        let mut outcomes = map_partitions(&self.partitions, self.config.parallel, |part| {
            part.transports
                .iter()
                .filter_map(|&id| {
                    let t = state.transports.get(id).filter(|t| t.active)?;
                    Some(timed(|| transport::pickup(&ctx, id, t)))
                })
                .collect()
        });
        outcomes.sort_by_key(|(o, _)| o.transport);

        let mut applied = SecondaryMap::new();
        for (outcome, elapsed) in outcomes {
            let id = outcome.transport;
            unit_time.insert(id, elapsed);
            if let Some(t) = self.state.transports.get_mut(id)
                && t.start.is_none()
            {
                t.supply = outcome.supply.clone();
            }
            if let Some(stats) = self.state.transport_stats.get_mut(id) {
                stats.picked_up += u64::from(outcome.picked_up);
            }
            self.state.ledger.entered += u64::from(outcome.entered);
            for &order in &outcome.orders {
                self.state.orders.add_contributing_transport(order, id);
            }
            if let Some(error) = outcome.error.clone() {
                self.record_failure(id.into(), error, tick, report);
            }
            applied.insert(id, outcome);
        }
        applied
    }

    // -----------------------------------------------------------------------
    // Sub-phase 3: Produce
    // -----------------------------------------------------------------------

    fn phase_produce(&mut self, tick: Ticks, report: &mut TickReport) {
        let state = &self.state;
        let ctx = StepContext {
            tick,
            seed: self.config.seed,
            registry: &self.registry,
            inventories: &state.inventories,
            orders: &state.orders,
        };
        let mut outcomes = map_partitions(&self.partitions, self.config.parallel, |part| {
            part.steps
                .iter()
                .filter_map(|&id| {
                    let step = state.steps.get(id).filter(|s| s.active)?;
                    let prior = state.step_states.get(id).cloned().unwrap_or_default();
                    Some(timed(|| process::run_step(&ctx, id, step, prior)))
                })
                .collect()
        });
        outcomes.sort_by_key(|(o, _)| o.step);

        for (outcome, elapsed) in outcomes {
            self.apply_step_outcome(tick, outcome, elapsed, report);
        }

        for (_, step) in self.state.steps.iter_mut().filter(|(_, s)| !s.active) {
            step.status = UnitStatus::Idle;
        }
    }

    fn apply_step_outcome(
        &mut self,
        tick: Ticks,
        outcome: StepOutcome,
        elapsed: Duration,
        report: &mut TickReport,
    ) {
        let id = outcome.step;
        let ledger = &mut self.state.ledger;
        ledger.consumed += outcome.consumed;
        ledger.produced += outcome.produced_total();
        ledger.scrapped += outcome.scrapped;

        let StepOutcome {
            state: step_state,
            mut status,
            produced,
            passed_orders,
            started_orders,
            error,
            ..
        } = outcome;
        self.state.step_states.insert(id, step_state);

        for order in started_orders {
            self.state.orders.add_contributing_step(order, id);
            let live = self
                .state
                .orders
                .get(order)
                .is_some_and(|o| !o.status.is_terminal());
            if live && let Ok(Some(transition)) = self.state.orders.start(order, tick) {
                self.log_order_transitions(order, &[transition], tick, report);
            }
        }
        for production in produced {
            if let Some(order) = production.order {
                self.state.orders.add_contributing_step(order, id);
                self.credit_order(order, production.material, production.quantity, tick, report);
            }
        }
        for order in passed_orders {
            self.state.orders.add_contributing_step(order, id);
        }

        if let Some(error) = error {
            status = UnitStatus::Error;
            self.record_failure(id.into(), error, tick, report);
        }
        if let Some(error) = self.deadline_error(elapsed) {
            status = UnitStatus::Error;
            self.record_failure(id.into(), error, tick, report);
        }
        if let Some(step) = self.state.steps.get_mut(id) {
            step.status = status;
        }
    }

    /// Count a production toward its order when the material matches.
    fn credit_order(
        &mut self,
        order: OrderId,
        material: MaterialId,
        quantity: u32,
        tick: Ticks,
        report: &mut TickReport,
    ) {
        let counts = self
            .state
            .orders
            .get(order)
            .is_some_and(|o| !o.status.is_terminal() && o.material == material);
        if !counts {
            return;
        }
        match self.state.orders.record_progress(order, quantity, tick) {
            Ok(transitions) => {
                match report.produced_by_order.iter_mut().find(|p| p.order == order) {
                    Some(progress) => progress.quantity += quantity,
                    None => report.produced_by_order.push(OrderProgress { order, quantity }),
                }
                self.log_order_transitions(order, &transitions, tick, report);
            }
            Err(error) => debug!(tick, ?order, %error, "order progress ignored"),
        }
    }

    // -----------------------------------------------------------------------
    // Sub-phase 4: Deliver
    // -----------------------------------------------------------------------

    fn phase_deliver(
        &mut self,
        tick: Ticks,
        unit_time: &mut SecondaryMap<TransportId, Duration>,
        report: &mut TickReport,
    ) -> SecondaryMap<TransportId, DeliveryOutcome> {
        let state = &self.state;
        let ctx = TransportContext {
            tick,
            registry: &self.registry,
            inventories: &state.inventories,
            steps: &state.steps,
        };
        let mut outcomes = map_partitions(&self.partitions, self.config.parallel, |part| {
            part.transports
                .iter()
                .filter_map(|&id| {
                    let t = state.transports.get(id).filter(|t| t.active)?;
                    Some(timed(|| transport::deliver(&ctx, id, t)))
                })
                .collect()
        });
        outcomes.sort_by_key(|(o, _)| o.transport);

        let mut applied = SecondaryMap::new();
        for (outcome, elapsed) in outcomes {
            let id = outcome.transport;
            let total = unit_time.get(id).copied().unwrap_or_default() + elapsed;
            unit_time.insert(id, total);

            let exported = outcome.exported_total();
            if let Some(stats) = self.state.transport_stats.get_mut(id) {
                stats.delivered += u64::from(outcome.delivered);
                stats.exported += u64::from(exported);
            }
            self.state.ledger.exported += u64::from(exported);
            for &order in &outcome.orders {
                self.state.orders.add_contributing_transport(order, id);
            }
            for export in &outcome.exported {
                let name = self.registry.material_name(export.material);
                let record = LogRecord::new(LogInputType::Export)
                    .unit(id.into())
                    .material(export.material, name)
                    .value(count_to_fixed64(u64::from(export.quantity)));
                self.state.log.append(record, tick);
            }
            if let Some(error) = outcome.error.clone() {
                self.record_failure(id.into(), error, tick, report);
            }
            applied.insert(id, outcome);
        }
        applied
    }

    /// Final status of every transport once both halves of its tick ran.
    fn settle_transports(
        &mut self,
        tick: Ticks,
        pickups: &SecondaryMap<TransportId, PickupOutcome>,
        deliveries: &SecondaryMap<TransportId, DeliveryOutcome>,
        unit_time: &SecondaryMap<TransportId, Duration>,
        report: &mut TickReport,
    ) {
        let ids: Vec<TransportId> = self.state.transports.keys().collect();
        for id in ids {
            let Some(t) = self.state.transports.get(id) else {
                continue;
            };
            let mut status = if t.active {
                let in_transit = self
                    .state
                    .inventories
                    .with(t.inventory, |inv| inv.len())
                    .unwrap_or(0);
                transport::transport_status(pickups.get(id), deliveries.get(id), in_transit)
            } else {
                UnitStatus::Idle
            };
            let elapsed = unit_time.get(id).copied().unwrap_or_default();
            if let Some(error) = self.deadline_error(elapsed) {
                status = UnitStatus::Error;
                self.record_failure(id.into(), error, tick, report);
            }
            if let Some(t) = self.state.transports.get_mut(id) {
                t.status = status;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sub-phase 5: Sample
    // -----------------------------------------------------------------------

    fn phase_sample(&mut self, tick: Ticks, report: &mut TickReport) {
        let state = &self.state;
        let due: Vec<(SensorId, &Sensor)> = state
            .sensors
            .iter()
            .filter(|(_, s)| s.is_due(tick))
            .collect();

        #[cfg(feature = "parallel")]
        let samples: Vec<Option<Sample>> = {
            use rayon::prelude::*;
            due.par_iter()
                .map(|&(id, s)| sensor::sample(id, s, state))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let samples: Vec<Option<Sample>> = due
            .iter()
            .map(|&(id, s)| sensor::sample(id, s, state))
            .collect();

        for sample in samples.into_iter().flatten() {
            let Some(s) = self.state.sensors.get_mut(sample.sensor) else {
                continue;
            };
            s.value = sample.value;
            s.last_sampled = Some(tick);
            s.last_counter = sample.counter;

            let mut record = LogRecord::new(LogInputType::Sensor(s.kind))
                .sensor(sample.sensor)
                .unit(s.target.unit())
                .value(sample.value);
            if let Some(material) = s.material {
                record = record.material(material, self.registry.material_name(material));
            }
            let log_entry = self.state.log.append(record, tick);
            report.sensor_samples.push(SensorReading {
                sensor: sample.sensor,
                value: sample.value,
                log_entry,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Sub-phase 6: Reconcile
    // -----------------------------------------------------------------------

    fn phase_reconcile(
        &mut self,
        tick: Ticks,
        ledger_before: MaterialLedger,
        log_mark: LogEntryId,
        dropped_before: u64,
        report: &mut TickReport,
    ) -> Result<(), SimError> {
        if self.config.check_invariants {
            self.state
                .check_invariants()
                .map_err(|violation| SimError::CoordinatorInvariant { tick, violation })?;
        }

        self.state.tick = tick + 1;
        report.ledger = self.state.ledger.delta_since(&ledger_before);
        let after = log_mark.0.checked_sub(1).map(LogEntryId);
        report.log_entries = self.state.log.since(after).to_vec();
        report.log_failures = self.state.log.dropped() - dropped_before;
        if report.log_failures > 0 {
            warn!(tick, dropped = report.log_failures, "telemetry log full");
        }
        report.state_hash = self.state.compute_hash();

        if let Some(store) = self.persistence.as_mut() {
            store.save_tick_result(report)?;
        }
        self.last_state_hash = report.state_hash;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bookkeeping helpers
    // -----------------------------------------------------------------------

    fn unit_statuses(&self) -> Vec<(UnitId, UnitStatus)> {
        let steps = self
            .state
            .steps
            .iter()
            .map(|(id, s)| (UnitId::from(id), s.status));
        let transports = self
            .state
            .transports
            .iter()
            .map(|(id, t)| (UnitId::from(id), t.status));
        steps.chain(transports).collect()
    }

    fn log_status_changes(&mut self, tick: Ticks, before: &[(UnitId, UnitStatus)]) {
        for &(unit, old) in before {
            let Some(new) = self.state.unit_status(unit) else {
                continue;
            };
            if new == old {
                continue;
            }
            let record = LogRecord::new(LogInputType::StatusChange)
                .unit(unit)
                .value(Fixed64::from_num(new.code()))
                .detail(format!("{} -> {}", old.as_str(), new.as_str()));
            self.state.log.append(record, tick);
        }
    }

    fn log_order_transitions(
        &mut self,
        order: OrderId,
        transitions: &[OrderTransition],
        tick: Ticks,
        report: &mut TickReport,
    ) {
        for &transition in transitions {
            info!(tick, ?order, transition = transition.as_str(), "order transition");
            let mut record = LogRecord::new(LogInputType::Order)
                .order(order)
                .detail(transition.as_str());
            if let Some(o) = self.state.orders.get(order) {
                record = record
                    .material(o.material, self.registry.material_name(o.material))
                    .value(count_to_fixed64(u64::from(o.produced)));
            }
            self.state.log.append(record, tick);
            report.order_changes.push(OrderChange { order, transition });
        }
    }

    fn record_failure(&mut self, unit: UnitId, error: UnitError, tick: Ticks, report: &mut TickReport) {
        warn!(
            tick,
            unit = self.state.unit_name(unit).unwrap_or("?"),
            %error,
            "unit failed"
        );
        match unit {
            UnitId::ProcessStep(id) => {
                if let Some(s) = self.state.step_states.get_mut(id) {
                    s.unit_errors += 1;
                }
            }
            UnitId::Transport(id) => {
                if let Some(s) = self.state.transport_stats.get_mut(id) {
                    s.errors += 1;
                }
            }
        }
        let record = LogRecord::new(LogInputType::UnitFailure)
            .unit(unit)
            .detail(error.to_string());
        self.state.log.append(record, tick);
        report.errors.push(UnitFailure { unit, error });
    }

    fn deadline_error(&self, elapsed: Duration) -> Option<UnitError> {
        let deadline = self.deadline()?;
        (elapsed > deadline).then(|| UnitError::DeadlineExceeded {
            elapsed_us: elapsed.as_micros() as u64,
            deadline_us: deadline.as_micros() as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The next tick to run.
    pub fn tick(&self) -> Ticks {
        self.state.tick
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Hash after the most recent committed tick.
    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn step_ids(&self) -> impl Iterator<Item = ProcessStepId> + '_ {
        self.state.steps.keys()
    }

    pub fn transport_ids(&self) -> impl Iterator<Item = TransportId> + '_ {
        self.state.transports.keys()
    }

    pub fn get_step(&self, id: ProcessStepId) -> Option<&ProcessStep> {
        self.state.steps.get(id)
    }

    pub fn get_step_state(&self, id: ProcessStepId) -> Option<&StepState> {
        self.state.step_states.get(id)
    }

    pub fn get_transport(&self, id: TransportId) -> Option<&TransportSystem> {
        self.state.transports.get(id)
    }

    pub fn get_transport_stats(&self, id: TransportId) -> Option<&TransportStats> {
        self.state.transport_stats.get(id)
    }

    pub fn get_order(&self, id: OrderId) -> Option<&Order> {
        self.state.orders.get(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = (OrderId, &Order)> {
        self.state.orders.iter()
    }

    pub fn get_sensor(&self, id: SensorId) -> Option<&Sensor> {
        self.state.sensors.get(id)
    }

    pub fn log(&self) -> &TelemetryLog {
        &self.state.log
    }

    /// Log entries after `after`, for incremental export.
    pub fn log_since(&self, after: Option<LogEntryId>) -> &[LogEntry] {
        self.state.log.since(after)
    }

    pub fn ledger(&self) -> &MaterialLedger {
        &self.state.ledger
    }

    /// Owned copy of an inventory.
    pub fn get_inventory(&self, id: InventoryId) -> Option<Inventory> {
        self.state.inventories.snapshot(id)
    }

    /// Entries currently held across the plant.
    pub fn held(&self) -> u64 {
        self.state.held()
    }

    /// Get the timing profile from the most recent tick.
    /// Only available with the `profiling` feature.
    #[cfg(feature = "profiling")]
    pub fn last_tick_profile(&self) -> Option<&crate::profiling::TickProfile> {
        self.last_profile.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}

/// Run `f` for every partition, on the rayon pool when `parallel` is enabled
/// both in the build and in the config. Results keep partition order either way.
fn map_partitions<T, F>(partitions: &[Partition], parallel: bool, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Partition) -> Vec<T> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    if parallel {
        use rayon::prelude::*;
        let per_partition: Vec<Vec<T>> = partitions.par_iter().map(&f).collect();
        return per_partition.into_iter().flatten().collect();
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;
    partitions.iter().flat_map(f).collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Lane;
    use crate::layout::{MaterialAmount, ProcessStepLayout, SupplyLayout, TransportLayout};
    use crate::order::OrderStatus;
    use crate::test_utils::*;

    #[test]
    fn tick_must_match_engine_tick() {
        let (mut engine, _) = build(&smelter_line(), EngineConfig::default());
        assert!(matches!(
            engine.advance(3),
            Err(SimError::TickOutOfOrder { expected: 0, got: 3 })
        ));
        engine.advance(0).unwrap();
        assert_eq!(engine.tick(), 1);
    }

    #[test]
    fn supply_enters_and_smelter_produces() {
        let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
        run_ticks(&mut engine, 10);

        let smelter = names.step("smelter").unwrap();
        let inv = engine
            .get_inventory(engine.get_step(smelter).unwrap().inventory)
            .unwrap();
        let ingot = engine.registry().material_id("ingot").unwrap();
        let ingots = inv.count(Lane::Output, Some(ingot));
        let exported = engine.ledger().exported;
        assert!(ingots + exported as u32 > 0, "line produced nothing");
        assert_eq!(engine.ledger().expected_held(), engine.held() as i64);
    }

    #[test]
    fn deadline_overrun_is_isolated() {
        let config = EngineConfig {
            unit_deadline_ms: Some(0),
            ..EngineConfig::default()
        };
        let (mut engine, _) = build(&smelter_line(), config);
        let report = engine.step().unwrap();
        assert_eq!(engine.tick(), 1);
        for failure in &report.errors {
            assert!(matches!(failure.error, UnitError::DeadlineExceeded { .. }));
            assert_eq!(engine.state.unit_status(failure.unit), Some(UnitStatus::Error));
        }
        assert_eq!(engine.ledger().expected_held(), engine.held() as i64);
    }

    #[test]
    fn inactive_step_is_skipped() {
        let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
        let smelter = names.step("smelter").unwrap();
        engine.set_active(smelter, false);
        run_ticks(&mut engine, 6);
        let state = engine.get_step_state(smelter).unwrap();
        assert_eq!(state.cycles_started, 0);
        assert_eq!(engine.get_step(smelter).unwrap().status, UnitStatus::Idle);
    }

    #[test]
    fn cancel_token_rolls_back_tick() {
        let (mut engine, _) = build(&smelter_line(), EngineConfig::default());
        engine.step().unwrap();
        let hash = engine.state_hash();
        let token = engine.cancel_token();
        token.cancel();
        assert!(matches!(engine.step(), Err(SimError::Canceled { tick: 1 })));
        assert_eq!(engine.tick(), 1);
        assert_eq!(engine.state_hash(), hash);
        token.reset();
        engine.step().unwrap();
        assert_eq!(engine.tick(), 2);
    }

    #[test]
    fn invariant_violation_rolls_back_and_requeues() {
        let mut layout = smelter_line();
        layout.sensors.push(status_sensor("status", "smelter"));
        let (mut engine, names) = build(&layout, EngineConfig::default());
        engine.step().unwrap();
        let before = engine.state.compute_hash();
        // Corrupt the ledger so reconcile fails.
        engine.state.ledger.entered += 7;
        let before_corrupt = engine.state.ledger;
        let smelter = names.step("smelter").unwrap();
        engine.set_active(smelter, false);
        let log_len = engine.log().len();
        let next_id = engine.log().next_id();

        let err = engine.step().unwrap_err();
        assert!(matches!(err, SimError::CoordinatorInvariant { tick: 1, .. }));
        assert_eq!(engine.tick(), 1);
        assert_eq!(engine.state.ledger, before_corrupt);
        assert_eq!(engine.pending_commands(), 1);
        // The sample logged by the rolled-back tick is gone too.
        assert_eq!(engine.log().len(), log_len);
        assert_eq!(engine.log().next_id(), next_id);
        engine.state.ledger.entered -= 7;
        assert_eq!(engine.state.compute_hash(), before);
    }

    #[test]
    fn order_created_by_command_completes() {
        let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
        let smelter = names.step("smelter").unwrap();
        let ingot = engine.registry().material_id("ingot").unwrap();
        let pending = engine.create_order(OrderSpec::new(ingot, 2).assigned_to(smelter));
        let report = engine.step().unwrap();
        let order = report.resolve_order(pending).unwrap();
        run_ticks(&mut engine, 12);

        let o = engine.get_order(order).unwrap();
        assert_eq!(o.status, OrderStatus::Completed);
        assert!(o.started_tick.unwrap() <= o.completed_tick.unwrap());
        assert!(o.contributing_steps.contains(&smelter));
    }

    #[test]
    fn cancel_terminal_order_is_recorded_noop() {
        let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
        let smelter = names.step("smelter").unwrap();
        let ingot = engine.registry().material_id("ingot").unwrap();
        let pending = engine.create_order(OrderSpec::new(ingot, 1).assigned_to(smelter));
        let order = engine.step().unwrap().resolve_order(pending).unwrap();
        engine.cancel_order(order);
        let report = engine.step().unwrap();
        assert_eq!(report.order_changes.len(), 1);
        engine.cancel_order(order);
        let report = engine.step().unwrap();
        assert_eq!(report.command_failures.len(), 1);
        assert_eq!(engine.get_order(order).unwrap().status, OrderStatus::Canceled);
    }

    #[test]
    fn sink_transport_exports() {
        let mut layout = smelter_line();
        let mut out = TransportLayout::new("out", Some("smelter"), None, 10);
        out.input_speed = 5;
        out.output_speed = 5;
        layout.transport_systems.push(out);
        let (mut engine, names) = build(&layout, EngineConfig::default());
        let reports = run_ticks(&mut engine, 15);
        let out = names.transport("out").unwrap();
        let exported = engine.get_transport_stats(out).unwrap().exported;
        assert!(exported > 0);
        assert_eq!(engine.ledger().exported, exported);
        let export_logs = reports
            .iter()
            .flat_map(|r| &r.log_entries)
            .filter(|e| e.input_type == LogInputType::Export)
            .count();
        assert!(export_logs > 0);
    }

    #[test]
    fn swap_to_pass_through_finishes_in_flight_cycles() {
        let mut layout = smelter_line();
        layout.process_steps[0].duration = 3;
        let (mut engine, names) = build(&layout, EngineConfig::default());
        let smelter = names.step("smelter").unwrap();
        run_ticks(&mut engine, 3);
        engine.swap_recipe(smelter, None);
        run_ticks(&mut engine, 4);
        let state = engine.get_step_state(smelter).unwrap();
        assert!(state.in_flight.is_empty());
        assert!(state.units_passed > 0);
        let inv = engine
            .get_inventory(engine.get_step(smelter).unwrap().inventory)
            .unwrap();
        assert_eq!(inv.held(), 0);
    }

    #[test]
    fn unknown_recipe_swap_is_rejected() {
        let (mut engine, names) = build(&smelter_line(), EngineConfig::default());
        let smelter = names.step("smelter").unwrap();
        engine.swap_recipe(smelter, Some(RecipeId(99)));
        let report = engine.step().unwrap();
        assert!(matches!(
            report.command_failures[0].error,
            CommandError::UnknownRecipe(RecipeId(99))
        ));
    }

    #[test]
    fn status_changes_are_logged() {
        let (mut engine, _) = build(&smelter_line(), EngineConfig::default());
        let reports = run_ticks(&mut engine, 4);
        let changes = reports
            .iter()
            .flat_map(|r| &r.log_entries)
            .filter(|e| e.input_type == LogInputType::StatusChange)
            .count();
        assert!(changes > 0);
    }

    #[test]
    fn full_log_drops_without_failing_tick() {
        let mut layout = smelter_line();
        layout.sensors.push(status_sensor("s1", "smelter"));
        let config = EngineConfig {
            log_capacity: Some(1),
            ..EngineConfig::default()
        };
        let (mut engine, _) = build(&layout, config);
        let reports = run_ticks(&mut engine, 3);
        assert_eq!(engine.log().len(), 1);
        assert!(reports.iter().map(|r| r.log_failures).sum::<u64>() > 0);
    }

    #[test]
    fn persistence_receives_every_committed_tick() {
        let store = crate::persistence::MemoryStore::new(smelter_line());
        let (mut engine, _) = Engine::load(Box::new(store)).unwrap();
        run_ticks(&mut engine, 3);
        assert!(engine.detach_persistence().is_some());
    }

    #[test]
    fn finite_supply_depletes() {
        let mut layout = PlantLayout {
            materials: vec!["ore".into()],
            ..PlantLayout::default()
        };
        let mut bin = ProcessStepLayout::new("bin", 100);
        bin.input_speed = 10;
        layout.process_steps.push(bin);
        let mut feed = TransportLayout::new("feed", None, Some("bin"), 10);
        feed.input_speed = 4;
        feed.output_speed = 4;
        feed.supply = Some(SupplyLayout {
            material: "ore".into(),
            limit: Some(6),
        });
        layout.transport_systems.push(feed);
        layout.process_steps[0]
            .inventory
            .input
            .push(MaterialAmount::new("ore", 1));

        let (mut engine, _) = build(&layout, EngineConfig::default());
        run_ticks(&mut engine, 5);
        assert_eq!(engine.ledger().entered, 6);
        assert_eq!(engine.held(), 7);
    }
}
