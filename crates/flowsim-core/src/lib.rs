//! Flowsim Core -- a tick-based production-flow simulation engine.
//!
//! Material moves through a directed graph of process steps and transport
//! systems. Steps consume and produce under recipe and capacity constraints,
//! transports carry entries between step inventories, orders accumulate
//! output, and sensors sample unit state into an append-only telemetry log.
//!
//! # Tick Pipeline
//!
//! Each call to [`engine::Engine::advance`] (or [`engine::Engine::step`])
//! runs one tick through these sub-phases:
//!
//! 1. **Collect** -- Apply queued commands (orders, activation, recipe swaps).
//! 2. **Pickup** -- Transports take eligible output from their start step
//!    (or external supply) into their in-transit buffers.
//! 3. **Produce** -- Steps complete due cycles and start new ones.
//! 4. **Deliver** -- Transports hand matured entries to their end step, or
//!    export them when they have none.
//! 5. **Sample** -- Due sensors read unit state; readings are logged.
//! 6. **Reconcile** -- Check conservation and capacity, flush to
//!    persistence, commit and hash.
//!
//! A unit's failure is isolated to that unit. A coordinator-level failure,
//! or cancellation, discards the whole tick.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- The coordinator; owns all state.
//! - [`layout::PlantLayout`] -- Name-based graph description loaded at startup.
//! - [`inventory::InventoryStore`] -- Capacity-bounded inventories with
//!   reserve/commit and per-inventory locking.
//! - [`registry::Registry`] -- Materials and recipes, frozen at load.
//! - [`order::OrderTracker`] -- Order state machine and traceability.
//! - [`sensor::TelemetryLog`] -- Append-only log of sensor readings and events.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.
//! - [`serialize`] -- Versioned binary snapshots via bitcode.

pub mod command_queue;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod id;
pub mod inventory;
pub mod layout;
pub mod model;
pub mod order;
pub mod partition;
pub mod persistence;
pub mod process;
pub mod profiling;
pub mod query;
pub mod recipe;
pub mod registry;
pub mod rng;
pub mod sensor;
pub mod serialize;
pub mod sim;
pub mod state;
pub mod transport;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
