//! Per-tick result types, the material ledger and the state hash.

use crate::command_queue::{Command, CommandError};
use crate::error::UnitError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::order::OrderTransition;
use crate::sensor::LogEntry;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unit status
// ---------------------------------------------------------------------------

/// Status of a process step or transport, set once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Idle,
    Running,
    /// Limited by downstream capacity.
    Blocked,
    /// Every attempted cycle failed, or the unit raised an error.
    Error,
}

impl UnitStatus {
    /// Numeric code used by status sensors.
    pub fn code(self) -> i32 {
        match self {
            UnitStatus::Idle => 0,
            UnitStatus::Running => 1,
            UnitStatus::Blocked => 2,
            UnitStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Idle => "idle",
            UnitStatus::Running => "running",
            UnitStatus::Blocked => "blocked",
            UnitStatus::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Material ledger
// ---------------------------------------------------------------------------

/// Running totals used to check material conservation.
///
/// `held == initial + entered + produced - consumed - exported` after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLedger {
    /// Entries present when the plant was loaded.
    pub initial: u64,
    /// Units drawn from external supplies.
    pub entered: u64,
    /// Units placed by completed cycles.
    pub produced: u64,
    /// Units consumed by started cycles.
    pub consumed: u64,
    /// Units that left through sink transports.
    pub exported: u64,
    /// Consumed units lost to failed cycles. Part of `consumed`.
    pub scrapped: u64,
}

impl MaterialLedger {
    pub fn expected_held(&self) -> i64 {
        let inflow = self.initial + self.entered + self.produced;
        let outflow = self.consumed + self.exported;
        inflow as i64 - outflow as i64
    }

    /// Movement between `before` and now.
    pub fn delta_since(&self, before: &MaterialLedger) -> MaterialLedger {
        MaterialLedger {
            initial: 0,
            entered: self.entered - before.entered,
            produced: self.produced - before.produced,
            consumed: self.consumed - before.consumed,
            exported: self.exported - before.exported,
            scrapped: self.scrapped - before.scrapped,
        }
    }
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProgress {
    pub order: OrderId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
    pub order: OrderId,
    pub transition: OrderTransition,
}

/// An isolated failure of one unit during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: UnitId,
    pub error: UnitError,
}

/// A command that was applied as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub command: Command,
    pub error: CommandError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor: SensorId,
    pub value: Fixed64,
    pub log_entry: Option<LogEntryId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub pending: PendingOrderId,
    pub order: OrderId,
}

/// Everything that happened during one committed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: Ticks,
    /// Units of each order's material produced on its behalf this tick.
    pub produced_by_order: Vec<OrderProgress>,
    pub errors: Vec<UnitFailure>,
    pub sensor_samples: Vec<SensorReading>,
    pub created_orders: Vec<CreatedOrder>,
    pub command_failures: Vec<CommandFailure>,
    pub order_changes: Vec<OrderChange>,
    /// Ledger movement during this tick.
    pub ledger: MaterialLedger,
    /// Log entries appended this tick.
    pub log_entries: Vec<LogEntry>,
    /// Log records dropped this tick because the log was full.
    pub log_failures: u64,
    pub state_hash: u64,
}

impl TickReport {
    pub fn new(tick: Ticks) -> Self {
        Self {
            tick,
            produced_by_order: Vec::new(),
            errors: Vec::new(),
            sensor_samples: Vec::new(),
            created_orders: Vec::new(),
            command_failures: Vec::new(),
            order_changes: Vec::new(),
            ledger: MaterialLedger::default(),
            log_entries: Vec::new(),
            log_failures: 0,
            state_hash: 0,
        }
    }

    pub fn produced_for(&self, order: OrderId) -> u32 {
        self.produced_by_order
            .iter()
            .filter(|p| p.order == order)
            .map(|p| p.quantity)
            .sum()
    }

    /// The real id for an order created through the command queue.
    pub fn resolve_order(&self, pending: PendingOrderId) -> Option<OrderId> {
        self.created_orders
            .iter()
            .find(|c| c.pending == pending)
            .map(|c| c.order)
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for divergence detection.
///
/// Uses FNV-1a (64-bit). Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_balances() {
        let ledger = MaterialLedger {
            initial: 4,
            entered: 10,
            produced: 3,
            consumed: 6,
            exported: 2,
            scrapped: 1,
        };
        assert_eq!(ledger.expected_held(), 9);
        let before = MaterialLedger {
            entered: 8,
            consumed: 6,
            ..ledger
        };
        let delta = ledger.delta_since(&before);
        assert_eq!(delta.entered, 2);
        assert_eq!(delta.consumed, 0);
    }

    #[test]
    fn status_codes_are_distinct() {
        let codes: Vec<i32> = [
            UnitStatus::Idle,
            UnitStatus::Running,
            UnitStatus::Blocked,
            UnitStatus::Error,
        ]
        .iter()
        .map(|s| s.code())
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_u32(7);
        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_u32(7);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_u32(2);
        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_u32(1);
        assert_ne!(h1.finish(), h2.finish());
    }
}
