//! Command queue for externally-submitted plant changes.
//!
//! Commands are queued by the API or CLI layer at any time and applied at the
//! start of the next tick, during the collect sub-phase, in submission order.

use crate::fixed::Ticks;
use crate::id::*;
use crate::order::{OrderError, OrderSpec};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

/// A single command that can be submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Create an order. The tick report maps `pending` to the new OrderId.
    CreateOrder {
        pending: PendingOrderId,
        order: OrderSpec,
    },
    CancelOrder { order: OrderId },
    /// Activate or deactivate a step or transport.
    SetActive { unit: UnitId, active: bool },
    /// Replace a step's recipe. Cycles already in flight finish unchanged.
    SwapRecipe {
        step: ProcessStepId,
        recipe: Option<RecipeId>,
    },
    SetSensorDelay { sensor: SensorId, delay: u32 },
}

/// Why a command was applied as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("unknown unit {0:?}")]
    UnknownUnit(UnitId),
    #[error("unknown sensor {0:?}")]
    UnknownSensor(SensorId),
    #[error("unknown recipe {0:?}")]
    UnknownRecipe(RecipeId),
    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// A queue of commands waiting for the next tick boundary.
///
/// Supports optional history tracking for debugging.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Vec<Command>,
    /// Executed commands: (tick, command).
    history: Vec<(Ticks, Command)>,
    /// Maximum history entries to retain. 0 = no history.
    max_history: usize,
    next_pending_order: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that retains up to `max_history` executed commands.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            max_history,
            ..Self::default()
        }
    }

    pub fn push(&mut self, command: Command) {
        self.pending.push(command);
    }

    pub fn push_batch(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.pending.extend(commands);
    }

    /// Queue an order creation and return the handle the tick report resolves.
    pub fn create_order(&mut self, order: OrderSpec) -> PendingOrderId {
        let pending = PendingOrderId(self.next_pending_order);
        self.next_pending_order += 1;
        self.pending.push(Command::CreateOrder { pending, order });
        pending
    }

    /// Drain all pending commands, recording them in history under `tick`.
    pub fn drain(&mut self, tick: Ticks) -> Vec<Command> {
        let commands: Vec<Command> = self.pending.drain(..).collect();

        if self.max_history > 0 {
            for cmd in &commands {
                self.history.push((tick, cmd.clone()));
            }
            let excess = self.history.len().saturating_sub(self.max_history);
            if excess > 0 {
                self.history.drain(..excess);
            }
        }

        commands
    }

    /// Put commands from a rolled-back tick back in front of anything queued since.
    pub fn requeue(&mut self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        let later = std::mem::replace(&mut self.pending, commands);
        self.pending.extend(later);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn history(&self) -> &[(Ticks, Command)] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn make_order_id() -> OrderId {
        let mut sm = SlotMap::<OrderId, ()>::with_key();
        sm.insert(())
    }

    fn make_sensor_id() -> SensorId {
        let mut sm = SlotMap::<SensorId, ()>::with_key();
        sm.insert(())
    }

    fn cancel_cmd() -> Command {
        Command::CancelOrder {
            order: make_order_id(),
        }
    }

    fn delay_cmd(delay: u32) -> Command {
        Command::SetSensorDelay {
            sensor: make_sensor_id(),
            delay,
        }
    }

    #[test]
    fn new_queue_is_empty() {
        let queue = CommandQueue::new();
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_preserves_order() {
        let mut queue = CommandQueue::new();
        queue.push(cancel_cmd());
        queue.push_batch([delay_cmd(1), delay_cmd(2)]);

        let drained = queue.drain(0);
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], Command::CancelOrder { .. }));
        assert!(matches!(drained[2], Command::SetSensorDelay { delay: 2, .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn create_order_hands_out_distinct_handles() {
        let mut queue = CommandQueue::new();
        let a = queue.create_order(OrderSpec::new(MaterialId(0), 1));
        let b = queue.create_order(OrderSpec::new(MaterialId(0), 2));
        assert_ne!(a, b);
        assert_eq!(queue.pending_count(), 2);
    }

    #[test]
    fn history_tracking_and_trimming() {
        let mut queue = CommandQueue::with_max_history(3);
        queue.push_batch([delay_cmd(1), delay_cmd(2), delay_cmd(3)]);
        let _drained = queue.drain(1);
        queue.push_batch([delay_cmd(4), cancel_cmd()]);
        let _drained = queue.drain(2);

        let history = queue.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].0, 1);
        assert!(matches!(history[0].1, Command::SetSensorDelay { delay: 3, .. }));
        assert!(matches!(history[2].1, Command::CancelOrder { .. }));

        queue.clear_history();
        assert!(queue.history().is_empty());
    }

    #[test]
    fn no_history_by_default() {
        let mut queue = CommandQueue::new();
        queue.push(cancel_cmd());
        let _drained = queue.drain(10);
        assert!(queue.history().is_empty());
    }

    #[test]
    fn requeue_goes_to_front() {
        let mut queue = CommandQueue::new();
        queue.push(delay_cmd(1));
        let drained = queue.drain(0);
        queue.push(delay_cmd(2));
        queue.requeue(drained);

        let again = queue.drain(1);
        assert!(matches!(again[0], Command::SetSensorDelay { delay: 1, .. }));
        assert!(matches!(again[1], Command::SetSensorDelay { delay: 2, .. }));
    }
}
