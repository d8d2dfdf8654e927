use crate::fixed::Ticks;
use crate::id::*;
use crate::inventory::InventoryError;
use crate::layout::LayoutError;
use crate::persistence::PersistError;
use crate::recipe::RecipeError;
use serde::{Deserialize, Serialize};

/// An isolated failure of one step or transport. Recorded in the tick
/// report; never aborts the tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum UnitError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error("unknown process step {0:?}")]
    UnknownStep(ProcessStepId),
    #[error("transport {0:?} has no start step and no external supply")]
    MissingSupply(TransportId),
    #[error("unit exceeded its deadline: {elapsed_us}us > {deadline_us}us")]
    DeadlineExceeded { elapsed_us: u64, deadline_us: u64 },
}

/// A broken plant-wide invariant found during reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum InvariantViolation {
    #[error("inventory {inventory:?} holds {len} entries over limit {limit}")]
    CapacityExceeded {
        inventory: InventoryId,
        len: u32,
        limit: u32,
    },
    #[error("material not conserved: ledger expects {expected}, plant holds {held}")]
    Conservation { expected: i64, held: u64 },
}

/// Errors returned by `Engine::advance`. Any of these leaves the engine in
/// its pre-tick state.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("coordinator invariant violated at tick {tick}: {violation}")]
    CoordinatorInvariant {
        tick: Ticks,
        violation: InvariantViolation,
    },
    #[error("tick {tick} canceled")]
    Canceled { tick: Ticks },
    #[error("tick out of order: engine is at {expected}, caller asked for {got}")]
    TickOutOfOrder { expected: Ticks, got: Ticks },
    #[error(transparent)]
    Persistence(#[from] PersistError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}
