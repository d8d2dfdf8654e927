use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a process step (a production node) in the plant graph.
    pub struct ProcessStepId;

    /// Identifies a transport system (a directed edge) in the plant graph.
    pub struct TransportId;

    /// Identifies an inventory in the inventory store.
    pub struct InventoryId;

    /// Identifies a production order.
    pub struct OrderId;

    /// Identifies a sensor attached to a step or transport.
    pub struct SensorId;

    /// Identifies a physical location grouping steps and resources.
    pub struct LocationId;

    /// Identifies a machine or worker resource.
    pub struct ResourceId;

    /// Identifies a worker role.
    pub struct WorkerRoleId;
}

/// Identifies a material in the registry. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

/// Identifies a recipe in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipeId(pub u32);

/// Identifies a single unit of material inside one inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// Identifies a telemetry log entry. Strictly increasing in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogEntryId(pub u64);

/// A pending order ID returned from a queued create. Resolves to OrderId on apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingOrderId(pub u64);

/// A schedulable unit: the coordinator advances process steps and transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitId {
    ProcessStep(ProcessStepId),
    Transport(TransportId),
}

impl From<ProcessStepId> for UnitId {
    fn from(id: ProcessStepId) -> Self {
        UnitId::ProcessStep(id)
    }
}

impl From<TransportId> for UnitId {
    fn from(id: TransportId) -> Self {
        UnitId::Transport(id)
    }
}

/// Stable 64-bit form of a slotmap key, used for hashing and RNG streams.
pub(crate) fn key_bits(key: impl slotmap::Key) -> u64 {
    key.data().as_ffi()
}
