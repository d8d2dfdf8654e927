//! Binary snapshots of the engine via `bitcode`, with a versioned header.
//!
//! A snapshot carries the registry, the full simulation state, the config
//! and the last committed hash. Pending commands, the cancel token and any
//! attached persistence collaborator are runtime-only and not included.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::registry::Registry;
use crate::state::SimulationState;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a flowsim engine snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xF10E_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Next tick the restored engine will run.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct EngineSnapshot {
    header: SnapshotHeader,
    registry: Registry,
    state: SimulationState,
    config: EngineConfig,
    last_state_hash: u64,
}

/// Read the header of a snapshot without validating it.
///
/// bitcode has no partial decoding, so this decodes the whole payload.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: EngineSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Engine serialization methods
// ---------------------------------------------------------------------------

impl Engine {
    /// Serialize the committed engine state to a binary blob.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = EngineSnapshot {
            header: SnapshotHeader::new(self.state.tick),
            registry: self.registry.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
            last_state_hash: self.last_state_hash,
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Restore an engine from a blob produced by [`Engine::serialize`].
    ///
    /// Partitions are recomputed; the command queue starts empty.
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializeError> {
        let snapshot: EngineSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let mut engine = Engine::from_parts(snapshot.registry, snapshot.state, snapshot.config);
        engine.last_state_hash = snapshot.last_state_hash;
        Ok(engine)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn restored_engine_continues_identically() {
        let (mut engine, _) = build(&press_line(), EngineConfig::with_seed(7));
        run_ticks(&mut engine, 8);
        let data = engine.serialize().unwrap();
        let mut restored = Engine::deserialize(&data).unwrap();
        assert_eq!(restored.tick(), engine.tick());
        assert_eq!(restored.state_hash(), engine.state_hash());
        assert_eq!(restored.partitions(), engine.partitions());

        for _ in 0..8 {
            let a = engine.step().unwrap();
            let b = restored.step().unwrap();
            assert_eq!(a.state_hash, b.state_hash);
            assert_eq!(a.log_entries, b.log_entries);
        }
    }

    #[test]
    fn header_records_tick() {
        let (mut engine, _) = build(&smelter_line(), EngineConfig::default());
        run_ticks(&mut engine, 3);
        let header = read_snapshot_header(&engine.serialize().unwrap()).unwrap();
        assert_eq!(header, SnapshotHeader::new(3));
    }

    #[test]
    fn header_validation() {
        let mut header = SnapshotHeader::new(0);
        assert!(header.validate().is_ok());
        header.version = FORMAT_VERSION + 1;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::FutureVersion(_))
        ));
        header.magic = 0xDEAD_BEEF;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            Engine::deserialize(&[1, 2, 3]),
            Err(DeserializeError::Decode(_))
        ));
    }
}
