use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default, so a layout may give any subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed for failure draws.
    pub seed: u64,
    /// Per-unit, per-tick time budget. A unit that overruns is marked `error`.
    pub unit_deadline_ms: Option<u64>,
    /// Maximum telemetry entries retained. Extra records are dropped and counted.
    pub log_capacity: Option<usize>,
    /// Check conservation and capacity after every tick.
    pub check_invariants: bool,
    /// Executed commands kept for inspection. 0 keeps none.
    pub command_history: usize,
    /// Spread independent partitions across the rayon pool. Only takes effect
    /// when built with the `parallel` feature; results are identical either way.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            unit_deadline_ms: None,
            log_capacity: None,
            check_invariants: true,
            command_history: 0,
            parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}
