//! Determinism checking and state comparison.
//!
//! Two engines built from the same layout and config must produce the same
//! state hash and the same telemetry after every tick. When they don't,
//! [`diff_engines`] narrows down where they parted ways.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::SimError;
use crate::fixed::Ticks;
use crate::id::{InventoryId, OrderId, ProcessStepId, TransportId};
use crate::layout::PlantLayout;

// ---------------------------------------------------------------------------
// State diff
// ---------------------------------------------------------------------------

/// One point of divergence between two engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    Tick { a: Ticks, b: Ticks },
    Step(ProcessStepId),
    Transport(TransportId),
    Inventory(InventoryId),
    Order(OrderId),
    Ledger,
    Log,
}

/// Compare two engines unit by unit. Empty when their states match.
pub fn diff_engines(a: &Engine, b: &Engine) -> Vec<Divergence> {
    let (sa, sb) = (&a.state, &b.state);
    let mut diffs = Vec::new();
    if sa.tick != sb.tick {
        diffs.push(Divergence::Tick {
            a: sa.tick,
            b: sb.tick,
        });
    }
    for (id, step) in &sa.steps {
        let same = sb.steps.get(id) == Some(step) && sb.step_states.get(id) == sa.step_states.get(id);
        if !same {
            diffs.push(Divergence::Step(id));
        }
    }
    for (id, transport) in &sa.transports {
        let same = sb.transports.get(id) == Some(transport)
            && sb.transport_stats.get(id) == sa.transport_stats.get(id);
        if !same {
            diffs.push(Divergence::Transport(id));
        }
    }
    sa.inventories.for_each(|id, inv| {
        if sb.inventories.snapshot(id).as_ref() != Some(inv) {
            diffs.push(Divergence::Inventory(id));
        }
    });
    for (id, order) in sa.orders.iter() {
        if sb.orders.get(id) != Some(order) {
            diffs.push(Divergence::Order(id));
        }
    }
    if sa.ledger != sb.ledger {
        diffs.push(Divergence::Ledger);
    }
    if sa.log.entries() != sb.log.entries() {
        diffs.push(Divergence::Log);
    }
    diffs
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

/// Result of a determinism validation run.
#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// First tick whose hash or telemetry differed.
    pub divergence_tick: Option<Ticks>,
    /// Units that differed at the divergence tick.
    pub divergences: Vec<Divergence>,
    /// (tick, hash_a, hash_b) for each tick run.
    pub hash_log: Vec<(Ticks, u64, u64)>,
}

/// Build two engines from the same layout and config, run both for `ticks`
/// and compare hashes and log sequences after every tick. Stops at the
/// first divergence.
pub fn validate_determinism(
    layout: &PlantLayout,
    config: EngineConfig,
    ticks: u64,
) -> Result<DeterminismResult, SimError> {
    let (mut engine_a, _) = Engine::from_layout(layout, config.clone())?;
    let (mut engine_b, _) = Engine::from_layout(layout, config)?;

    let mut hash_log = Vec::new();
    let mut divergence_tick = None;
    let mut divergences = Vec::new();

    for _ in 0..ticks {
        let a = engine_a.step()?;
        let b = engine_b.step()?;
        hash_log.push((a.tick, a.state_hash, b.state_hash));

        if a.state_hash != b.state_hash || a.log_entries != b.log_entries {
            divergence_tick = Some(a.tick);
            divergences = diff_engines(&engine_a, &engine_b);
            break;
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_tick.is_none(),
        divergence_tick,
        divergences,
        hash_log,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn identical_engines_have_no_diff() {
        let (a, _) = build(&press_line(), EngineConfig::default());
        let (b, _) = build(&press_line(), EngineConfig::default());
        assert!(diff_engines(&a, &b).is_empty());
    }

    #[test]
    fn tick_difference_detected() {
        let (mut a, _) = build(&press_line(), EngineConfig::default());
        let (b, _) = build(&press_line(), EngineConfig::default());
        a.step().unwrap();
        let diffs = diff_engines(&a, &b);
        assert!(diffs.contains(&Divergence::Tick { a: 1, b: 0 }));
    }

    #[test]
    fn seeded_failures_are_deterministic() {
        let mut layout = press_line();
        layout.process_steps[0].error_rate = 0.3;
        let result = validate_determinism(&layout, EngineConfig::with_seed(42), 30).unwrap();
        assert!(result.is_deterministic);
        assert_eq!(result.hash_log.len(), 30);
        assert!(result.hash_log.iter().all(|(_, a, b)| a == b));
    }

    #[test]
    fn different_seeds_diverge() {
        let mut layout = press_line();
        layout.process_steps[0].error_rate = 0.5;
        let (mut a, _) = build(&layout, EngineConfig::with_seed(1));
        let (mut b, _) = build(&layout, EngineConfig::with_seed(2));
        run_ticks(&mut a, 30);
        run_ticks(&mut b, 30);
        assert_ne!(a.state_hash(), b.state_hash());
        assert!(!diff_engines(&a, &b).is_empty());
    }
}
