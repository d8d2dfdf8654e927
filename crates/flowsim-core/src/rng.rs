//! Deterministic PRNG for failure draws.
//!
//! Uses SplitMix64. Each unit gets its own stream per tick, derived from the
//! engine seed, the tick and the unit's key, so draws do not depend on the
//! order in which partitions are scheduled.

use crate::fixed::{Fixed64, Ticks};

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Stream for one unit during one tick.
    pub fn for_unit(seed: u64, tick: Ticks, unit: u64) -> Self {
        let mut mix = SimRng::new(seed ^ unit.wrapping_mul(0xD6E8_FEB8_6659_FD93));
        let base = mix.next_u64();
        Self::new(base ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Returns `true` with the given probability (Fixed64 in [0, 1]).
    ///
    /// - probability <= 0 always returns false
    /// - probability >= 1 always returns true
    pub fn chance(&mut self, probability: Fixed64) -> bool {
        if probability <= Fixed64::ZERO {
            return false;
        }
        if probability >= Fixed64::ONE {
            return true;
        }
        // For p in (0,1) the raw Q32.32 bits are the fraction scaled to [0, 2^32).
        let upper = self.next_u64() >> 32;
        upper < probability.to_bits() as u64
    }
}
