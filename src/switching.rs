//! Crossbar switch sequences and button/channel permutation lookup tables
//! (`spec.md` §3 "Permutation", "Switch sequence"; `liberaApp/conditioning.cpp`).
//!
//! The crossbar cycles which of the four RF channels carries which button's
//! signal. For a given switch setting `sw`, `permutation(sw)[b]` is the
//! channel currently carrying button `b`. Two hardware variants ship
//! different wiring and therefore different permutation tables and default
//! switch sequences.

pub const BUTTON_COUNT: usize = 4;
pub const CHANNEL_COUNT: usize = 4;
pub const SWITCH_COUNT: usize = 16;
pub const MAX_SWITCH_SEQUENCE: usize = 16;

/// `permutation[b]` is the RF channel carrying button `b` at this switch
/// setting.
pub type Permutation = [u8; BUTTON_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareVariant {
    Electron,
    Brilliance,
}

const ELECTRON_PERMUTATIONS: [Permutation; SWITCH_COUNT] = [
    [3, 2, 1, 0],
    [3, 1, 2, 0],
    [0, 2, 1, 3],
    [0, 1, 2, 3],
    [3, 2, 0, 1],
    [3, 1, 0, 2],
    [0, 2, 3, 1],
    [0, 1, 3, 2],
    [2, 3, 1, 0],
    [1, 3, 2, 0],
    [2, 0, 1, 3],
    [1, 0, 2, 3],
    [2, 3, 0, 1],
    [1, 3, 0, 2],
    [2, 0, 3, 1],
    [1, 0, 3, 2],
];

const BRILLIANCE_PERMUTATIONS: [Permutation; SWITCH_COUNT] = [
    [2, 3, 0, 1],
    [2, 0, 3, 1],
    [3, 2, 0, 1],
    [3, 0, 2, 1],
    [2, 3, 1, 0],
    [2, 1, 3, 0],
    [3, 2, 1, 0],
    [3, 1, 2, 0],
    [1, 3, 0, 2],
    [1, 0, 3, 2],
    [1, 2, 0, 3],
    [1, 0, 2, 3],
    [0, 3, 1, 2],
    [0, 1, 3, 2],
    [0, 2, 1, 3],
    [0, 1, 2, 3],
];

/// Default 8-round switch sequence for the Electron hardware variant.
pub const ELECTRON_SWITCH_SEQUENCE: [u8; 8] = [3, 7, 15, 11, 0, 4, 12, 8];

/// Default 4-round switch sequence for the Brilliance hardware variant.
pub const BRILLIANCE_SWITCH_SEQUENCE: [u8; 4] = [15, 0, 9, 6];

impl HardwareVariant {
    pub fn permutation_table(self) -> &'static [Permutation; SWITCH_COUNT] {
        match self {
            HardwareVariant::Electron => &ELECTRON_PERMUTATIONS,
            HardwareVariant::Brilliance => &BRILLIANCE_PERMUTATIONS,
        }
    }

    pub fn permutation(self, switch: u8) -> Permutation {
        self.permutation_table()[switch as usize & 0xF]
    }

    /// The manufacturer-recommended default switch rotation for this variant.
    pub fn default_switch_sequence(self) -> Vec<u8> {
        match self {
            HardwareVariant::Electron => ELECTRON_SWITCH_SEQUENCE.to_vec(),
            HardwareVariant::Brilliance => BRILLIANCE_SWITCH_SEQUENCE.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutations_are_bijections() {
        for table in [&ELECTRON_PERMUTATIONS, &BRILLIANCE_PERMUTATIONS] {
            for perm in table {
                let mut seen = [false; BUTTON_COUNT];
                for &c in perm {
                    assert!(!seen[c as usize], "permutation {perm:?} not a bijection");
                    seen[c as usize] = true;
                }
            }
        }
    }

    #[test]
    fn default_sequences_reference_valid_switch_settings() {
        for &sw in ELECTRON_SWITCH_SEQUENCE.iter() {
            assert!((sw as usize) < SWITCH_COUNT);
        }
        for &sw in BRILLIANCE_SWITCH_SEQUENCE.iter() {
            assert!((sw as usize) < SWITCH_COUNT);
        }
    }
}
