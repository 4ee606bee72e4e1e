// This module describes the small, fixed set of hardware targets the parser compiler
// supports. Target is a closed enum and every target-specific layout decision (row pool
// size, match-key width, input buffer size, depth granularity and limits, the shape of
// the extractor-slot universe, checksum and counter capabilities, and the output FIFO
// depth used by padding propagation) is read from the TargetCaps table returned by
// Target::caps. Matching on the enum keeps "unsupported on this target" decisions
// exhaustive at compile time.

//! Hardware target capability tables.

use std::fmt;
use std::str::FromStr;

/// Supported parser hardware generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// First generation: dedicated 8/16/32-bit extractor classes.
    Tofino,
    /// Second generation: a flat array of 16-bit extractors.
    JBay,
}

/// Shape of the extractor-slot universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUniverseShape {
    /// `slots` identical general-purpose extractors of `slot_bits` each.
    Uniform { slots: u8, slot_bits: u8 },
    /// Fixed number of extractors per width class.
    Heterogeneous { b8: u8, b16: u8, b32: u8 },
}

impl SlotUniverseShape {
    pub fn is_heterogeneous(&self) -> bool {
        matches!(self, SlotUniverseShape::Heterogeneous { .. })
    }

    /// Total number of extractor slots.
    pub fn total_slots(&self) -> u32 {
        match *self {
            SlotUniverseShape::Uniform { slots, .. } => u32::from(slots),
            SlotUniverseShape::Heterogeneous { b8, b16, b32 } => {
                u32::from(b8) + u32::from(b16) + u32::from(b32)
            }
        }
    }
}

/// Capability table for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCaps {
    pub name: &'static str,
    /// Number of TCAM rows per parser instance.
    pub tcam_rows: u16,
    /// Width of a state code.
    pub state_code_bits: u8,
    /// Bytes of input buffer available to the lookup key.
    pub key_bytes: u8,
    /// Size of the input buffer window a single match can reference.
    pub buffer_bytes: u8,
    /// Granularity of the reported depth.
    pub word_bytes: u32,
    /// Floor applied to the reported depth.
    pub min_depth_words: u32,
    /// Deepest point the parser hardware can reach.
    pub max_depth_bytes: u32,
    pub slots: SlotUniverseShape,
    pub checksum_units: u8,
    pub counter_stack: bool,
    pub clot_checksum: bool,
    /// Entries of each width class the downstream output FIFO holds.
    pub output_fifo_depth: u32,
    pub max_start_states: u8,
}

const TOFINO_CAPS: TargetCaps = TargetCaps {
    name: "tofino",
    tcam_rows: 256,
    state_code_bits: 8,
    key_bytes: 4,
    buffer_bytes: 32,
    word_bytes: 16,
    min_depth_words: 4,
    max_depth_bytes: 4096,
    slots: SlotUniverseShape::Heterogeneous { b8: 4, b16: 4, b32: 4 },
    checksum_units: 2,
    counter_stack: false,
    clot_checksum: false,
    output_fifo_depth: 8,
    max_start_states: 4,
};

const JBAY_CAPS: TargetCaps = TargetCaps {
    name: "jbay",
    tcam_rows: 256,
    state_code_bits: 8,
    key_bytes: 4,
    buffer_bytes: 32,
    word_bytes: 16,
    min_depth_words: 4,
    max_depth_bytes: 8192,
    slots: SlotUniverseShape::Uniform { slots: 20, slot_bits: 16 },
    checksum_units: 5,
    counter_stack: true,
    clot_checksum: true,
    output_fifo_depth: 8,
    max_start_states: 4,
};

impl Target {
    pub const ALL: [Target; 2] = [Target::Tofino, Target::JBay];

    pub const fn caps(self) -> TargetCaps {
        match self {
            Target::Tofino => TOFINO_CAPS,
            Target::JBay => JBAY_CAPS,
        }
    }

    pub const fn name(self) -> &'static str {
        self.caps().name
    }
}

impl TargetCaps {
    /// Minimum depth in bits; paths marked to ignore the max depth stop here.
    pub fn min_depth_bits(&self) -> u32 {
        self.min_depth_words * self.word_bytes * 8
    }

    pub fn max_depth_bits(&self) -> u32 {
        self.max_depth_bytes * 8
    }

    /// Number of distinct state codes.
    pub fn state_code_space(&self) -> u32 {
        1u32 << self.state_code_bits
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tofino" | "tofino1" => Ok(Target::Tofino),
            "jbay" | "tofino2" => Ok(Target::JBay),
            other => Err(format!("unknown target '{}'", other)),
        }
    }
}
