//! Extractor slot tracking.
//!
//! This module implements the SlotFile that records which output extractor slots a
//! single parser cycle (one match) has consumed and which extraction request owns
//! each of them. Slots are grouped in classes: the heterogeneous universe has
//! separate 8-, 16- and 32-bit classes, the uniform universe a single class of
//! general-purpose slots. Ordinary requests grow from the lowest index up;
//! checksum outputs search from the highest index down.

use super::target::SlotUniverseShape;
use std::fmt;
use thiserror::Error;

/// Maximum number of slot classes supported.
pub const MAX_SLOT_CLASSES: usize = 4;

/// Maximum number of slots per class.
pub const MAX_SLOTS_PER_CLASS: usize = 64;

/// Width class of an extractor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotClass {
    B8,
    B16,
    B32,
    /// Uniform-universe general-purpose slot.
    General,
}

impl SlotClass {
    pub const ALL: [SlotClass; 4] =
        [SlotClass::B8, SlotClass::B16, SlotClass::B32, SlotClass::General];

    const fn index(self) -> usize {
        match self {
            SlotClass::B8 => 0,
            SlotClass::B16 => 1,
            SlotClass::B32 => 2,
            SlotClass::General => 3,
        }
    }

    /// Bits one slot of this class writes.
    pub const fn bits(self) -> u32 {
        match self {
            SlotClass::B8 => 8,
            SlotClass::B16 | SlotClass::General => 16,
            SlotClass::B32 => 32,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SlotClass::B8 => "b8",
            SlotClass::B16 => "b16",
            SlotClass::B32 => "b32",
            SlotClass::General => "g",
        }
    }

    /// Native heterogeneous class for a request width.
    pub fn for_width(bits: u32) -> Option<SlotClass> {
        match bits {
            8 => Some(SlotClass::B8),
            16 => Some(SlotClass::B16),
            32 => Some(SlotClass::B32),
            _ => None,
        }
    }

    /// Class of half the width, used for narrow-to-wide fallback.
    pub fn narrower(self) -> Option<SlotClass> {
        match self {
            SlotClass::B32 => Some(SlotClass::B16),
            SlotClass::B16 => Some(SlotClass::B8),
            SlotClass::B8 | SlotClass::General => None,
        }
    }
}

/// One extractor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub class: SlotClass,
    pub index: u8,
}

impl SlotId {
    pub const fn new(class: SlotClass, index: u8) -> Self {
        Self { class, index }
    }

    fn linear_index(&self) -> usize {
        self.class.index() * MAX_SLOTS_PER_CLASS + self.index as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class.name(), self.index)
    }
}

/// Bit set over all slot classes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotBitSet {
    classes: [u64; MAX_SLOT_CLASSES],
}

impl SlotBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with the first `count` slots of `class` marked.
    pub fn all_in_class(class: SlotClass, count: u8) -> Self {
        let mut set = Self::new();
        set.classes[class.index()] = if count as usize >= MAX_SLOTS_PER_CLASS {
            !0
        } else {
            (1u64 << count) - 1
        };
        set
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        (slot.index as usize) < MAX_SLOTS_PER_CLASS
            && self.classes[slot.class.index()] & (1u64 << slot.index) != 0
    }

    pub fn set(&mut self, slot: SlotId) {
        if (slot.index as usize) < MAX_SLOTS_PER_CLASS {
            self.classes[slot.class.index()] |= 1u64 << slot.index;
        }
    }

    pub fn clear(&mut self, slot: SlotId) {
        if (slot.index as usize) < MAX_SLOTS_PER_CLASS {
            self.classes[slot.class.index()] &= !(1u64 << slot.index);
        }
    }

    pub fn union(&mut self, other: &SlotBitSet) {
        for i in 0..MAX_SLOT_CLASSES {
            self.classes[i] |= other.classes[i];
        }
    }

    pub fn count_in_class(&self, class: SlotClass) -> u32 {
        self.classes[class.index()].count_ones()
    }

    /// Indices of set slots in a class, ascending.
    pub fn iter_class(&self, class: SlotClass) -> impl DoubleEndedIterator<Item = u8> + '_ {
        let bits = self.classes[class.index()];
        (0..MAX_SLOTS_PER_CLASS as u8).filter(move |i| bits & (1u64 << i) != 0)
    }
}

/// Which extraction request owns a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOwner {
    /// Index of the entry in the match's extraction plan.
    pub entry: usize,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAllocError {
    #[error("slot {0} does not exist on this target")]
    InvalidSlot(SlotId),

    #[error("slot {0} is already in use")]
    SlotInUse(SlotId),

    #[error("slot {0} is not allocated")]
    SlotNotAllocated(SlotId),
}

/// Slot usage of one parser cycle.
#[derive(Debug, Clone)]
pub struct SlotFile {
    shape: SlotUniverseShape,
    /// Slots that exist on the target.
    available: SlotBitSet,
    /// Slots consumed in this cycle.
    used: SlotBitSet,
    owners: Vec<Option<SlotOwner>>,
}

impl SlotFile {
    pub fn new(shape: SlotUniverseShape) -> Self {
        let mut available = SlotBitSet::new();
        match shape {
            SlotUniverseShape::Uniform { slots, .. } => {
                available.union(&SlotBitSet::all_in_class(SlotClass::General, slots));
            }
            SlotUniverseShape::Heterogeneous { b8, b16, b32 } => {
                available.union(&SlotBitSet::all_in_class(SlotClass::B8, b8));
                available.union(&SlotBitSet::all_in_class(SlotClass::B16, b16));
                available.union(&SlotBitSet::all_in_class(SlotClass::B32, b32));
            }
        }

        Self {
            shape,
            available,
            used: SlotBitSet::new(),
            owners: vec![None; MAX_SLOT_CLASSES * MAX_SLOTS_PER_CLASS],
        }
    }

    pub fn shape(&self) -> SlotUniverseShape {
        self.shape
    }

    /// Number of slots of `class` the target has.
    pub fn class_size(&self, class: SlotClass) -> u32 {
        self.available.count_in_class(class)
    }

    /// Free slots of a class, lowest index first.
    pub fn free_slots(&self, class: SlotClass) -> Vec<SlotId> {
        self.available
            .iter_class(class)
            .map(|i| SlotId::new(class, i))
            .filter(|s| !self.used.contains(*s))
            .collect()
    }

    /// Free slots of a class, highest index first.
    pub fn free_slots_desc(&self, class: SlotClass) -> Vec<SlotId> {
        let mut slots = self.free_slots(class);
        slots.reverse();
        slots
    }

    /// First index of `len` consecutive free slots, searching upward or downward.
    pub fn find_free_run(&self, class: SlotClass, len: u8, descending: bool) -> Option<u8> {
        let size = self.class_size(class) as u8;
        if len == 0 || len > size {
            return None;
        }
        let is_free_run = |start: u8| {
            (start..start + len).all(|i| {
                let slot = SlotId::new(class, i);
                self.available.contains(slot) && !self.used.contains(slot)
            })
        };
        let last_start = size - len;
        if descending {
            (0..=last_start).rev().find(|&s| is_free_run(s))
        } else {
            (0..=last_start).find(|&s| is_free_run(s))
        }
    }

    pub fn assign(&mut self, slot: SlotId, owner: SlotOwner) -> Result<(), SlotAllocError> {
        if !self.available.contains(slot) {
            return Err(SlotAllocError::InvalidSlot(slot));
        }
        if self.used.contains(slot) {
            return Err(SlotAllocError::SlotInUse(slot));
        }
        self.used.set(slot);
        self.owners[slot.linear_index()] = Some(owner);
        Ok(())
    }

    pub fn free(&mut self, slot: SlotId) -> Result<(), SlotAllocError> {
        if !self.available.contains(slot) {
            return Err(SlotAllocError::InvalidSlot(slot));
        }
        if !self.used.contains(slot) {
            return Err(SlotAllocError::SlotNotAllocated(slot));
        }
        self.used.clear(slot);
        self.owners[slot.linear_index()] = None;
        Ok(())
    }

    pub fn is_allocated(&self, slot: SlotId) -> bool {
        self.used.contains(slot)
    }

    pub fn owner(&self, slot: SlotId) -> Option<SlotOwner> {
        if self.available.contains(slot) {
            self.owners[slot.linear_index()]
        } else {
            None
        }
    }

    /// Slots of `class` consumed in this cycle.
    pub fn used_in_class(&self, class: SlotClass) -> u32 {
        self.used.count_in_class(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tofino_slots() -> SlotFile {
        SlotFile::new(SlotUniverseShape::Heterogeneous { b8: 4, b16: 4, b32: 4 })
    }

    #[test]
    fn test_slotbitset_operations() {
        let mut set = SlotBitSet::new();
        let slot = SlotId::new(SlotClass::B16, 3);
        assert!(!set.contains(slot));
        set.set(slot);
        assert!(set.contains(slot));
        assert_eq!(set.count_in_class(SlotClass::B16), 1);
        set.clear(slot);
        assert!(!set.contains(slot));
    }

    #[test]
    fn test_assign_and_free() {
        let mut slots = tofino_slots();
        let s = slots.free_slots(SlotClass::B32)[0];
        assert_eq!(s, SlotId::new(SlotClass::B32, 0));
        slots.assign(s, SlotOwner { entry: 7 }).unwrap();
        assert!(slots.is_allocated(s));
        assert_eq!(slots.owner(s), Some(SlotOwner { entry: 7 }));
        assert_eq!(slots.assign(s, SlotOwner { entry: 8 }), Err(SlotAllocError::SlotInUse(s)));
        slots.free(s).unwrap();
        assert_eq!(slots.free(s), Err(SlotAllocError::SlotNotAllocated(s)));
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let mut slots = tofino_slots();
        let bogus = SlotId::new(SlotClass::B8, 9);
        assert_eq!(
            slots.assign(bogus, SlotOwner { entry: 0 }),
            Err(SlotAllocError::InvalidSlot(bogus))
        );
        let general = SlotId::new(SlotClass::General, 0);
        assert!(slots.assign(general, SlotOwner { entry: 0 }).is_err());
    }

    #[test]
    fn test_descending_order() {
        let slots = tofino_slots();
        let desc = slots.free_slots_desc(SlotClass::B16);
        assert_eq!(desc.first(), Some(&SlotId::new(SlotClass::B16, 3)));
    }

    #[test]
    fn test_free_runs() {
        let mut slots = SlotFile::new(SlotUniverseShape::Uniform { slots: 4, slot_bits: 16 });
        slots
            .assign(SlotId::new(SlotClass::General, 1), SlotOwner { entry: 0 })
            .unwrap();
        assert_eq!(slots.find_free_run(SlotClass::General, 2, false), Some(2));
        assert_eq!(slots.find_free_run(SlotClass::General, 1, false), Some(0));
        assert_eq!(slots.find_free_run(SlotClass::General, 1, true), Some(3));
        assert_eq!(slots.find_free_run(SlotClass::General, 3, false), None);
    }
}
