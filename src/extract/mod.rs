// This module implements the extraction slot allocator. Every save (copy from the input
// buffer), set (write a constant) and checksum-verification result of a match must be
// written by an output extractor slot in the single parser cycle the match executes in.
// The allocator builds one MatchPlan per match: the ordered plan entries plus the
// SlotFile recording which slots the cycle consumed. On a uniform target a request of W
// bits takes ceil(W/16) consecutive general-purpose slots, first fit. On a heterogeneous
// target a request is placed in a native slot of its width, then in a pair of half-width
// slots, then (32-bit only) in four 8-bit slots; the two fallbacks are narrow-to-wide
// extractions and flag the plan so that padding propagation can repair the bundling of
// neighbouring cycles. Constant writes only go to slots able to encode the value.
// Checksum verification outputs are placed from the highest free slot downward so they do
// not collide with the upward growth of ordinary requests.

//! Extractor slot allocation.
//!
//! [`ExtractAllocator`] produces a [`PlanTable`] with one [`MatchPlan`] per
//! match; [`padding::PaddingPropagator`] then balances the per-class slot
//! counts around narrow-to-wide extractions.

pub mod padding;

use crate::core::{
    CompileError, CompileSession, PhvRegistry, SlotAllocError, SlotClass, SlotFile, SlotId,
    SlotOwner, SlotUniverseShape, TargetCaps,
};
use crate::graph::{ChecksumKind, ExtractSource, MatchId, ParserGraph};
use std::fmt;

pub use padding::{PaddingCache, PaddingPropagator};

/// Where the bits an entry writes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Buffer { start: u8, len: u8 },
    Constant(u32),
    ChecksumVerify { unit: u8 },
    /// Inert write inserted to balance slot counts.
    Padding,
}

/// One slot write of a match's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Destination register; `None` for padding.
    pub dest: Option<String>,
    /// Lowest destination bit this entry writes.
    pub dest_lo: u32,
    pub bits: u32,
    pub source: PlanSource,
    pub slot: SlotId,
}

impl PlanEntry {
    pub fn is_padding(&self) -> bool {
        self.source == PlanSource::Padding
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dest {
            Some(dest) => write!(
                f,
                "{} <- {}[{}:{}]",
                self.slot,
                dest,
                self.dest_lo + self.bits - 1,
                self.dest_lo
            )?,
            None => write!(f, "{} <- padding", self.slot)?,
        }
        match self.source {
            PlanSource::Buffer { start, len } => write!(f, " buf {}..{}", start, u32::from(start) + u32::from(len)),
            PlanSource::Constant(v) => write!(f, " const 0x{:x}", v),
            PlanSource::ChecksumVerify { unit } => write!(f, " csum {}", unit),
            PlanSource::Padding => Ok(()),
        }
    }
}

/// Slot usage and entries of one match.
#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub entries: Vec<PlanEntry>,
    pub slots: SlotFile,
    /// Some request fell back to narrower slots.
    pub narrow_to_wide: bool,
}

impl MatchPlan {
    pub fn new(shape: SlotUniverseShape) -> Self {
        Self {
            entries: Vec::new(),
            slots: SlotFile::new(shape),
            narrow_to_wide: false,
        }
    }

    /// Slots of `class` written in this cycle, padding included.
    pub fn count(&self, class: SlotClass) -> u32 {
        self.slots.used_in_class(class)
    }

    pub fn padding_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_padding()).count()
    }

    /// 16-bit writes come in pairs and 8-bit writes in quads.
    pub fn is_balanced(&self) -> bool {
        self.count(SlotClass::B16) % 2 == 0 && self.count(SlotClass::B8) % 4 == 0
    }

    fn push(&mut self, entry: PlanEntry) -> Result<(), CompileError> {
        let owner = SlotOwner {
            entry: self.entries.len(),
        };
        self.slots.assign(entry.slot, owner).map_err(|e| match e {
            SlotAllocError::SlotInUse(slot) => CompileError::DuplicateDefinition {
                kind: "extractor slot",
                name: slot.to_string(),
            },
            other => CompileError::InvalidExtract { reason: other.to_string() },
        })?;
        self.entries.push(entry);
        Ok(())
    }

    /// Insert a padding write into the lowest free slot of `class`.
    pub fn add_padding(&mut self, class: SlotClass) -> Option<SlotId> {
        let slot = *self.slots.free_slots(class).first()?;
        self.push(PlanEntry {
            dest: None,
            dest_lo: 0,
            bits: class.bits(),
            source: PlanSource::Padding,
            slot,
        })
        .ok()?;
        Some(slot)
    }
}

/// Plans of every match of one instance, indexed by `MatchId`.
#[derive(Debug, Clone, Default)]
pub struct PlanTable {
    plans: Vec<Option<MatchPlan>>,
}

impl PlanTable {
    pub fn new(matches: usize) -> Self {
        Self {
            plans: vec![None; matches],
        }
    }

    pub fn get(&self, id: MatchId) -> Option<&MatchPlan> {
        self.plans.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut MatchPlan> {
        self.plans.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn insert(&mut self, id: MatchId, plan: MatchPlan) {
        if id.index() >= self.plans.len() {
            self.plans.resize(id.index() + 1, None);
        }
        self.plans[id.index()] = Some(plan);
    }

    pub fn iter(&self) -> impl Iterator<Item = (MatchId, &MatchPlan)> {
        self.plans
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (MatchId(i as u32), p)))
    }

    /// Matches with at least one narrow-to-wide extraction, ascending.
    pub fn narrow_to_wide(&self) -> Vec<MatchId> {
        self.iter()
            .filter(|(_, p)| p.narrow_to_wide)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn padding_count(&self) -> usize {
        self.iter().map(|(_, p)| p.padding_count()).sum()
    }
}

/// Whether a slot of `class` can write the constant `value`.
///
/// 8-bit slots write any byte. Wider slots write zero or a single run of
/// ones, possibly rotated.
pub fn can_encode(class: SlotClass, value: u32) -> bool {
    let bits = class.bits();
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    if value & !mask != 0 {
        return false;
    }
    match class {
        SlotClass::B8 | SlotClass::General => true,
        SlotClass::B16 | SlotClass::B32 => {
            value == 0
                || (0..bits).any(|r| {
                    let rot = if r == 0 {
                        value
                    } else {
                        ((value >> r) | (value << (bits - r))) & mask
                    };
                    rot & rot.wrapping_add(1) == 0
                })
        }
    }
}

/// A single write request before placement.
#[derive(Debug, Clone, Copy)]
struct Request<'a> {
    dest: &'a str,
    width: u32,
    source: PlanSource,
}

impl Request<'_> {
    /// Part `i` of `n` equal parts, most significant part first.
    fn part(&self, i: u32, n: u32) -> (u32, u32, PlanSource) {
        let bits = (self.width / n).max(1);
        let dest_lo = self.width.saturating_sub((i + 1) * bits);
        let source = match self.source {
            PlanSource::Buffer { start, len } => {
                let step = (u32::from(len) / n).max(1);
                PlanSource::Buffer {
                    start: (u32::from(start) + i * step) as u8,
                    len: step as u8,
                }
            }
            PlanSource::Constant(v) => {
                let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
                PlanSource::Constant((v >> dest_lo) & mask)
            }
            other => other,
        };
        (dest_lo, bits, source)
    }
}

/// Maps extraction requests onto the target's extractor slots.
pub struct ExtractAllocator<'a> {
    caps: TargetCaps,
    registry: &'a PhvRegistry,
}

impl<'a> ExtractAllocator<'a> {
    pub fn new(caps: TargetCaps, registry: &'a PhvRegistry) -> Self {
        Self { caps, registry }
    }

    /// Build the plan of every match in the graph.
    pub fn allocate(&self, graph: &ParserGraph, session: &mut CompileSession) -> PlanTable {
        let mut table = PlanTable::new(graph.match_count());
        for mid in graph.match_ids() {
            let (plan, errors) = self.allocate_match(graph, mid);
            let loc = graph.get_match(mid).loc;
            for err in errors {
                session.report(err, loc, graph.match_label(mid));
            }
            for class in SlotClass::ALL {
                for _ in 0..plan.count(class) {
                    session.record_slot(class);
                }
            }
            if plan.narrow_to_wide {
                log::debug!("{}: {} uses narrow-to-wide extraction", graph.name(), graph.match_label(mid));
                session.record_narrow_to_wide();
            }
            table.insert(mid, plan);
        }
        table
    }

    /// Plan one match. Requests that cannot be placed are reported and skipped.
    pub fn allocate_match(&self, graph: &ParserGraph, mid: MatchId) -> (MatchPlan, Vec<CompileError>) {
        let m = graph.get_match(mid);
        let mut plan = MatchPlan::new(self.caps.slots);
        let mut errors = Vec::new();

        for ex in &m.extracts {
            let Some(container) = ex.container else {
                continue;
            };
            let width = self.registry.container(container).width.bits();
            let source = match ex.source {
                ExtractSource::Buffer { start, len } => {
                    if u32::from(len) * 8 != width {
                        errors.push(CompileError::InvalidExtract {
                            reason: format!("{} is {} bits wide but {} bytes are saved", ex.dest, width, len),
                        });
                        continue;
                    }
                    PlanSource::Buffer { start, len }
                }
                ExtractSource::Constant(v) => {
                    if width < 32 && v >> width != 0 {
                        errors.push(CompileError::InvalidExtract {
                            reason: format!("constant 0x{:x} does not fit {}-bit {}", v, width, ex.dest),
                        });
                        continue;
                    }
                    PlanSource::Constant(v)
                }
            };
            let req = Request {
                dest: &ex.dest,
                width,
                source,
            };
            if let Err(e) = self.place(&mut plan, &req, false) {
                errors.push(e);
            }
        }

        for ck in &m.checksums {
            if ck.kind != ChecksumKind::Verify {
                continue;
            }
            let (Some(dest), Some(container)) = (&ck.dest, ck.container) else {
                continue;
            };
            let req = Request {
                dest,
                width: self.registry.container(container).width.bits(),
                source: PlanSource::ChecksumVerify { unit: ck.unit },
            };
            if let Err(e) = self.place(&mut plan, &req, true) {
                errors.push(e);
            }
        }

        (plan, errors)
    }

    fn exhausted(&self) -> CompileError {
        CompileError::ResourceExhausted {
            resource: "output extractor slots",
            capacity: self.caps.slots.total_slots(),
        }
    }

    fn place(&self, plan: &mut MatchPlan, req: &Request<'_>, descending: bool) -> Result<(), CompileError> {
        let slots = match self.caps.slots {
            SlotUniverseShape::Uniform { slot_bits, .. } => {
                let n = req.width.div_ceil(u32::from(slot_bits)).max(1);
                let start = plan
                    .slots
                    .find_free_run(SlotClass::General, n as u8, descending)
                    .ok_or_else(|| self.exhausted())?;
                (0..n)
                    .map(|i| SlotId::new(SlotClass::General, start + i as u8))
                    .collect::<Vec<_>>()
            }
            SlotUniverseShape::Heterogeneous { .. } => {
                let slots = self.choose_heterogeneous(plan, req, descending)?;
                if slots.len() > 1 {
                    plan.narrow_to_wide = true;
                }
                slots
            }
        };

        let n = slots.len() as u32;
        for (i, slot) in slots.into_iter().enumerate() {
            let (dest_lo, bits, source) = req.part(i as u32, n);
            log::trace!("{} [{}:{}] -> {}", req.dest, dest_lo + bits - 1, dest_lo, slot);
            plan.push(PlanEntry {
                dest: Some(req.dest.to_string()),
                dest_lo,
                bits,
                source,
                slot,
            })?;
        }
        Ok(())
    }

    /// Native slot, then a pair of half-width slots, then four 8-bit slots.
    fn choose_heterogeneous(
        &self,
        plan: &MatchPlan,
        req: &Request<'_>,
        descending: bool,
    ) -> Result<Vec<SlotId>, CompileError> {
        let native = SlotClass::for_width(req.width).ok_or_else(|| CompileError::InvalidExtract {
            reason: format!("{} has no {}-bit extractor", req.dest, req.width),
        })?;

        let mut candidates = vec![(native, 1u32)];
        if let Some(half) = native.narrower() {
            candidates.push((half, 2));
            if let Some(quarter) = half.narrower() {
                candidates.push((quarter, 4));
            }
        }

        for (class, n) in candidates {
            let encodable = (0..n).all(|i| match req.part(i, n).2 {
                PlanSource::Constant(v) => can_encode(class, v),
                _ => true,
            });
            if !encodable {
                continue;
            }
            let free = if descending {
                plan.slots.free_slots_desc(class)
            } else {
                plan.slots.free_slots(class)
            };
            if free.len() >= n as usize {
                return Ok(free.into_iter().take(n as usize).collect());
            }
        }
        Err(self.exhausted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Diagnostics, PhvWidth, Target};
    use crate::graph::{ChecksumOp, Direction, MatchDecl, StateBody};

    fn registry() -> PhvRegistry {
        let mut reg = PhvRegistry::new();
        for i in 0..8 {
            reg.define_container(&format!("B{}", i), PhvWidth::W8).unwrap();
            reg.define_container(&format!("H{}", i), PhvWidth::W16).unwrap();
            reg.define_container(&format!("W{}", i), PhvWidth::W32).unwrap();
        }
        reg
    }

    fn one_match(decl: MatchDecl, reg: &PhvRegistry) -> (ParserGraph, MatchId) {
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        let s = g.define_state("start", StateBody::new().with_default(decl)).unwrap();
        let mut diags = Diagnostics::new();
        g.resolve_destinations(reg, &mut diags);
        assert!(!diags.has_errors());
        let mid = g.state(s).default.unwrap();
        (g, mid)
    }

    #[test]
    fn test_can_encode() {
        assert!(can_encode(SlotClass::B8, 0x81));
        assert!(can_encode(SlotClass::B16, 0));
        assert!(can_encode(SlotClass::B16, 0x0ff0));
        assert!(can_encode(SlotClass::B16, 0xf00f));
        assert!(!can_encode(SlotClass::B16, 0x8100));
        assert!(can_encode(SlotClass::B32, 0xffff_ffff));
        assert!(!can_encode(SlotClass::B8, 0x100));
    }

    #[test]
    fn test_native_32bit_slot() {
        let reg = registry();
        let (g, mid) = one_match(MatchDecl::default_match().save("W0", 0, 4), &reg);
        let alloc = ExtractAllocator::new(Target::Tofino.caps(), &reg);
        let (plan, errors) = alloc.allocate_match(&g, mid);
        assert!(errors.is_empty());
        assert!(!plan.narrow_to_wide);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].slot, SlotId::new(SlotClass::B32, 0));
        assert_eq!(plan.entries[0].bits, 32);
    }

    #[test]
    fn test_fallback_to_pair() {
        let reg = registry();
        let mut decl = MatchDecl::default_match();
        for i in 0..5u8 {
            decl = decl.save(&format!("H{}", i), i * 2, 2);
        }
        let (g, mid) = one_match(decl, &reg);
        let alloc = ExtractAllocator::new(Target::Tofino.caps(), &reg);
        let (plan, errors) = alloc.allocate_match(&g, mid);
        assert!(errors.is_empty());
        assert!(plan.narrow_to_wide);
        assert_eq!(plan.count(SlotClass::B16), 4);
        assert_eq!(plan.count(SlotClass::B8), 2);

        let split: Vec<_> = plan.entries.iter().filter(|e| e.slot.class == SlotClass::B8).collect();
        assert_eq!(split[0].dest_lo, 8);
        assert_eq!(split[0].source, PlanSource::Buffer { start: 8, len: 1 });
        assert_eq!(split[1].dest_lo, 0);
        assert_eq!(split[1].source, PlanSource::Buffer { start: 9, len: 1 });
    }

    #[test]
    fn test_unencodable_constant_moves_to_bytes() {
        let reg = registry();
        let (g, mid) = one_match(MatchDecl::default_match().set("H0", 0x8100), &reg);
        let alloc = ExtractAllocator::new(Target::Tofino.caps(), &reg);
        let (plan, errors) = alloc.allocate_match(&g, mid);
        assert!(errors.is_empty());
        assert!(plan.narrow_to_wide);
        assert_eq!(plan.entries[0].source, PlanSource::Constant(0x81));
        assert_eq!(plan.entries[1].source, PlanSource::Constant(0x00));
    }

    #[test]
    fn test_uniform_consecutive_slots() {
        let reg = registry();
        let (g, mid) = one_match(
            MatchDecl::default_match().save("B0", 0, 1).save("W0", 1, 4),
            &reg,
        );
        let alloc = ExtractAllocator::new(Target::JBay.caps(), &reg);
        let (plan, errors) = alloc.allocate_match(&g, mid);
        assert!(errors.is_empty());
        let slots: Vec<u8> = plan.entries.iter().map(|e| e.slot.index).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(plan.entries[1].dest_lo, 16);
        assert_eq!(plan.entries[2].dest_lo, 0);
        assert!(!plan.narrow_to_wide);
    }

    #[test]
    fn test_checksum_verify_from_top() {
        let reg = registry();
        let (g, mid) = one_match(
            MatchDecl::default_match().save("H0", 0, 2).checksum(ChecksumOp {
                unit: 0,
                kind: ChecksumKind::Verify,
                start: 0,
                end: 20,
                dest: Some("H1".into()),
                container: None,
            }),
            &reg,
        );
        let alloc = ExtractAllocator::new(Target::JBay.caps(), &reg);
        let (plan, _) = alloc.allocate_match(&g, mid);
        assert_eq!(plan.entries[0].slot, SlotId::new(SlotClass::General, 0));
        assert_eq!(plan.entries[1].slot, SlotId::new(SlotClass::General, 19));
    }

    #[test]
    fn test_slot_exhaustion() {
        let reg = registry();
        let mut decl = MatchDecl::default_match();
        for i in 0..7u8 {
            decl = decl.save(&format!("W{}", i), i * 4, 4);
        }
        let (g, mid) = one_match(decl, &reg);
        let alloc = ExtractAllocator::new(Target::Tofino.caps(), &reg);
        let (_, errors) = alloc.allocate_match(&g, mid);
        // 4 native, 2 as b16 pairs, 1 as b8 quad; nothing left
        assert!(errors.is_empty());

        let mut decl = MatchDecl::default_match();
        for i in 0..8u8 {
            decl = decl.save(&format!("W{}", i), i * 4, 4);
        }
        let (g, mid) = one_match(decl, &reg);
        let (_, errors) = alloc.allocate_match(&g, mid);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "ran out of output extractor slots (capacity 12)");
    }

    #[test]
    fn test_save_width_mismatch() {
        let reg = registry();
        let (g, mid) = one_match(MatchDecl::default_match().save("H0", 0, 1), &reg);
        let alloc = ExtractAllocator::new(Target::Tofino.caps(), &reg);
        let (plan, errors) = alloc.allocate_match(&g, mid);
        assert!(plan.entries.is_empty());
        assert!(matches!(errors[0], CompileError::InvalidExtract { .. }));
    }

    #[test]
    fn test_slot_collision_is_duplicate_definition() {
        let mut plan = MatchPlan::new(Target::Tofino.caps().slots);
        let entry = PlanEntry {
            dest: Some("H0".into()),
            dest_lo: 0,
            bits: 16,
            source: PlanSource::Buffer { start: 0, len: 2 },
            slot: SlotId::new(SlotClass::B16, 1),
        };
        plan.push(entry.clone()).unwrap();
        let err = plan.push(entry).unwrap_err();
        assert!(matches!(
            err,
            CompileError::DuplicateDefinition { kind: "extractor slot", .. }
        ));
        assert_eq!(plan.entries.len(), 1);

        let outside = PlanEntry {
            dest: None,
            dest_lo: 0,
            bits: 16,
            source: PlanSource::Padding,
            slot: SlotId::new(SlotClass::General, 0),
        };
        assert!(matches!(plan.push(outside), Err(CompileError::InvalidExtract { .. })));
    }
}
