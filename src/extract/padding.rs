// This module implements narrow-to-wide padding propagation for heterogeneous slot
// universes. Downstream of the extractors the hardware consumes 16-bit writes in pairs
// and 8-bit writes in quads, so a cycle that uses narrow slots for a wide request can
// shift the bundling of every cycle around it. For each match flagged narrow-to-wide the
// propagator pads the match itself and all of its transitive predecessors until their
// 16-bit count is even and their 8-bit count is a multiple of four, then pads forward
// along successors for as many hops as the worst-case number of further extractions
// (capped at the output FIFO depth) needs. Predecessor sets, further-extraction counts
// and inserted padding are memoized in a PaddingCache keyed by MatchId, so shared
// predecessors are walked once and re-running the pass inserts nothing new.

//! Narrow-to-wide padding propagation.

use super::PlanTable;
use crate::core::{CompileError, CompileSession, SlotClass, SlotUniverseShape, TargetCaps};
use crate::graph::{MatchId, ParserGraph, StateId};
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

/// Per-instance memoization for padding propagation.
#[derive(Debug, Clone, Default)]
pub struct PaddingCache {
    /// Transitive predecessor matches of each match.
    preds: HashMap<MatchId, Vec<MatchId>>,
    /// Worst-case further extractions per match and class.
    further: HashMap<(MatchId, SlotClass), u32>,
    /// Padding entries inserted per match and class.
    records: HashMap<(MatchId, SlotClass), u32>,
}

impl PaddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predecessors(&self, id: MatchId) -> Option<&[MatchId]> {
        self.preds.get(&id).map(Vec::as_slice)
    }

    pub fn further(&self, id: MatchId, class: SlotClass) -> Option<u32> {
        self.further.get(&(id, class)).copied()
    }

    /// Padding inserted into `id` for `class` across all runs.
    pub fn record(&self, id: MatchId, class: SlotClass) -> u32 {
        self.records.get(&(id, class)).copied().unwrap_or(0)
    }

    pub fn total_padding(&self) -> u32 {
        self.records.values().sum()
    }
}

pub struct PaddingPropagator<'a> {
    graph: &'a ParserGraph,
    caps: TargetCaps,
    fifo_depth: u32,
}

impl<'a> PaddingPropagator<'a> {
    pub fn new(graph: &'a ParserGraph, caps: TargetCaps) -> Self {
        Self {
            graph,
            caps,
            fifo_depth: caps.output_fifo_depth,
        }
    }

    /// Override the output FIFO depth bounding the forward walk.
    pub fn with_fifo_depth(mut self, depth: u32) -> Self {
        self.fifo_depth = depth;
        self
    }

    /// Pad around every narrow-to-wide match. Returns the entries inserted.
    pub fn run(&self, plans: &mut PlanTable, cache: &mut PaddingCache, session: &mut CompileSession) -> usize {
        if !self.caps.slots.is_heterogeneous() {
            return 0;
        }

        let mut inserted = 0;
        for mid in plans.narrow_to_wide() {
            let preds = self.predecessors(mid, cache);
            inserted += self.pad(mid, plans, cache, session);
            for p in preds {
                inserted += self.pad(p, plans, cache, session);
            }

            let hops = self.forward_hops(mid, plans, cache);
            if hops > 0 {
                for s in self.states_within(mid, hops) {
                    let matches: Vec<MatchId> = self.graph.state(s).all_matches().collect();
                    for m in matches {
                        inserted += self.pad(m, plans, cache, session);
                    }
                }
            }
        }

        if inserted > 0 {
            log::debug!("{}: inserted {} padding extraction(s)", self.graph.name(), inserted);
        }
        session.record_padding(inserted);
        inserted
    }

    /// Transitive predecessor matches of `id`, memoized.
    pub fn predecessors(&self, id: MatchId, cache: &mut PaddingCache) -> Vec<MatchId> {
        if let Some(p) = cache.preds.get(&id) {
            return p.clone();
        }

        let mut result = Vec::new();
        let mut seen_matches = HashSet::new();
        let mut seen_states = HashSet::new();
        let mut queue = VecDeque::new();
        let owner = self.graph.get_match(id).owner;
        seen_states.insert(owner);
        queue.push_back(owner);

        while let Some(s) = queue.pop_front() {
            for &p in &self.graph.state(s).preds {
                if p == id || !seen_matches.insert(p) {
                    continue;
                }
                result.push(p);
                let ps = self.graph.get_match(p).owner;
                if seen_states.insert(ps) {
                    queue.push_back(ps);
                }
            }
        }

        result.sort();
        cache.preds.insert(id, result.clone());
        result
    }

    /// Number of successor hops that must also be balanced.
    pub fn forward_hops(&self, id: MatchId, plans: &PlanTable, cache: &mut PaddingCache) -> u32 {
        [SlotClass::B16, SlotClass::B8]
            .into_iter()
            .map(|class| {
                let per_cycle = self.class_size(class).max(1);
                let further = self.further(id, class, plans, cache).min(self.fifo_depth);
                further.div_ceil(per_cycle)
            })
            .max()
            .unwrap_or(0)
    }

    fn class_size(&self, class: SlotClass) -> u32 {
        match (self.caps.slots, class) {
            (SlotUniverseShape::Heterogeneous { b8, .. }, SlotClass::B8) => u32::from(b8),
            (SlotUniverseShape::Heterogeneous { b16, .. }, SlotClass::B16) => u32::from(b16),
            (SlotUniverseShape::Heterogeneous { b32, .. }, SlotClass::B32) => u32::from(b32),
            _ => 0,
        }
    }

    /// Worst-case extractions of `class` along any path after `id`, capped at the FIFO depth.
    pub fn further(&self, id: MatchId, class: SlotClass, plans: &PlanTable, cache: &mut PaddingCache) -> u32 {
        let mut on_stack = HashSet::new();
        self.further_inner(id, class, plans, cache, &mut on_stack).0
    }

    /// Returns the count and whether a cycle cut it short. Cut results depend on
    /// the path that reached them and are not memoized.
    fn further_inner(
        &self,
        id: MatchId,
        class: SlotClass,
        plans: &PlanTable,
        cache: &mut PaddingCache,
        on_stack: &mut HashSet<MatchId>,
    ) -> (u32, bool) {
        if let Some(v) = cache.further.get(&(id, class)) {
            return (*v, false);
        }
        if !on_stack.insert(id) {
            return (0, true);
        }

        let mut best = 0;
        let mut cut = false;
        for &succ in &self.graph.get_match(id).successors {
            for next in self.graph.state(succ).all_matches() {
                let here = plans.get(next).map_or(0, |p| p.count(class));
                let (rest, rest_cut) = self.further_inner(next, class, plans, cache, on_stack);
                cut |= rest_cut;
                best = best.max((here + rest).min(self.fifo_depth));
            }
        }

        on_stack.remove(&id);
        if !cut {
            cache.further.insert((id, class), best);
        }
        (best, cut)
    }

    /// States at most `hops` transitions after `id`.
    fn states_within(&self, id: MatchId, hops: u32) -> Vec<StateId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier: Vec<StateId> = self.graph.get_match(id).successors.clone();
        for _ in 0..hops {
            let mut next = Vec::new();
            for s in frontier {
                if !seen.insert(s) {
                    continue;
                }
                order.push(s);
                for m in self.graph.state(s).all_matches() {
                    next.extend(self.graph.get_match(m).successors.iter().copied());
                }
            }
            frontier = next;
        }
        order
    }

    /// Balance one match's plan. Returns the entries inserted.
    fn pad(&self, id: MatchId, plans: &mut PlanTable, cache: &mut PaddingCache, session: &mut CompileSession) -> usize {
        let Some(plan) = plans.get_mut(id) else {
            return 0;
        };

        let mut inserted = 0;
        for (class, bundle) in [(SlotClass::B16, 2), (SlotClass::B8, 4)] {
            while plan.count(class) % bundle != 0 {
                match plan.add_padding(class) {
                    Some(slot) => {
                        log::trace!("{}: pad {} with {}", self.graph.name(), self.graph.match_label(id), slot);
                        *cache.records.entry((id, class)).or_insert(0) += 1;
                        inserted += 1;
                    }
                    None => {
                        session.report(
                            CompileError::ResourceExhausted {
                                resource: "output extractor slots",
                                capacity: self.caps.slots.total_slots(),
                            },
                            self.graph.get_match(id).loc,
                            self.graph.match_label(id),
                        );
                        break;
                    }
                }
            }
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PhvRegistry, PhvWidth, Target};
    use crate::extract::ExtractAllocator;
    use crate::graph::{Direction, MatchDecl, StateBody};

    fn registry() -> PhvRegistry {
        let mut reg = PhvRegistry::new();
        for i in 0..8 {
            reg.define_container(&format!("B{}", i), PhvWidth::W8).unwrap();
            reg.define_container(&format!("H{}", i), PhvWidth::W16).unwrap();
        }
        reg
    }

    /// start -> wide -> tail, where `wide` needs five 16-bit writes.
    fn graph(reg: &PhvRegistry, session: &mut CompileSession) -> ParserGraph {
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state(
            "start",
            StateBody::new().with_default(MatchDecl::default_match().shift(2).save("H0", 0, 2).to("wide")),
        )
        .unwrap();
        let mut wide = MatchDecl::default_match().shift(10).to("tail");
        for i in 0..5u8 {
            wide = wide.save(&format!("H{}", i), i * 2, 2);
        }
        g.define_state("wide", StateBody::new().with_default(wide)).unwrap();
        g.define_state(
            "tail",
            StateBody::new().with_default(MatchDecl::default_match().save("B0", 0, 1)),
        )
        .unwrap();
        g.assign_codes(8).unwrap();
        g.resolve_references(session.diagnostics_mut());
        g.resolve_destinations(reg, session.diagnostics_mut());
        g.compute_predecessors();
        g
    }

    #[test]
    fn test_padding_balances_neighbours() {
        let reg = registry();
        let caps = Target::Tofino.caps();
        let mut session = CompileSession::new("ingress", caps);
        let g = graph(&reg, &mut session);
        let mut plans = ExtractAllocator::new(caps, &reg).allocate(&g, &mut session);
        let mut cache = PaddingCache::new();

        let inserted = PaddingPropagator::new(&g, caps).run(&mut plans, &mut cache, &mut session);
        assert!(inserted > 0);
        assert!(!session.has_errors());
        for (mid, plan) in plans.iter() {
            assert!(plan.is_balanced(), "{} unbalanced", g.match_label(mid));
        }

        let wide = g.state_by_name("wide").unwrap().default.unwrap();
        let start = g.state_by_name("start").unwrap().default.unwrap();
        assert_eq!(cache.predecessors(wide), Some(&[start][..]));
        assert_eq!(cache.record(wide, SlotClass::B8), 2);
        assert_eq!(cache.record(start, SlotClass::B16), 1);
    }

    #[test]
    fn test_padding_is_idempotent() {
        let reg = registry();
        let caps = Target::Tofino.caps();
        let mut session = CompileSession::new("ingress", caps);
        let g = graph(&reg, &mut session);
        let mut plans = ExtractAllocator::new(caps, &reg).allocate(&g, &mut session);
        let mut cache = PaddingCache::new();
        let propagator = PaddingPropagator::new(&g, caps);

        let first = propagator.run(&mut plans, &mut cache, &mut session);
        let total = plans.padding_count();
        assert_eq!(first, total);
        assert_eq!(cache.total_padding() as usize, total);
        assert_eq!(propagator.run(&mut plans, &mut cache, &mut session), 0);
        assert_eq!(plans.padding_count(), total);
    }

    #[test]
    fn test_forward_hops_follow_further_extractions() {
        let reg = registry();
        let caps = Target::Tofino.caps();
        let mut session = CompileSession::new("ingress", caps);
        let g = graph(&reg, &mut session);
        let plans = ExtractAllocator::new(caps, &reg).allocate(&g, &mut session);
        let mut cache = PaddingCache::new();
        let propagator = PaddingPropagator::new(&g, caps);

        let wide = g.state_by_name("wide").unwrap().default.unwrap();
        assert_eq!(propagator.further(wide, SlotClass::B8, &plans, &mut cache), 1);
        assert_eq!(propagator.further(wide, SlotClass::B16, &plans, &mut cache), 0);
        assert_eq!(propagator.forward_hops(wide, &plans, &mut cache), 1);
    }

    #[test]
    fn test_uniform_target_never_pads() {
        let reg = registry();
        let caps = Target::JBay.caps();
        let mut session = CompileSession::new("ingress", caps);
        let g = graph(&reg, &mut session);
        let mut plans = ExtractAllocator::new(caps, &reg).allocate(&g, &mut session);
        let mut cache = PaddingCache::new();
        assert_eq!(PaddingPropagator::new(&g, caps).run(&mut plans, &mut cache, &mut session), 0);
    }

    #[test]
    fn test_further_through_cycle_is_not_truncated() {
        let reg = registry();
        let caps = Target::Tofino.caps();
        let mut session = CompileSession::new("ingress", caps);
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state(
            "start",
            StateBody::new().with_default(MatchDecl::default_match().shift(2).save("H0", 0, 2).to("b")),
        )
        .unwrap();
        g.define_state(
            "b",
            StateBody::new().with_default(
                MatchDecl::default_match()
                    .shift(4)
                    .save("H1", 0, 2)
                    .save("H2", 2, 2)
                    .to("start"),
            ),
        )
        .unwrap();
        g.assign_codes(8).unwrap();
        g.resolve_references(session.diagnostics_mut());
        g.resolve_destinations(&reg, session.diagnostics_mut());
        g.compute_predecessors();

        let plans = ExtractAllocator::new(caps, &reg).allocate(&g, &mut session);
        let mut cache = PaddingCache::new();
        let propagator = PaddingPropagator::new(&g, caps);
        let a = g.state_by_name("start").unwrap().default.unwrap();
        let b = g.state_by_name("b").unwrap().default.unwrap();

        assert_eq!(propagator.further(a, SlotClass::B16, &plans, &mut cache), 3);
        // values cut short by the cycle are not memoized
        assert_eq!(cache.further(b, SlotClass::B16), None);
        assert_eq!(propagator.further(b, SlotClass::B16, &plans, &mut cache), 3);
    }
}
