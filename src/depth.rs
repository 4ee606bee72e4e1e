// This module implements the parse-depth analyzer. For every start state of a parser
// instance it computes the deepest point (in bits) a packet can drive the parser before
// it terminates, which sizes the hardware input buffering. The walk is a recursive DFS
// with an explicit Walk value carrying the traversal state: the arrival depth of every
// state on the current call stack, and per-match visit counts for loop-carried
// (offset_inc) matches. Arriving at a state already on the stack at no greater depth
// prunes the path, a loop-carried match is followed at most as many times as its header
// stack is deep, and a path whose offset passes the hardware maximum is clamped to it.
// Both records are restored on return, so a shallow path through a state never hides a
// deeper one. Results are converted to hardware buffer words and floored to the target's
// minimum depth.

//! Worst-case parse depth per start state.

use crate::core::{PhvRegistry, TargetCaps};
use crate::graph::{ExtractSource, MatchId, ParserGraph, StateId};
use hashbrown::HashMap;

/// Depth results for one parser instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthReport {
    /// Start state name and its depth in buffer words, in start order.
    pub per_start: Vec<(String, u32)>,
    /// Maximum over all start states.
    pub max_words: u32,
}

impl DepthReport {
    pub fn depth_of(&self, start: &str) -> Option<u32> {
        self.per_start.iter().find(|(n, _)| n == start).map(|(_, d)| *d)
    }
}

/// Traversal state for one start state.
#[derive(Default)]
struct Walk {
    /// Arrival depth of each state on the current path.
    seen: HashMap<StateId, u32>,
    /// Times each loop-carried match is on the current path.
    loop_visits: HashMap<MatchId, u32>,
}

pub struct DepthAnalyzer<'a> {
    graph: &'a ParserGraph,
    caps: &'a TargetCaps,
    registry: &'a PhvRegistry,
}

impl<'a> DepthAnalyzer<'a> {
    pub fn new(graph: &'a ParserGraph, caps: &'a TargetCaps, registry: &'a PhvRegistry) -> Self {
        Self { graph, caps, registry }
    }

    /// Depth of every resolved start state.
    pub fn analyze(&self) -> DepthReport {
        let mut report = DepthReport::default();
        for &start in self.graph.starts() {
            let bits = self.max_depth_bits(start);
            let words = self.bits_to_words(bits);
            let name = self.graph.state(start).name.clone();
            log::debug!("{}: depth from {} is {} bits ({} words)", self.graph.name(), name, bits, words);
            report.max_words = report.max_words.max(words);
            report.per_start.push((name, words));
        }
        report
    }

    /// Deepest bit offset reachable from `start`.
    pub fn max_depth_bits(&self, start: StateId) -> u32 {
        let mut walk = Walk::default();
        self.visit(start, 0, &mut walk)
    }

    /// Round bits up to bytes, then to buffer words, then apply the floor.
    pub fn bits_to_words(&self, bits: u32) -> u32 {
        let bytes = bits.div_ceil(8);
        let words = bytes.div_ceil(self.caps.word_bytes);
        words.max(self.caps.min_depth_words)
    }

    /// Trip count of a loop-carried match: the depth of the header stack whose
    /// valid register the match sets. `None` when no such write exists.
    pub fn loop_limit(&self, id: MatchId) -> Option<u32> {
        self.graph
            .get_match(id)
            .extracts
            .iter()
            .filter(|ex| matches!(ex.source, ExtractSource::Constant(_)))
            .filter_map(|ex| ex.container.or_else(|| self.registry.lookup(&ex.dest)))
            .find_map(|c| self.registry.stack_for_valid(c))
            .map(|stack| stack.depth)
    }

    fn visit(&self, id: StateId, cur: u32, walk: &mut Walk) -> u32 {
        let state = self.graph.state(id);
        let max_bits = self.caps.max_depth_bits();

        if state.ignore_max_depth && cur > self.caps.min_depth_bits() {
            return cur;
        }
        if walk.seen.get(&id).is_some_and(|&prev| prev >= cur) {
            return 0;
        }

        let outer = walk.seen.insert(id, cur);

        let mut result = cur;
        for mid in state.all_matches() {
            let m = self.graph.get_match(mid);
            let off = cur + u32::from(m.shift) * 8;
            if off > max_bits {
                result = max_bits;
                break;
            }

            if m.offset_inc {
                match self.loop_limit(mid) {
                    Some(limit) => {
                        let visits = walk.loop_visits.get(&mid).copied().unwrap_or(0);
                        if visits < limit {
                            walk.loop_visits.insert(mid, visits + 1);
                            result = result.max(self.follow(&m.successors, off, walk));
                            walk.loop_visits.insert(mid, visits);
                        }
                    }
                    None => result = result.max(self.follow(&m.successors, off, walk)),
                }
            } else {
                result = result.max(self.follow(&m.successors, off, walk));
            }

            if m.value.is_catch_all() {
                break;
            }
        }

        match outer {
            Some(prev) => walk.seen.insert(id, prev),
            None => walk.seen.remove(&id),
        };
        result
    }

    fn follow(&self, successors: &[StateId], off: u32, walk: &mut Walk) -> u32 {
        successors
            .iter()
            .fold(off, |acc, &succ| acc.max(self.visit(succ, off, walk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Diagnostics, PhvWidth, Target, Ternary};
    use crate::graph::{Direction, MatchDecl, StateBody};

    fn prepare(g: &mut ParserGraph, reg: &PhvRegistry) {
        let mut diags = Diagnostics::new();
        g.assign_codes(8).unwrap();
        g.resolve_references(&mut diags);
        g.resolve_destinations(reg, &mut diags);
        assert!(!diags.has_errors(), "{}", diags);
    }

    fn words(g: &ParserGraph, reg: &PhvRegistry) -> u32 {
        let caps = Target::Tofino.caps();
        DepthAnalyzer::new(g, &caps, reg).analyze().max_words
    }

    #[test]
    fn test_short_parser_gets_floor() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(14).to("eth")))
            .unwrap();
        g.define_state("eth", StateBody::new().with_default(MatchDecl::default_match()))
            .unwrap();
        prepare(&mut g, &reg);
        assert_eq!(words(&g, &reg), 4);
    }

    #[test]
    fn test_long_chain_rounds_up() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(32).to("a")))
            .unwrap();
        g.define_state("a", StateBody::new().with_default(MatchDecl::default_match().shift(32).to("b")))
            .unwrap();
        g.define_state("b", StateBody::new().with_default(MatchDecl::default_match().shift(17)))
            .unwrap();
        prepare(&mut g, &reg);
        // 81 bytes -> 6 words of 16 bytes
        assert_eq!(words(&g, &reg), 6);
    }

    #[test]
    fn test_loop_bounded_by_stack_depth() {
        let mut reg = PhvRegistry::new();
        reg.define_container("V0", PhvWidth::W8).unwrap();
        reg.define_stack("vlan", 3, "V0").unwrap();

        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(20).to("vlan")))
            .unwrap();
        g.define_state(
            "vlan",
            StateBody::new()
                .with_match(
                    MatchDecl::exact(Ternary::exact(0x8100, 16))
                        .shift(20)
                        .to("vlan")
                        .set("V0", 1)
                        .offset_inc(),
                )
                .with_default(MatchDecl::default_match().shift(20)),
        )
        .unwrap();
        prepare(&mut g, &reg);

        let caps = Target::Tofino.caps();
        let analyzer = DepthAnalyzer::new(&g, &caps, &reg);
        let start = g.state_id("start").unwrap();
        // 20 + 3 * 20 + 20 bytes
        assert_eq!(analyzer.max_depth_bits(start), 100 * 8);
        assert_eq!(analyzer.analyze().max_words, 7);
    }

    #[test]
    fn test_unbounded_loop_hits_hardware_max() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(4).to("opt")))
            .unwrap();
        g.define_state("opt", StateBody::new().with_default(MatchDecl::default_match().shift(4).to("opt")))
            .unwrap();
        prepare(&mut g, &reg);
        assert_eq!(words(&g, &reg), 4096 / 16);
    }

    #[test]
    fn test_ignore_max_depth_stops_path() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(80).to("payload")))
            .unwrap();
        g.define_state(
            "payload",
            StateBody::new()
                .ignore_max_depth()
                .with_default(MatchDecl::default_match().shift(32).to("payload")),
        )
        .unwrap();
        prepare(&mut g, &reg);
        assert_eq!(words(&g, &reg), 5);
    }

    #[test]
    fn test_catch_all_hides_later_matches() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state(
            "start",
            StateBody::new()
                .key(crate::graph::KeyField::byte(0))
                .with_match(MatchDecl::exact(Ternary::any(8)).shift(10))
                .with_match(MatchDecl::exact(Ternary::exact(1, 8)).shift(200)),
        )
        .unwrap();
        prepare(&mut g, &reg);
        assert_eq!(words(&g, &reg), 4);
    }

    #[test]
    fn test_depth_is_deterministic() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state(
            "start",
            StateBody::new()
                .with_match(MatchDecl::exact(Ternary::exact(1, 8)).shift(30).to("a"))
                .with_default(MatchDecl::default_match().shift(10).to("a")),
        )
        .unwrap();
        g.define_state("a", StateBody::new().with_default(MatchDecl::default_match().shift(50)))
            .unwrap();
        prepare(&mut g, &reg);
        let first = words(&g, &reg);
        for _ in 0..5 {
            assert_eq!(words(&g, &reg), first);
        }
        assert_eq!(first, 5);
    }

    #[test]
    fn test_deeper_entry_into_loop_is_counted() {
        let mut reg = PhvRegistry::new();
        reg.define_container("V0", PhvWidth::W8).unwrap();
        reg.define_stack("vlan", 3, "V0").unwrap();

        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state(
            "start",
            StateBody::new()
                .key(crate::graph::KeyField::byte(0))
                .with_match(MatchDecl::exact(Ternary::exact(1, 8)).shift(20).to("vlan"))
                .with_default(MatchDecl::default_match().shift(30).to("vlan")),
        )
        .unwrap();
        g.define_state(
            "vlan",
            StateBody::new()
                .key(crate::graph::KeyField::half(0))
                .with_match(
                    MatchDecl::exact(Ternary::exact(0x8100, 16))
                        .shift(20)
                        .to("vlan")
                        .set("V0", 1)
                        .offset_inc(),
                )
                .with_default(MatchDecl::default_match()),
        )
        .unwrap();
        prepare(&mut g, &reg);

        let caps = Target::Tofino.caps();
        let start = g.state_id("start").unwrap();
        // the shallow path reaches vlan first; the deeper one still loops three times
        assert_eq!(DepthAnalyzer::new(&g, &caps, &reg).max_depth_bits(start) / 8, 30 + 3 * 20);
    }

    #[test]
    fn test_zero_shift_cycle_is_not_unbounded() {
        let reg = PhvRegistry::new();
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        g.define_state("start", StateBody::new().with_default(MatchDecl::default_match().shift(14).to("a")))
            .unwrap();
        g.define_state(
            "a",
            StateBody::new()
                .key(crate::graph::KeyField::byte(0))
                .with_match(MatchDecl::exact(Ternary::exact(1, 8)).to("b")),
        )
        .unwrap();
        g.define_state("b", StateBody::new().with_default(MatchDecl::default_match().to("a")))
            .unwrap();
        prepare(&mut g, &reg);

        let caps = Target::Tofino.caps();
        let start = g.state_id("start").unwrap();
        assert_eq!(DepthAnalyzer::new(&g, &caps, &reg).max_depth_bits(start), 14 * 8);
        assert_eq!(words(&g, &reg), 4);
    }
}
