//! Property-based tests using proptest
//!
//! These tests check the depth analyzer, state-code assignment and padding
//! propagation over randomly shaped parser chains.

use prsc::core::{CompileSession, Diagnostics, PhvRegistry, PhvWidth, Target};
use prsc::extract::{PaddingCache, PaddingPropagator};
use prsc::graph::{Direction, MatchDecl, ParserGraph, StateBody};
use prsc::{CompileOptions, DepthAnalyzer, ParserCompiler};
use proptest::prelude::*;

/// A linear chain of states, one default match each.
fn chain(shifts: &[u8]) -> ParserGraph {
    let mut g = ParserGraph::new("ingress", Direction::Ingress);
    for (i, &shift) in shifts.iter().enumerate() {
        let name = if i == 0 { "start".to_string() } else { format!("s{}", i) };
        let mut m = MatchDecl::default_match().shift(shift);
        if i + 1 < shifts.len() {
            m = m.to(&format!("s{}", i + 1));
        }
        g.define_state(&name, StateBody::new().with_default(m)).unwrap();
    }
    let mut diags = Diagnostics::new();
    g.assign_codes(8).unwrap();
    g.resolve_references(&mut diags);
    assert!(!diags.has_errors());
    g
}

fn depth_bits(g: &ParserGraph) -> u32 {
    let caps = Target::Tofino.caps();
    let reg = PhvRegistry::new();
    let analyzer = DepthAnalyzer::new(g, &caps, &reg);
    let start = g.state_id("start").unwrap();
    analyzer.max_depth_bits(start)
}

// =============================================================================
// Depth Analysis
// =============================================================================

proptest! {
    /// A chain's depth is the sum of its shifts.
    #[test]
    fn test_chain_depth_is_sum_of_shifts(shifts in prop::collection::vec(1u8..=32, 1..8)) {
        let g = chain(&shifts);
        let total: u32 = shifts.iter().map(|&s| u32::from(s)).sum();
        prop_assert_eq!(depth_bits(&g), total * 8);

        let caps = Target::Tofino.caps();
        let reg = PhvRegistry::new();
        let words = DepthAnalyzer::new(&g, &caps, &reg).analyze().max_words;
        prop_assert_eq!(words, total.div_ceil(16).max(4));
    }

    /// Repeated analysis gives the same answer.
    #[test]
    fn test_depth_is_deterministic(shifts in prop::collection::vec(0u8..=32, 1..8)) {
        let g = chain(&shifts);
        let first = depth_bits(&g);
        for _ in 0..3 {
            prop_assert_eq!(depth_bits(&g), first);
        }
    }

    /// Growing any one shift never makes the parser shallower.
    #[test]
    fn test_depth_monotonic_in_shift(
        shifts in prop::collection::vec(0u8..=32, 1..8),
        pick in any::<prop::sample::Index>(),
        extra in 1u8..=16,
    ) {
        let before = depth_bits(&chain(&shifts));
        let mut grown = shifts.clone();
        let i = pick.index(grown.len());
        grown[i] = grown[i].saturating_add(extra);
        prop_assert!(depth_bits(&chain(&grown)) >= before);
    }
}

// =============================================================================
// State Codes
// =============================================================================

proptest! {
    /// Assigned codes are exact and pairwise disjoint.
    #[test]
    fn test_codes_are_unique(n in 1usize..=16) {
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        for i in 0..n {
            g.define_state(&format!("s{}", i), StateBody::new()).unwrap();
        }
        g.assign_codes(4).unwrap();

        let codes: Vec<_> = g.states().iter().map(|s| s.code.unwrap()).collect();
        for (i, a) in codes.iter().enumerate() {
            prop_assert!(a.is_exact());
            for b in &codes[i + 1..] {
                prop_assert!(!a.overlaps(b));
            }
        }
    }

    /// More states than codes is an error.
    #[test]
    fn test_code_space_exhaustion(n in 17usize..=40) {
        let mut g = ParserGraph::new("ingress", Direction::Ingress);
        for i in 0..n {
            g.define_state(&format!("s{}", i), StateBody::new()).unwrap();
        }
        prop_assert!(g.assign_codes(4).is_err());
    }
}

// =============================================================================
// Padding
// =============================================================================

fn state_name(i: usize) -> String {
    if i == 0 {
        "start".to_string()
    } else {
        format!("s{}", i)
    }
}

/// A chain where state `i` saves `saves[i]` 16-bit registers.
fn save_chain(saves: &[u8]) -> ParserGraph {
    let mut g = ParserGraph::new("ingress", Direction::Ingress);
    for (i, &n) in saves.iter().enumerate() {
        let mut m = MatchDecl::default_match().shift(12);
        for k in 0..n {
            m = m.save(&format!("H{}", k), k * 2, 2);
        }
        if i + 1 < saves.len() {
            m = m.to(&state_name(i + 1));
        }
        g.define_state(&state_name(i), StateBody::new().with_default(m)).unwrap();
    }
    g
}

proptest! {
    /// Every narrow-to-wide match leaves itself, all earlier states and the
    /// next state balanced, and a second pass has nothing left to pad.
    #[test]
    fn test_narrow_to_wide_neighbourhood_is_balanced(saves in prop::collection::vec(0u8..=6, 1..8)) {
        let mut reg = PhvRegistry::new();
        for k in 0..6 {
            reg.define_container(&format!("H{}", k), PhvWidth::W16).unwrap();
        }
        let caps = Target::Tofino.caps();
        let mut g = save_chain(&saves);
        let program = ParserCompiler::new(&reg, CompileOptions::new(Target::Tofino))
            .compile(&mut g)
            .unwrap();

        let default_of = |i: usize| g.state_by_name(&state_name(i)).unwrap().default.unwrap();
        for (i, &n) in saves.iter().enumerate() {
            if n <= 4 {
                continue;
            }
            prop_assert!(program.plans.get(default_of(i)).unwrap().narrow_to_wide);
            for j in 0..=(i + 1).min(saves.len() - 1) {
                let plan = program.plans.get(default_of(j)).unwrap();
                prop_assert!(plan.is_balanced(), "{} unbalanced after {}", state_name(j), state_name(i));
            }
        }

        let mut plans = program.plans.clone();
        let mut session = CompileSession::new("ingress", caps);
        let again = PaddingPropagator::new(&g, caps).run(&mut plans, &mut PaddingCache::new(), &mut session);
        prop_assert_eq!(again, 0);
        prop_assert!(!session.has_errors());
    }
}
