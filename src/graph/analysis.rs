// This module implements the structural passes run over a parser graph before any
// hardware resource is allocated: state-code assignment, next-state and start-state
// resolution, destination-register resolution against the registry, predecessor link
// construction, and the reachability walk that reports unreachable states. Structural
// problems are found here so that later passes can assume a well-formed graph. Cycles
// are legal (header-stack loops), so every walk is visited-set based and terminates on
// loops without rejecting them.

//! Structural analysis of the parser graph.

use super::{MatchId, Next, ParserGraph, StateId};
use crate::core::{CompileError, CompileResult, Diagnostics, PhvRegistry, Ternary};
use hashbrown::HashSet;

impl ParserGraph {
    /// Give every state without an explicit code the next unused code.
    ///
    /// Explicit codes may contain don't-care bits; any concrete code covered by
    /// an explicit code is considered used.
    pub fn assign_codes(&mut self, code_bits: u8) -> CompileResult<()> {
        let explicit: Vec<(StateId, Ternary)> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.explicit_code)
            .filter_map(|(i, s)| s.code.map(|c| (StateId(i as u32), c.resize(code_bits))))
            .collect();

        for (i, (a, ca)) in explicit.iter().enumerate() {
            for (b, cb) in &explicit[i + 1..] {
                if ca.overlaps(cb) {
                    return Err(CompileError::DuplicateDefinition {
                        kind: "state code",
                        name: format!(
                            "{} ({} overlaps {} of {})",
                            self.state(*a).name,
                            ca,
                            cb,
                            self.state(*b).name
                        ),
                    });
                }
            }
        }

        let space: u64 = 1u64 << code_bits;
        let mut next_code: u64 = 0;
        for idx in 0..self.states.len() {
            if self.states[idx].code.is_some() {
                continue;
            }
            while next_code < space && explicit.iter().any(|(_, c)| c.matches(next_code)) {
                next_code += 1;
            }
            if next_code >= space {
                return Err(CompileError::ResourceExhausted {
                    resource: "parser state codes",
                    capacity: space as u32,
                });
            }
            let code = Ternary::exact(next_code, code_bits);
            log::trace!("{}: state {} gets code {}", self.name, self.states[idx].name, code);
            self.states[idx].code = Some(code);
            next_code += 1;
        }
        Ok(())
    }

    /// Resolve start states and next-state references.
    ///
    /// Name references resolve by name; pattern references resolve to every
    /// other state whose code overlaps the pattern, so codes must be assigned
    /// first. Returns the number of errors reported.
    pub fn resolve_references(&mut self, diags: &mut Diagnostics) -> usize {
        let mut errors = 0;

        self.starts.clear();
        let mut start_names = self.start_names.clone();
        if start_names.is_empty() {
            start_names.push("start".to_string());
        }
        for name in &start_names {
            match self.state_id(name) {
                Some(id) => {
                    if !self.starts.contains(&id) {
                        self.starts.push(id);
                    }
                }
                None => {
                    diags.report(
                        CompileError::UnresolvedReference {
                            kind: "start state",
                            reference: name.clone(),
                        },
                        Default::default(),
                        Some(self.name.clone()),
                    );
                    errors += 1;
                }
            }
        }

        for idx in 0..self.matches.len() {
            let id = MatchId(idx as u32);
            let owner = self.matches[idx].owner;
            let resolved: Result<Vec<StateId>, CompileError> = match &self.matches[idx].next {
                Next::Done => Ok(Vec::new()),
                Next::Name(name) => self
                    .state_id(name)
                    .map(|s| vec![s])
                    .ok_or_else(|| CompileError::UnresolvedReference {
                        kind: "state",
                        reference: name.clone(),
                    }),
                Next::Pattern(pattern) => {
                    let hits: Vec<StateId> = self
                        .state_ids()
                        .filter(|&s| s != owner)
                        .filter(|&s| {
                            self.state(s)
                                .code
                                .is_some_and(|c| c.overlaps(&pattern.resize(c.width())))
                        })
                        .collect();
                    if hits.is_empty() {
                        Err(CompileError::UnresolvedReference {
                            kind: "state with code",
                            reference: pattern.to_string(),
                        })
                    } else {
                        Ok(hits)
                    }
                }
            };

            match resolved {
                Ok(succs) => self.matches[idx].successors = succs,
                Err(e) => {
                    let loc = self.matches[idx].loc;
                    diags.report(e, loc, Some(self.match_label(id)));
                    self.matches[idx].successors.clear();
                    errors += 1;
                }
            }
        }
        errors
    }

    /// Resolve extraction and checksum destinations through the registry.
    pub fn resolve_destinations(&mut self, registry: &PhvRegistry, diags: &mut Diagnostics) -> usize {
        let mut errors = 0;
        for idx in 0..self.matches.len() {
            let label = self.match_label(MatchId(idx as u32));
            let m = &mut self.matches[idx];
            for ex in &mut m.extracts {
                ex.container = registry.lookup(&ex.dest);
                if ex.container.is_none() {
                    diags.report(
                        CompileError::UnresolvedReference {
                            kind: "register",
                            reference: ex.dest.clone(),
                        },
                        m.loc,
                        Some(label.clone()),
                    );
                    errors += 1;
                }
            }
            for ck in &mut m.checksums {
                if let Some(dest) = &ck.dest {
                    ck.container = registry.lookup(dest);
                    if ck.container.is_none() {
                        diags.report(
                            CompileError::UnresolvedReference {
                                kind: "register",
                                reference: dest.clone(),
                            },
                            m.loc,
                            Some(label.clone()),
                        );
                        errors += 1;
                    }
                }
            }
        }
        errors
    }

    /// Register every match as a predecessor of each of its successors.
    pub fn compute_predecessors(&mut self) {
        for state in &mut self.states {
            state.preds.clear();
        }
        for idx in 0..self.matches.len() {
            let id = MatchId(idx as u32);
            for s in self.matches[idx].successors.clone() {
                let preds = &mut self.states[s.index()].preds;
                if !preds.contains(&id) {
                    preds.push(id);
                }
            }
        }
    }

    /// States reachable from the start states, in depth-first preorder.
    pub fn reachable_states(&self) -> Vec<StateId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<StateId> = self.starts.iter().rev().copied().collect();
        while let Some(state) = stack.pop() {
            if !visited.insert(state) {
                continue;
            }
            order.push(state);
            let succs: Vec<StateId> = self
                .state(state)
                .all_matches()
                .flat_map(|m| self.get_match(m).successors.iter().copied())
                .collect();
            for succ in succs.into_iter().rev() {
                if !visited.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
        order
    }

    /// Report every state no start state reaches. Non-fatal.
    pub fn mark_unreachable(&self, diags: &mut Diagnostics) -> Vec<StateId> {
        let reached: HashSet<StateId> = self.reachable_states().into_iter().collect();
        let unreachable: Vec<StateId> = self.state_ids().filter(|s| !reached.contains(s)).collect();
        for &s in &unreachable {
            let state = self.state(s);
            diags.report(
                CompileError::Unreachable { name: state.name.clone() },
                state.loc,
                Some(self.name.clone()),
            );
        }
        unreachable
    }
}
