// This module holds the in-memory parser graph for one parser instance and direction.
// States and matches live in two arenas owned by ParserGraph and refer to each other
// through StateId and MatchId indices, so every later pass (depth analysis, row
// allocation, slot allocation, padding propagation) can key its caches by plain
// integers. A state owns an ordered list of matches plus an optional default match; a
// match owns its extraction, checksum and counter operations, its successor list (filled
// in by reference resolution) and the TCAM rows it was given by the row compiler.
// StateBody and MatchDecl are the declarations the front end hands to define_state; the
// builder-style methods on MatchDecl keep hand-built graphs in tests short.

//! Parser state/match graph.

pub mod analysis;

use crate::core::{CompileError, CompileResult, ContainerId, SourceLoc, Ternary};
use hashbrown::HashMap;
use std::fmt;
use std::ops::Range;

/// Index of a state in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// Index of a match in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(pub u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MatchId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Width of one lookup-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFieldKind {
    Byte,
    Half,
}

/// One buffer location feeding the lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub kind: KeyFieldKind,
    /// Buffer byte offset.
    pub offset: u8,
}

impl KeyField {
    pub const fn byte(offset: u8) -> Self {
        Self { kind: KeyFieldKind::Byte, offset }
    }

    pub const fn half(offset: u8) -> Self {
        Self { kind: KeyFieldKind::Half, offset }
    }

    pub const fn bytes(&self) -> u8 {
        match self.kind {
            KeyFieldKind::Byte => 1,
            KeyFieldKind::Half => 2,
        }
    }

    /// Last buffer byte this field reads.
    pub fn last_byte(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.bytes()) - 1
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            KeyFieldKind::Byte => write!(f, "byte@{}", self.offset),
            KeyFieldKind::Half => write!(f, "half@{}", self.offset),
        }
    }
}

/// What a match compares the lookup key against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchValue {
    Const(Ternary),
    /// Runtime-programmed pattern occupying `size` consecutive rows.
    ValueSet { name: String, size: u16 },
    /// Catch-all default transition.
    Default,
}

impl MatchValue {
    /// Dominates every later match of the same state.
    pub fn is_catch_all(&self) -> bool {
        match self {
            MatchValue::Const(t) => t.is_any(),
            MatchValue::ValueSet { .. } => false,
            MatchValue::Default => true,
        }
    }

    /// Rows this match occupies.
    pub fn row_count(&self) -> u16 {
        match self {
            MatchValue::ValueSet { size, .. } => *size,
            _ => 1,
        }
    }
}

impl fmt::Display for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchValue::Const(t) => write!(f, "{}", t),
            MatchValue::ValueSet { name, size } => write!(f, "valueset {}[{}]", name, size),
            MatchValue::Default => write!(f, "default"),
        }
    }
}

/// Next-state reference as declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Done,
    Name(String),
    /// Every sibling state whose code overlaps the pattern.
    Pattern(Ternary),
}

impl Next {
    pub fn name(name: &str) -> Self {
        Next::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractSource {
    /// `len` bytes starting at buffer offset `start`.
    Buffer { start: u8, len: u8 },
    Constant(u32),
}

/// A save (copy from buffer) or set (write constant) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extract {
    pub dest: String,
    /// Filled in by `resolve_destinations`.
    pub container: Option<ContainerId>,
    pub source: ExtractSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Verify,
    Residual,
    Clot,
}

impl ChecksumKind {
    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::Verify => "verify",
            ChecksumKind::Residual => "residual",
            ChecksumKind::Clot => "clot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumOp {
    pub unit: u8,
    pub kind: ChecksumKind,
    /// Buffer byte range `start..end`.
    pub start: u8,
    pub end: u8,
    /// Register receiving the verification result.
    pub dest: Option<String>,
    pub container: Option<ContainerId>,
}

/// Parser counter directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    LoadImm(i16),
    LoadBuffer { offset: u8, mask: u8 },
    Add(i16),
    Push { hdr_len_inc: bool },
    Pop,
}

impl fmt::Display for CounterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterOp::LoadImm(v) => write!(f, "load {}", v),
            CounterOp::LoadBuffer { offset, mask } => write!(f, "loadbuf {} mask 0x{:02x}", offset, mask),
            CounterOp::Add(v) => write!(f, "add {}", v),
            CounterOp::Push { hdr_len_inc: true } => write!(f, "push hdrlen"),
            CounterOp::Push { hdr_len_inc: false } => write!(f, "push"),
            CounterOp::Pop => write!(f, "pop"),
        }
    }
}

/// A match as handed to `define_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDecl {
    pub value: MatchValue,
    pub shift: u8,
    pub buf_req: Option<u8>,
    pub next: Next,
    pub extracts: Vec<Extract>,
    pub checksums: Vec<ChecksumOp>,
    pub counters: Vec<CounterOp>,
    pub offset_inc: bool,
    pub loc: SourceLoc,
}

impl MatchDecl {
    pub fn new(value: MatchValue) -> Self {
        Self {
            value,
            shift: 0,
            buf_req: None,
            next: Next::Done,
            extracts: Vec::new(),
            checksums: Vec::new(),
            counters: Vec::new(),
            offset_inc: false,
            loc: SourceLoc::default(),
        }
    }

    pub fn exact(value: Ternary) -> Self {
        Self::new(MatchValue::Const(value))
    }

    pub fn default_match() -> Self {
        Self::new(MatchValue::Default)
    }

    pub fn value_set(name: &str, size: u16) -> Self {
        Self::new(MatchValue::ValueSet { name: name.to_string(), size })
    }

    pub fn shift(mut self, bytes: u8) -> Self {
        self.shift = bytes;
        self
    }

    pub fn buf_req(mut self, bytes: u8) -> Self {
        self.buf_req = Some(bytes);
        self
    }

    pub fn next(mut self, next: Next) -> Self {
        self.next = next;
        self
    }

    pub fn to(self, state: &str) -> Self {
        self.next(Next::name(state))
    }

    pub fn save(mut self, dest: &str, start: u8, len: u8) -> Self {
        self.extracts.push(Extract {
            dest: dest.to_string(),
            container: None,
            source: ExtractSource::Buffer { start, len },
        });
        self
    }

    pub fn set(mut self, dest: &str, value: u32) -> Self {
        self.extracts.push(Extract {
            dest: dest.to_string(),
            container: None,
            source: ExtractSource::Constant(value),
        });
        self
    }

    pub fn checksum(mut self, op: ChecksumOp) -> Self {
        self.checksums.push(op);
        self
    }

    pub fn counter(mut self, op: CounterOp) -> Self {
        self.counters.push(op);
        self
    }

    pub fn offset_inc(mut self) -> Self {
        self.offset_inc = true;
        self
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }
}

/// A state as handed to `define_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBody {
    pub code: Option<Ternary>,
    pub key: Vec<KeyField>,
    pub ignore_max_depth: bool,
    pub matches: Vec<MatchDecl>,
    pub default: Option<MatchDecl>,
    pub loc: SourceLoc,
}

impl StateBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, code: Ternary) -> Self {
        self.code = Some(code);
        self
    }

    pub fn key(mut self, field: KeyField) -> Self {
        self.key.push(field);
        self
    }

    pub fn ignore_max_depth(mut self) -> Self {
        self.ignore_max_depth = true;
        self
    }

    pub fn with_match(mut self, m: MatchDecl) -> Self {
        self.matches.push(m);
        self
    }

    pub fn with_default(mut self, m: MatchDecl) -> Self {
        self.default = Some(m);
        self
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }
}

#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    pub direction: Direction,
    /// Explicit code, or the one given by `assign_codes`.
    pub code: Option<Ternary>,
    pub explicit_code: bool,
    pub key: Vec<KeyField>,
    pub matches: Vec<MatchId>,
    pub default: Option<MatchId>,
    /// Matches that transition into this state.
    pub preds: Vec<MatchId>,
    pub ignore_max_depth: bool,
    pub loc: SourceLoc,
}

impl State {
    /// Matches in evaluation order, default last.
    pub fn all_matches(&self) -> impl Iterator<Item = MatchId> + '_ {
        self.matches.iter().copied().chain(self.default)
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub owner: StateId,
    pub value: MatchValue,
    pub shift: u8,
    pub buf_req: Option<u8>,
    pub next: Next,
    /// Filled in by `resolve_references`.
    pub successors: Vec<StateId>,
    pub extracts: Vec<Extract>,
    pub checksums: Vec<ChecksumOp>,
    pub counters: Vec<CounterOp>,
    pub offset_inc: bool,
    /// TCAM rows given by the row compiler.
    pub rows: Option<Range<u16>>,
    pub loc: SourceLoc,
}

/// States and matches of one parser instance.
#[derive(Debug, Clone)]
pub struct ParserGraph {
    name: String,
    direction: Direction,
    states: Vec<State>,
    matches: Vec<Match>,
    by_name: HashMap<String, StateId>,
    start_names: Vec<String>,
    starts: Vec<StateId>,
}

impl ParserGraph {
    pub fn new(name: &str, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            direction,
            states: Vec::new(),
            matches: Vec::new(),
            by_name: HashMap::new(),
            start_names: Vec::new(),
            starts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Add a state and its matches.
    pub fn define_state(&mut self, name: &str, body: StateBody) -> CompileResult<StateId> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::DuplicateDefinition {
                kind: "state",
                name: name.to_string(),
            });
        }

        let id = StateId(self.states.len() as u32);
        let matches: Vec<MatchId> = body
            .matches
            .into_iter()
            .map(|decl| self.push_match(id, decl))
            .collect();
        let default = body.default.map(|decl| self.push_match(id, decl));

        self.states.push(State {
            name: name.to_string(),
            direction: self.direction,
            explicit_code: body.code.is_some(),
            code: body.code,
            key: body.key,
            matches,
            default,
            preds: Vec::new(),
            ignore_max_depth: body.ignore_max_depth,
            loc: body.loc,
        });
        self.by_name.insert(name.to_string(), id);
        log::trace!("{}: defined state {} ({:?})", self.name, name, id);
        Ok(id)
    }

    fn push_match(&mut self, owner: StateId, decl: MatchDecl) -> MatchId {
        let id = MatchId(self.matches.len() as u32);
        self.matches.push(Match {
            owner,
            value: decl.value,
            shift: decl.shift,
            buf_req: decl.buf_req,
            next: decl.next,
            successors: Vec::new(),
            extracts: decl.extracts,
            checksums: decl.checksums,
            counters: decl.counters,
            offset_inc: decl.offset_inc,
            rows: None,
            loc: decl.loc,
        });
        id
    }

    /// Declare a start state by name; resolved by `resolve_references`.
    pub fn set_start(&mut self, name: &str) {
        if !self.start_names.iter().any(|n| n == name) {
            self.start_names.push(name.to_string());
        }
    }

    pub fn start_names(&self) -> &[String] {
        &self.start_names
    }

    pub fn starts(&self) -> &[StateId] {
        &self.starts
    }

    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.index()]
    }

    pub fn state_by_name(&self, name: &str) -> Option<&State> {
        self.state_id(name).map(|id| self.state(id))
    }

    pub fn get_match(&self, id: MatchId) -> &Match {
        &self.matches[id.index()]
    }

    pub fn match_mut(&mut self, id: MatchId) -> &mut Match {
        &mut self.matches[id.index()]
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn state_ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len() as u32).map(StateId)
    }

    pub fn match_ids(&self) -> impl Iterator<Item = MatchId> {
        (0..self.matches.len() as u32).map(MatchId)
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Human-readable label for a match: `state[index]` or `state[default]`.
    pub fn match_label(&self, id: MatchId) -> String {
        let m = self.get_match(id);
        let state = self.state(m.owner);
        match state.matches.iter().position(|&x| x == id) {
            Some(pos) => format!("{}[{}]", state.name, pos),
            None => format!("{}[default]", state.name),
        }
    }
}
