// This module implements the TCAM row and lookup-key compiler. Every match of the parser
// graph is given one row (or, for a value set, a contiguous block of rows) from the
// instance's RowPool, which hands out indices from the highest free index downward. For
// each row it builds the ternary key (state code concatenated with the lookup lanes laid
// out from the state's key fields), the successor encoding, the shift and buffer
// requirement and the counter directives. Offset, key and capability problems are
// recoverable per-match errors: they are reported through the session and the pass moves
// on to the next match. Running out of rows is reported once however many matches are
// left without one.

//! TCAM row allocation and lookup-key encoding.

use crate::core::{CompileError, CompileSession, TargetCaps, Ternary};
use crate::graph::{
    ChecksumKind, CounterOp, ExtractSource, Match, MatchId, MatchValue, Next, ParserGraph, State, StateId,
};
use std::fmt;
use std::ops::Range;

/// Finite pool of TCAM row indices, allocated top-down.
#[derive(Debug, Clone)]
pub struct RowPool {
    capacity: u16,
    used: u16,
}

impl RowPool {
    pub fn new(capacity: u16) -> Self {
        Self { capacity, used: 0 }
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn used(&self) -> u16 {
        self.used
    }

    pub fn remaining(&self) -> u16 {
        self.capacity - self.used
    }

    /// Take `count` contiguous rows below the last allocation.
    pub fn allocate(&mut self, count: u16) -> Option<Range<u16>> {
        if count == 0 || count > self.remaining() {
            return None;
        }
        let hi = self.capacity - self.used;
        self.used += count;
        Some(hi - count..hi)
    }
}

/// Ternary key of one row: state code in the high bits, lookup lanes below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcamKey {
    pub state: Ternary,
    pub lookup: Ternary,
}

impl fmt::Display for TcamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.state, self.lookup)
    }
}

/// Successor field of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextEncoding {
    Done,
    State { name: String, code: Ternary },
    /// Several successors selected by an ambiguous code pattern.
    Pattern(Ternary),
}

impl fmt::Display for NextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextEncoding::Done => write!(f, "done"),
            NextEncoding::State { name, code } => write!(f, "{} ({})", name, code),
            NextEncoding::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

/// Which entry of a value set a row holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSetEntry {
    pub name: String,
    pub entry: u16,
}

/// Compiled form of one match, or one entry of a value set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: u16,
    pub state: StateId,
    pub match_id: MatchId,
    /// `state[n]` / `state[default]`.
    pub label: String,
    pub key: TcamKey,
    pub shift: u8,
    pub buf_req: u8,
    pub next: NextEncoding,
    pub counters: Vec<CounterOp>,
    pub offset_inc: bool,
    pub value_set: Option<ValueSetEntry>,
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: {} key {} shift {} buf {} -> {}",
            self.index, self.label, self.key, self.shift, self.buf_req, self.next
        )?;
        if let Some(vs) = &self.value_set {
            write!(f, " valueset {}[{}]", vs.name, vs.entry)?;
        }
        if self.offset_inc {
            write!(f, " loop")?;
        }
        for c in &self.counters {
            write!(f, " ctr {}", c)?;
        }
        Ok(())
    }
}

/// Allocates rows and encodes keys for one parser instance.
pub struct RowCompiler {
    caps: TargetCaps,
    pool: RowPool,
}

impl RowCompiler {
    pub fn new(caps: TargetCaps) -> Self {
        Self {
            caps,
            pool: RowPool::new(caps.tcam_rows),
        }
    }

    pub fn pool(&self) -> &RowPool {
        &self.pool
    }

    /// Compile every match of the graph, returning rows ordered by index.
    pub fn compile(&mut self, graph: &mut ParserGraph, session: &mut CompileSession) -> Vec<Row> {
        let mut rows = Vec::new();

        for sid in graph.state_ids().collect::<Vec<_>>() {
            let mids: Vec<MatchId> = graph.state(sid).all_matches().collect();
            for mid in mids {
                let label = graph.match_label(mid);
                let state = graph.state(sid);
                let m = graph.get_match(mid);

                for err in self.validate(state, m) {
                    session.report(err, m.loc, label.clone());
                }

                let lookup = match self.build_lookup(state, &m.value) {
                    Ok(lookup) => lookup,
                    Err(err) => {
                        session.report(err, m.loc, label.clone());
                        Ternary::any(self.lookup_bits())
                    }
                };

                if m.value.row_count() == 0 {
                    continue;
                }
                let Some(range) = self.pool.allocate(m.value.row_count()) else {
                    session.report(
                        CompileError::ResourceExhausted {
                            resource: "parser TCAM rows",
                            capacity: u32::from(self.caps.tcam_rows),
                        },
                        m.loc,
                        label,
                    );
                    continue;
                };
                log::trace!("{}: {} gets rows {:?}", graph.name(), label, range);

                let key = TcamKey {
                    state: state.code.unwrap_or(Ternary::any(self.caps.state_code_bits)),
                    lookup,
                };
                let next = self.encode_next(graph, m);
                let buf_req = m.buf_req.unwrap_or_else(|| self.auto_buf_req(state, m));

                for (i, index) in range.clone().enumerate() {
                    let value_set = match &m.value {
                        MatchValue::ValueSet { name, .. } => Some(ValueSetEntry {
                            name: name.clone(),
                            entry: i as u16,
                        }),
                        _ => None,
                    };
                    rows.push(Row {
                        index,
                        state: sid,
                        match_id: mid,
                        label: label.clone(),
                        key,
                        shift: m.shift,
                        buf_req,
                        next: next.clone(),
                        counters: m.counters.clone(),
                        offset_inc: m.offset_inc,
                        value_set,
                    });
                }
                session.record_rows(range.len());
                graph.match_mut(mid).rows = Some(range);
            }
        }

        rows.sort_by_key(|r| r.index);
        log::debug!("{}: {} of {} rows used", graph.name(), self.pool.used(), self.pool.capacity());
        rows
    }

    fn lookup_bits(&self) -> u8 {
        self.caps.key_bytes * 8
    }

    /// Lookup lanes for a match value under the state's key layout.
    pub fn build_lookup(&self, state: &State, value: &MatchValue) -> Result<Ternary, CompileError> {
        let lanes = self.lookup_bits();
        let field_bytes: u32 = state.key.iter().map(|k| u32::from(k.bytes())).sum();
        if field_bytes > u32::from(self.caps.key_bytes) {
            return Err(CompileError::InvalidKey {
                reason: format!(
                    "key of state '{}' needs {} bytes, lookup holds {}",
                    state.name, field_bytes, self.caps.key_bytes
                ),
            });
        }

        let t = match value {
            MatchValue::Const(t) if !t.is_any() => *t,
            _ => return Ok(Ternary::any(lanes)),
        };
        if state.key.is_empty() {
            return Err(CompileError::InvalidKey {
                reason: format!("state '{}' matches {} without a key", state.name, t),
            });
        }
        let field_bits = (field_bytes * 8) as u8;
        if t.width() > field_bits {
            return Err(CompileError::InvalidKey {
                reason: format!("match value {} is wider than the {}-bit key", t, field_bits),
            });
        }
        Ok(t.concat(Ternary::any(lanes - t.width())))
    }

    fn encode_next(&self, graph: &ParserGraph, m: &Match) -> NextEncoding {
        match m.successors.as_slice() {
            [] => NextEncoding::Done,
            [one] => {
                let succ = graph.state(*one);
                NextEncoding::State {
                    name: succ.name.clone(),
                    code: succ.code.unwrap_or(Ternary::any(self.caps.state_code_bits)),
                }
            }
            _ => match &m.next {
                Next::Pattern(p) => NextEncoding::Pattern(p.resize(self.caps.state_code_bits)),
                _ => NextEncoding::Pattern(Ternary::any(self.caps.state_code_bits)),
            },
        }
    }

    /// One past the highest buffer byte the match or its state's key reads.
    pub fn auto_buf_req(&self, state: &State, m: &Match) -> u8 {
        let key = state.key.iter().map(|k| k.last_byte());
        let saves = m.extracts.iter().filter_map(|ex| match ex.source {
            ExtractSource::Buffer { start, len } if len > 0 => Some(u32::from(start) + u32::from(len) - 1),
            _ => None,
        });
        let checksums = m
            .checksums
            .iter()
            .filter(|c| c.end > c.start)
            .map(|c| u32::from(c.end) - 1);
        let counters = m.counters.iter().filter_map(|c| match c {
            CounterOp::LoadBuffer { offset, .. } => Some(u32::from(*offset)),
            _ => None,
        });

        key.chain(saves)
            .chain(checksums)
            .chain(counters)
            .max()
            .map_or(0, |hi| (hi + 1).min(u32::from(self.caps.buffer_bytes)) as u8)
    }

    /// Per-match offset and capability checks.
    pub fn validate(&self, state: &State, m: &Match) -> Vec<CompileError> {
        let limit = u32::from(self.caps.buffer_bytes);
        let mut errors = Vec::new();
        if let MatchValue::ValueSet { name, size: 0 } = &m.value {
            errors.push(CompileError::InvalidKey {
                reason: format!("value set '{}' has no entries", name),
            });
        }
        let check_offset = |last: u32, errors: &mut Vec<CompileError>| {
            if last >= limit {
                errors.push(CompileError::OffsetOutOfRange { offset: last, limit });
            }
        };

        for k in &state.key {
            check_offset(k.last_byte(), &mut errors);
        }
        if u32::from(m.shift) > limit {
            errors.push(CompileError::OffsetOutOfRange {
                offset: u32::from(m.shift),
                limit,
            });
        }
        if let Some(req) = m.buf_req {
            if u32::from(req) > limit {
                errors.push(CompileError::OffsetOutOfRange {
                    offset: u32::from(req),
                    limit,
                });
            }
        }
        for ex in &m.extracts {
            if let ExtractSource::Buffer { start, len } = ex.source {
                check_offset(u32::from(start) + u32::from(len.max(1)) - 1, &mut errors);
            }
        }
        for c in &m.checksums {
            if c.end > c.start {
                check_offset(u32::from(c.end) - 1, &mut errors);
            }
            if c.unit >= self.caps.checksum_units {
                errors.push(CompileError::UnsupportedFeature {
                    feature: format!("checksum unit {}", c.unit),
                    target: self.caps.name,
                });
            }
            if c.kind == ChecksumKind::Clot && !self.caps.clot_checksum {
                errors.push(CompileError::UnsupportedFeature {
                    feature: "CLOT checksum".to_string(),
                    target: self.caps.name,
                });
            }
        }
        for c in &m.counters {
            match c {
                CounterOp::Push { .. } | CounterOp::Pop if !self.caps.counter_stack => {
                    errors.push(CompileError::UnsupportedFeature {
                        feature: "parser counter stack".to_string(),
                        target: self.caps.name,
                    });
                }
                CounterOp::LoadBuffer { offset, .. } => check_offset(u32::from(*offset), &mut errors),
                _ => {}
            }
        }
        errors
    }
}
