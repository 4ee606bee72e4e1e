// This module provides the per-instance compilation session. A CompileSession is created
// for every parser instance the driver compiles and owns everything that instance
// accumulates while its passes run: the diagnostics list and the compilation statistics.
// Sessions are never shared between instances, so independent instances can be compiled
// in parallel without synchronisation. CompileStats records what the passes consumed
// (states, matches, TCAM rows, extractor slots per class, narrow-to-wide extractions and
// inserted padding) and renders a human-readable summary through Display.

//! Per-instance compilation session.

use super::error::{CompileError, Diagnostics, SourceLoc};
use super::slot_file::SlotClass;
use super::target::TargetCaps;
use std::collections::BTreeMap;
use std::fmt;

/// Compilation session for a single parser instance.
#[derive(Debug)]
pub struct CompileSession {
    instance: String,
    caps: TargetCaps,
    diagnostics: Diagnostics,
    stats: CompileStats,
}

impl CompileSession {
    pub fn new(instance: &str, caps: TargetCaps) -> Self {
        Self {
            instance: instance.to_string(),
            caps,
            diagnostics: Diagnostics::new(),
            stats: CompileStats {
                rows_capacity: caps.tcam_rows as usize,
                ..CompileStats::default()
            },
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn caps(&self) -> &TargetCaps {
        &self.caps
    }

    /// Record a problem found at `loc` inside `context`.
    pub fn report(&mut self, error: CompileError, loc: SourceLoc, context: impl Into<String>) {
        self.diagnostics.report(error, loc, Some(context.into()));
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut CompileStats {
        &mut self.stats
    }

    pub fn record_rows(&mut self, count: usize) {
        self.stats.rows_used += count;
    }

    pub fn record_slot(&mut self, class: SlotClass) {
        *self.stats.slots_used.entry(class).or_insert(0) += 1;
    }

    pub fn record_narrow_to_wide(&mut self) {
        self.stats.narrow_to_wide += 1;
    }

    pub fn record_padding(&mut self, count: usize) {
        self.stats.padding_inserted += count;
    }

    /// Consume the session, keeping its diagnostics and statistics.
    pub fn finish(self) -> (Diagnostics, CompileStats) {
        (self.diagnostics, self.stats)
    }
}

/// Compilation statistics for one parser instance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompileStats {
    pub states: usize,
    pub matches: usize,
    pub rows_used: usize,
    pub rows_capacity: usize,
    /// Extractor slots consumed per class, summed over all matches.
    pub slots_used: BTreeMap<SlotClass, usize>,
    /// Matches that needed at least one narrow-to-wide extraction.
    pub narrow_to_wide: usize,
    pub padding_inserted: usize,
    pub max_depth_words: u32,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parser Compilation Statistics:")?;
        writeln!(f, "  States: {}", self.states)?;
        writeln!(f, "  Matches: {}", self.matches)?;
        writeln!(f, "  TCAM rows: {}/{}", self.rows_used, self.rows_capacity)?;
        if !self.slots_used.is_empty() {
            writeln!(f, "  Extractor slots:")?;
            for (class, count) in &self.slots_used {
                writeln!(f, "    {}: {}", class.name(), count)?;
            }
        }
        writeln!(f, "  Narrow-to-wide matches: {}", self.narrow_to_wide)?;
        writeln!(f, "  Padding extractions: {}", self.padding_inserted)?;
        writeln!(f, "  Max depth: {} words", self.max_depth_words)?;
        Ok(())
    }
}
