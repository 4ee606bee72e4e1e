// This module defines ParserProgram, the output handed to target serializers once a
// parser instance compiled without errors: the TCAM row table ordered by row index, the
// extraction plan of every match (reachable per row through the row's match id), the
// per-start-state depths in buffer words, the compilation statistics and any warnings
// recorded on the way. The textual dump produced by dump()/Display is what the check
// runner and the command-line driver print.

//! Compiled parser program.

use crate::core::{CompileStats, Diagnostics, Target};
use crate::depth::DepthReport;
use crate::extract::{MatchPlan, PlanTable};
use crate::graph::Direction;
use crate::rows::Row;
use std::fmt;

#[derive(Debug, Clone)]
pub struct ParserProgram {
    pub name: String,
    pub direction: Direction,
    pub target: Target,
    /// Rows ordered by index.
    pub rows: Vec<Row>,
    pub plans: PlanTable,
    pub depths: DepthReport,
    pub stats: CompileStats,
    pub warnings: Diagnostics,
}

impl ParserProgram {
    pub fn row(&self, index: u16) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Extraction plan executed by row `index`.
    pub fn plan_for_row(&self, index: u16) -> Option<&MatchPlan> {
        self.row(index).and_then(|r| self.plans.get(r.match_id))
    }

    pub fn max_depth_words(&self) -> u32 {
        self.depths.max_words
    }

    pub fn padding_count(&self) -> usize {
        self.plans.padding_count()
    }

    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParserProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "parser {} {} target {}", self.name, self.direction, self.target)?;
        for (start, words) in &self.depths.per_start {
            writeln!(f, "depth {} {} words", start, words)?;
        }
        writeln!(f, "max depth {} words", self.depths.max_words)?;
        for row in &self.rows {
            writeln!(f, "{}", row)?;
            // value-set replicas share the plan of their first row
            if row.value_set.as_ref().is_some_and(|vs| vs.entry > 0) {
                continue;
            }
            if let Some(plan) = self.plans.get(row.match_id) {
                for entry in &plan.entries {
                    writeln!(f, "  {}", entry)?;
                }
            }
        }
        for w in self.warnings.iter() {
            writeln!(f, "{}", w)?;
        }
        Ok(())
    }
}
