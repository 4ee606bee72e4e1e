// This module defines the error taxonomy of the parser compiler using the thiserror
// crate. CompileError covers structural problems (duplicate definitions, unresolved
// references), resource exhaustion (state codes, TCAM rows, extractor slots), target
// capability problems, per-match validation problems (buffer offsets, extraction widths,
// key layouts) and the non-fatal unreachable-state warning. Diagnostics accumulates
// errors and warnings for one parser instance so a pass can continue best-effort and
// report everything at once; identical resource-exhaustion messages are reported once
// and further copies are only counted. CompileFailure wraps the diagnostics of an
// instance that recorded at least one error.

//! Error types for the parser compiler.
//!
//! Using thiserror for the error taxonomy.

use hashbrown::HashSet;
use std::fmt;
use thiserror::Error;

/// Main error type for parser compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{kind} '{name}' is defined more than once")]
    DuplicateDefinition { kind: &'static str, name: String },

    #[error("no {kind} matching '{reference}'")]
    UnresolvedReference { kind: &'static str, reference: String },

    #[error("ran out of {resource} (capacity {capacity})")]
    ResourceExhausted { resource: &'static str, capacity: u32 },

    #[error("{feature} is not supported on {target}")]
    UnsupportedFeature { feature: String, target: &'static str },

    #[error("state '{name}' is not reachable from any start state")]
    Unreachable { name: String },

    #[error("buffer offset {offset} is out of range (buffer holds {limit} bytes)")]
    OffsetOutOfRange { offset: u32, limit: u32 },

    #[error("invalid extraction: {reason}")]
    InvalidExtract { reason: String },

    #[error("invalid match key: {reason}")]
    InvalidKey { reason: String },
}

impl CompileError {
    pub fn severity(&self) -> Severity {
        match self {
            CompileError::Unreachable { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Structural and resource errors abort the instance; the rest are local.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CompileError::DuplicateDefinition { .. }
                | CompileError::UnresolvedReference { .. }
                | CompileError::ResourceExhausted { .. }
        )
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Location in the parser description a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SourceLoc {
    /// 1-based line; 0 when unknown.
    pub line: u32,
}

impl SourceLoc {
    pub const fn line(line: u32) -> Self {
        Self { line }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "<unknown>")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: SourceLoc,
    /// State or match the problem was found in.
    pub context: Option<String>,
    pub error: CompileError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning")?,
            Severity::Error => write!(f, "error")?,
        }
        if self.loc.is_known() {
            write!(f, ": {}", self.loc)?;
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Accumulated diagnostics for one parser instance.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    exhausted: HashSet<String>,
    suppressed: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem. Returns false when the diagnostic was suppressed as a
    /// repeat of an earlier resource-exhaustion message.
    pub fn report(&mut self, error: CompileError, loc: SourceLoc, context: Option<String>) -> bool {
        if let CompileError::ResourceExhausted { .. } = error {
            if !self.exhausted.insert(error.to_string()) {
                self.suppressed += 1;
                return false;
            }
        }

        let diag = Diagnostic {
            severity: error.severity(),
            loc,
            context,
            error,
        };
        match diag.severity {
            Severity::Warning => log::warn!("{}", diag),
            Severity::Error => log::error!("{}", diag),
        }
        self.entries.push(diag);
        true
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|d| d.error.is_fatal())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of repeated exhaustion messages that were not recorded.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Move all diagnostics of `other` into `self`.
    pub fn absorb(&mut self, other: Diagnostics) {
        for d in other.entries {
            self.report(d.error, d.loc, d.context);
        }
        self.suppressed += other.suppressed;
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.entries {
            writeln!(f, "{}", d)?;
        }
        if self.suppressed > 0 {
            writeln!(f, "({} repeated message(s) suppressed)", self.suppressed)?;
        }
        Ok(())
    }
}

/// A parser instance that could not be compiled.
#[derive(Error, Debug, Clone)]
#[error("parser '{instance}' failed to compile with {} error(s)", .diagnostics.error_count())]
pub struct CompileFailure {
    pub instance: String,
    pub diagnostics: Diagnostics,
}
