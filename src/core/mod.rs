// This module serves as the hub for the parser compiler's shared infrastructure: the
// ternary value type used for state codes and lookup keys, the closed target enum and
// its capability tables, the explicit register registry, the error taxonomy with its
// diagnostics accumulator, the per-instance compilation session, and the extractor
// slot file used by the slot allocator. Everything here is independent of the parser
// graph and is reused by every pass.

//! Core parser-compiler infrastructure.
//!
//! # Key Components
//!
//! - `ternary`: 0/1/don't-care values for codes and keys
//! - `target`: per-target capability tables
//! - `registry`: destination registers and header stacks
//! - `error`: error taxonomy and diagnostics
//! - `session`: per-instance diagnostics and statistics
//! - `slot_file`: extractor slot bookkeeping

pub mod error;
pub mod registry;
pub mod session;
pub mod slot_file;
pub mod target;
pub mod ternary;

pub use error::{
    CompileError, CompileFailure, CompileResult, Diagnostic, Diagnostics, Severity, SourceLoc,
};

pub use registry::{Container, ContainerId, HeaderStack, PhvRegistry, PhvWidth};

pub use session::{CompileSession, CompileStats};

pub use slot_file::{SlotAllocError, SlotBitSet, SlotClass, SlotFile, SlotId, SlotOwner};

pub use target::{SlotUniverseShape, Target, TargetCaps};

pub use ternary::{Ternary, TernaryParseError};
