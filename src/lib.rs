//! prsc - parser-program compiler for programmable packet parsers.
//!
//! A parser is a graph of states. Each state selects a transition by a
//! ternary match over a few bytes of the input buffer, and each transition
//! shifts the buffer, writes header fields to destination registers and
//! moves to the next state. This crate lowers such a graph to:
//!
//! - a table of TCAM rows, one per match (one per entry for value sets),
//! - an extraction plan per match, placed on the target's extractor slots,
//! - the worst-case parse depth per start state, in buffer words.
//!
//! # Primary Usage
//!
//! ```ignore
//! use prsc::{CompileOptions, ParserCompiler, Target};
//! use prsc::text::TextProgram;
//!
//! let mut file = TextProgram::parse(&source)?;
//! let compiler = ParserCompiler::new(&file.registry, CompileOptions::new(Target::Tofino));
//! let program = compiler.compile(&mut file.parsers[0])?;
//! println!("{}", program.dump());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (ternary values, targets, registry, errors, session, slots)
//! - [`graph`] - Parser state graph and its structural analysis
//! - [`depth`] - Worst-case parse depth
//! - [`rows`] - TCAM row allocation and key construction
//! - [`extract`] - Extractor slot allocation and padding propagation
//! - [`compiler`] - Pass pipeline per parser instance
//! - [`text`] - Description file format and FileCheck runner

pub mod compiler;
pub mod core;
pub mod depth;
pub mod extract;
pub mod graph;
pub mod program;
pub mod rows;
pub mod text;

pub use compiler::{CompileOptions, ParserCompiler};
pub use core::{
    CompileError, CompileFailure, CompileSession, CompileStats, Diagnostics, PhvRegistry,
    PhvWidth, SlotClass, Target, TargetCaps, Ternary,
};
pub use depth::{DepthAnalyzer, DepthReport};
pub use extract::{ExtractAllocator, MatchPlan, PaddingPropagator, PlanTable};
pub use graph::{Direction, MatchDecl, ParserGraph, StateBody};
pub use program::ParserProgram;
pub use rows::{Row, RowCompiler};
