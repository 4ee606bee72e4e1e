//! Line-oriented text format for parser descriptions.
//!
//! This module provides a small description language used by the command-line
//! driver and the tests, so parser graphs can be written without building them
//! through the API by hand.
//!
//! # Format
//!
//! ```text
//! ; Comments start with semicolon
//! target tofino
//! phv H0 16
//! phv V0 8
//! stack vlan depth 2 valid V0
//! parser ingress {
//!   start start
//!   state start code 0x00 key half@12 {
//!     match 0x8100 -> vlan shift 14 { save H0 12..14 }
//!     default -> done shift 14
//!   }
//!   state vlan key half@2 {
//!     match 0x8100 -> vlan shift 4 loop { set V0 1 }
//!     default -> done shift 4
//!   }
//! }
//! ```

pub mod check;
pub mod parser;

pub use check::{CheckDirective, RunDirective, TestRunner, TestSpec};
pub use parser::{parse_program, TextError};

use crate::compiler::{CompileOptions, ParserCompiler};
use crate::core::{CompileFailure, PhvRegistry, Target};
use crate::graph::ParserGraph;
use crate::program::ParserProgram;

/// Everything a description file declares.
#[derive(Debug, Clone, Default)]
pub struct TextProgram {
    /// Target named by a `target` statement, if any.
    pub target: Option<Target>,
    pub registry: PhvRegistry,
    pub parsers: Vec<ParserGraph>,
}

impl TextProgram {
    pub fn parse(text: &str) -> Result<Self, TextError> {
        parse_program(text)
    }

    /// Default options: the file's target, or `fallback` when it names none.
    pub fn options(&self, fallback: Target) -> CompileOptions {
        CompileOptions::new(self.target.unwrap_or(fallback))
    }

    /// Compile every parser against the file's registry.
    pub fn compile(&mut self, options: CompileOptions) -> Vec<Result<ParserProgram, CompileFailure>> {
        let compiler = ParserCompiler::new(&self.registry, options);
        compiler.compile_all(&mut self.parsers)
    }

    pub fn parser(&self, name: &str) -> Option<&ParserGraph> {
        self.parsers.iter().find(|p| p.name() == name)
    }
}
