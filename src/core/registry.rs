// This module holds the explicit register registry handed to the parser compiler. It
// maps destination register (PHV container) names to their width and records header
// stacks together with the container that carries each stack's valid bits, which is
// how the depth analyzer discovers the trip count of a loop-carried match. The registry
// is built once per run by the driving context and shared read-only by every parser
// instance compiled in that run.

//! Destination register and header-stack registry.

use super::error::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::fmt;

/// Index of a container in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u32);

/// Width of a destination register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhvWidth {
    W8,
    W16,
    W32,
}

impl PhvWidth {
    pub const fn bits(self) -> u32 {
        match self {
            PhvWidth::W8 => 8,
            PhvWidth::W16 => 16,
            PhvWidth::W32 => 32,
        }
    }

    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(PhvWidth::W8),
            16 => Some(PhvWidth::W16),
            32 => Some(PhvWidth::W32),
            _ => None,
        }
    }
}

impl fmt::Display for PhvWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub width: PhvWidth,
}

/// A header stack whose depth bounds a loop-carried match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderStack {
    pub name: String,
    pub depth: u32,
    /// Container holding the stack's valid bits.
    pub valid: ContainerId,
}

#[derive(Debug, Clone, Default)]
pub struct PhvRegistry {
    containers: Vec<Container>,
    by_name: HashMap<String, ContainerId>,
    stacks: Vec<HeaderStack>,
    stack_by_valid: HashMap<ContainerId, usize>,
}

impl PhvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_container(&mut self, name: &str, width: PhvWidth) -> CompileResult<ContainerId> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::DuplicateDefinition {
                kind: "register",
                name: name.to_string(),
            });
        }
        let id = ContainerId(self.containers.len() as u32);
        self.containers.push(Container {
            name: name.to_string(),
            width,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn define_stack(&mut self, name: &str, depth: u32, valid: &str) -> CompileResult<()> {
        if self.stacks.iter().any(|s| s.name == name) {
            return Err(CompileError::DuplicateDefinition {
                kind: "header stack",
                name: name.to_string(),
            });
        }
        let valid = self.lookup(valid).ok_or_else(|| CompileError::UnresolvedReference {
            kind: "register",
            reference: valid.to_string(),
        })?;
        if self.stack_by_valid.contains_key(&valid) {
            return Err(CompileError::DuplicateDefinition {
                kind: "header stack valid register",
                name: self.containers[valid.0 as usize].name.clone(),
            });
        }
        self.stack_by_valid.insert(valid, self.stacks.len());
        self.stacks.push(HeaderStack {
            name: name.to_string(),
            depth,
            valid,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<ContainerId> {
        self.by_name.get(name).copied()
    }

    pub fn container(&self, id: ContainerId) -> &Container {
        &self.containers[id.0 as usize]
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn stacks(&self) -> &[HeaderStack] {
        &self.stacks
    }

    /// Header stack whose valid bits live in `id`.
    pub fn stack_for_valid(&self, id: ContainerId) -> Option<&HeaderStack> {
        self.stack_by_valid.get(&id).map(|&idx| &self.stacks[idx])
    }
}
