// This module drives the compilation of one parser instance through every pass: code
// assignment and reference resolution on the graph, predecessor links and the
// reachability warning, then parse-depth analysis, TCAM row allocation, extractor slot
// allocation and padding propagation. Structural errors stop the pipeline before any
// resource is allocated; resource and capability errors are accumulated best-effort and
// fail the instance at the end. Every instance gets its own CompileSession, row pool,
// slot files and padding cache, so compile_all can run instances in parallel (behind the
// `parallel` feature, using rayon) with only the registry and the target tables shared.

//! Parser compilation pipeline.

use crate::core::{
    CompileError, CompileFailure, CompileSession, PhvRegistry, SourceLoc, Target, TargetCaps,
};
use crate::depth::DepthAnalyzer;
use crate::extract::{ExtractAllocator, PaddingCache, PaddingPropagator};
use crate::graph::ParserGraph;
use crate::program::ParserProgram;
use crate::rows::RowCompiler;

/// Options of one compiler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub target: Target,
    /// Overrides the target's output FIFO depth for padding propagation.
    pub fifo_depth: Option<u32>,
    /// Fail instances that declare unreachable states.
    pub unreachable_is_error: bool,
}

impl CompileOptions {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            fifo_depth: None,
            unreachable_is_error: false,
        }
    }

    pub fn with_fifo_depth(mut self, depth: u32) -> Self {
        self.fifo_depth = Some(depth);
        self
    }

    pub fn deny_unreachable(mut self) -> Self {
        self.unreachable_is_error = true;
        self
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new(Target::Tofino)
    }
}

/// Compiles parser graphs against one register registry.
pub struct ParserCompiler<'r> {
    registry: &'r PhvRegistry,
    options: CompileOptions,
    caps: TargetCaps,
}

impl<'r> ParserCompiler<'r> {
    pub fn new(registry: &'r PhvRegistry, options: CompileOptions) -> Self {
        Self {
            registry,
            options,
            caps: options.target.caps(),
        }
    }

    pub fn caps(&self) -> &TargetCaps {
        &self.caps
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile one parser instance.
    pub fn compile(&self, graph: &mut ParserGraph) -> Result<ParserProgram, CompileFailure> {
        log::info!(
            "compiling parser {} ({}) for {}",
            graph.name(),
            graph.direction(),
            self.options.target
        );
        let caps = self.caps;
        let mut session = CompileSession::new(graph.name(), caps);

        self.check_structure(graph, &mut session);
        if session.diagnostics().has_fatal() {
            return Err(self.failure(graph, session));
        }

        session.stats_mut().states = graph.state_count();
        session.stats_mut().matches = graph.match_count();

        let depths = DepthAnalyzer::new(graph, &caps, self.registry).analyze();
        session.stats_mut().max_depth_words = depths.max_words;

        let rows = RowCompiler::new(caps).compile(graph, &mut session);

        let mut plans = ExtractAllocator::new(caps, self.registry).allocate(graph, &mut session);
        let mut propagator = PaddingPropagator::new(graph, caps);
        if let Some(depth) = self.options.fifo_depth {
            propagator = propagator.with_fifo_depth(depth);
        }
        let mut cache = PaddingCache::new();
        propagator.run(&mut plans, &mut cache, &mut session);

        if self.failed(&session) {
            return Err(self.failure(graph, session));
        }

        let (warnings, stats) = session.finish();
        log::debug!("{}", stats);
        Ok(ParserProgram {
            name: graph.name().to_string(),
            direction: graph.direction(),
            target: self.options.target,
            rows,
            plans,
            depths,
            stats,
            warnings,
        })
    }

    /// Compile independent instances; in parallel with the `parallel` feature.
    #[cfg(feature = "parallel")]
    pub fn compile_all(&self, graphs: &mut [ParserGraph]) -> Vec<Result<ParserProgram, CompileFailure>> {
        use rayon::prelude::*;
        graphs.par_iter_mut().map(|g| self.compile(g)).collect()
    }

    /// Compile independent instances; in parallel with the `parallel` feature.
    #[cfg(not(feature = "parallel"))]
    pub fn compile_all(&self, graphs: &mut [ParserGraph]) -> Vec<Result<ParserProgram, CompileFailure>> {
        graphs.iter_mut().map(|g| self.compile(g)).collect()
    }

    fn check_structure(&self, graph: &mut ParserGraph, session: &mut CompileSession) {
        let name = graph.name().to_string();
        match graph.assign_codes(self.caps.state_code_bits) {
            Ok(()) => {
                graph.resolve_references(session.diagnostics_mut());
            }
            Err(e) => session.report(e, SourceLoc::default(), name.clone()),
        }
        graph.resolve_destinations(self.registry, session.diagnostics_mut());

        if graph.starts().len() > usize::from(self.caps.max_start_states) {
            session.report(
                CompileError::ResourceExhausted {
                    resource: "parser start states",
                    capacity: u32::from(self.caps.max_start_states),
                },
                SourceLoc::default(),
                name,
            );
        }

        graph.compute_predecessors();
        graph.mark_unreachable(session.diagnostics_mut());
    }

    fn failed(&self, session: &CompileSession) -> bool {
        session.has_errors()
            || (self.options.unreachable_is_error
                && session
                    .diagnostics()
                    .warnings()
                    .any(|w| matches!(w.error, CompileError::Unreachable { .. })))
    }

    fn failure(&self, graph: &ParserGraph, session: CompileSession) -> CompileFailure {
        let (diagnostics, _) = session.finish();
        CompileFailure {
            instance: graph.name().to_string(),
            diagnostics,
        }
    }
}
