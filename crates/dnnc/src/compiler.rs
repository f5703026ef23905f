//! Compiler driver: builds the program graph from a topology, runs the pass
//! pipeline and hands out the bound graph.

use std::sync::Arc;
use std::time::Instant;

use dnnc_kernel_selector::{EngineInfo, KernelData, KernelSelector, TuningConfig, TuningMode};
use serde_json::{json, Value};

use crate::constant::ConstantEvaluator;
use crate::error::CompileError;
use crate::passes::{PassContext, PassResult};
use crate::pipeline::PassPipeline;
use crate::primitives::{PrimitiveId, PrimitiveType};
use crate::program::{PrimitiveTypeRegistry, Program, ProgramNode};
use crate::topology::Topology;

/// Options of one compilation.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Runs fusion and the layout optimizer. Off means a near-identity compile.
    pub optimize_data: bool,
    /// Explicit output pins. Empty means every node nothing reads.
    pub outputs: Vec<PrimitiveId>,
    /// Keeps every node observable: nothing is trimmed and all non-literal
    /// nodes end up as outputs.
    pub debug: bool,
    pub tuning: TuningConfig,
    pub engine: EngineInfo,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimize_data(mut self, optimize_data: bool) -> Self {
        self.optimize_data = optimize_data;
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PrimitiveId>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_engine(mut self, engine: EngineInfo) -> Self {
        self.engine = engine;
        self
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        let tuning = &self.tuning;
        if tuning.is_enabled() && tuning.cache_path.is_none() {
            return Err(CompileError::InvalidOptions(format!(
                "tuning mode {:?} needs a cache file path",
                tuning.mode
            )));
        }
        if tuning.mode == TuningMode::TuneAndCache && tuning.runner.is_none() {
            return Err(CompileError::InvalidOptions(
                "tune-and-cache needs a kernel runner".to_string(),
            ));
        }
        if let Some(dup) = self
            .outputs
            .iter()
            .enumerate()
            .find_map(|(idx, id)| self.outputs[..idx].contains(id).then_some(id))
        {
            return Err(CompileError::InvalidOptions(format!("output '{dup}' is listed twice")));
        }
        if self.engine.compute_units == 0 || self.engine.max_work_group_size == 0 {
            return Err(CompileError::InvalidOptions(
                "engine reports no compute resources".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compiles topologies with one fixed set of options.
pub struct Compiler {
    options: BuildOptions,
    registry: Arc<PrimitiveTypeRegistry>,
    selector: KernelSelector,
    pipeline: PassPipeline,
}

impl Compiler {
    pub fn new(options: BuildOptions) -> Result<Self, CompileError> {
        options.validate()?;
        let selector = KernelSelector::new(options.engine).with_tuning(options.tuning.clone());
        Ok(Self {
            pipeline: PassPipeline::standard(options.optimize_data),
            registry: Arc::new(PrimitiveTypeRegistry::builtin()),
            selector,
            options,
        })
    }

    /// Replaces the kernel selector, e.g. to register extra implementations
    /// or share an offline tuning table.
    pub fn with_selector(mut self, selector: KernelSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replaces the primitive kind registry.
    pub fn with_registry(mut self, registry: Arc<PrimitiveTypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn selector(&self) -> &KernelSelector {
        &self.selector
    }

    pub fn pipeline(&self) -> &PassPipeline {
        &self.pipeline
    }

    /// Compiles without constant folding.
    pub fn compile(&self, topology: &Topology) -> Result<CompiledProgram, CompileError> {
        self.run(topology, None)
    }

    /// Compiles, folding constant subgraphs with `evaluator`.
    pub fn compile_with_evaluator(
        &self,
        topology: &Topology,
        evaluator: &dyn ConstantEvaluator,
    ) -> Result<CompiledProgram, CompileError> {
        self.run(topology, Some(evaluator))
    }

    fn run(
        &self,
        topology: &Topology,
        evaluator: Option<&dyn ConstantEvaluator>,
    ) -> Result<CompiledProgram, CompileError> {
        let started = Instant::now();
        let mut program = Program::from_topology(topology, Arc::clone(&self.registry))?;
        program.set_outputs(&self.options.outputs)?;
        program.mark_constants()?;
        program.mark_data_flow()?;

        let mut cx = PassContext::new(&self.selector).with_debug(self.options.debug);
        if let Some(evaluator) = evaluator {
            cx = cx.with_evaluator(evaluator);
        }
        let stats = self.pipeline.run(&mut program, &mut cx)?;

        program.update_processing_numbers();
        if self.options.debug {
            for id in program.processing_order().ids() {
                if !program.node(&id)?.is_literal() {
                    program.mark_output(&id)?;
                }
            }
        }
        ensure_bound(&program)?;
        if !program.is_order_valid() {
            return Err(CompileError::invalid_graph("processing order is not topological"));
        }

        tracing::info!(
            primitives = topology.len(),
            nodes = program.len(),
            rewrites = stats.rewrites_applied,
            removed = stats.removed_nodes,
            reorders_cached = cx.layout_optimizer().cached_reorders(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "program compiled"
        );
        Ok(CompiledProgram { program, stats })
    }
}

/// Every node that executes must leave compilation with a plan.
fn ensure_bound(program: &Program) -> Result<(), CompileError> {
    let unbound = program.processing_order().iter().find(|id| {
        program.get(id).is_some_and(|node| {
            !node.is_type(PrimitiveType::Data)
                && !node.is_type(PrimitiveType::InputLayout)
                && node.selected_impl().is_none()
        })
    });
    match unbound {
        Some(id) => Err(CompileError::invalid_graph(format!("'{id}' left compilation without a kernel"))),
        None => Ok(()),
    }
}

/// Result of a compilation: the optimized graph, each executing node bound
/// to one dispatch plan, and the order to dispatch them in.
#[derive(Debug)]
pub struct CompiledProgram {
    program: Program,
    stats: PassResult,
}

impl CompiledProgram {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn stats(&self) -> PassResult {
        self.stats
    }

    pub fn node(&self, id: &str) -> Option<&ProgramNode> {
        self.program.get(id)
    }

    pub fn processing_order(&self) -> Vec<PrimitiveId> {
        self.program.processing_order().ids()
    }

    pub fn outputs(&self) -> &[PrimitiveId] {
        self.program.outputs()
    }

    pub fn optimized_out(&self) -> &[PrimitiveId] {
        self.program.optimized_out()
    }

    pub fn kernel(&self, id: &str) -> Option<&KernelData> {
        self.program.get(id).and_then(ProgramNode::selected_impl)
    }

    /// Bound plans in dispatch order.
    pub fn kernels(&self) -> impl Iterator<Item = (&str, &KernelData)> {
        self.program.processing_order().iter().filter_map(|id| {
            let node = self.program.get(id)?;
            node.selected_impl().map(|kernel| (node.id(), kernel))
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "graph": self.program.to_json(),
            "stats": {
                "changed": self.stats.changed,
                "iterations": self.stats.iterations,
                "rewrites_applied": self.stats.rewrites_applied,
                "removed_nodes": self.stats.removed_nodes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_without_cache_path_is_rejected() {
        let mut options = BuildOptions::new();
        options.tuning.mode = TuningMode::UseCache;
        assert!(matches!(options.validate(), Err(CompileError::InvalidOptions(_))));
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let options = BuildOptions::new().with_outputs(["a", "b", "a"]);
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn default_options_are_valid() {
        BuildOptions::new().validate().unwrap();
        BuildOptions::new()
            .with_tuning(TuningConfig::use_cache("cache.txt"))
            .validate()
            .unwrap();
    }
}
