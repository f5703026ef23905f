//! Graph rewrites run by the compiler driver.

mod calculate_layouts;
mod compile_graph;
mod context;
mod post_optimize_weights;
mod pre_optimize_bias;
mod prepare_padding;
mod prepare_primitive_fusing;
mod propagate_constants;
mod remove_redundant_reorders;
mod reorder_inputs;
mod trim_to_outputs;

pub use calculate_layouts::CalculateLayoutsPass;
pub use compile_graph::CompileGraphPass;
pub use context::PassContext;
pub use post_optimize_weights::PostOptimizeWeightsPass;
pub use pre_optimize_bias::PreOptimizeBiasPass;
pub use prepare_padding::PreparePaddingPass;
pub use prepare_primitive_fusing::PreparePrimitiveFusingPass;
pub use propagate_constants::PropagateConstantsPass;
pub use remove_redundant_reorders::RemoveRedundantReordersPass;
pub use reorder_inputs::ReorderInputsPass;
pub use trim_to_outputs::TrimToOutputsPass;

pub(crate) use compile_graph::bind_implementation;

use crate::error::CompileError;
use crate::program::Program;

/// Statistics returned by a [`ProgramPass`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Iterations of an enclosing fixed point.
    pub iterations: usize,
    /// Rewrites applied: fusions, inserted reorders, folded constants.
    pub rewrites_applied: usize,
    /// Nodes erased from the program.
    pub removed_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            removed_nodes: self.removed_nodes + other.removed_nodes,
        }
    }

    fn from_counts(rewrites_applied: usize, removed_nodes: usize) -> PassResult {
        PassResult {
            changed: rewrites_applied > 0 || removed_nodes > 0,
            iterations: 0,
            rewrites_applied,
            removed_nodes,
        }
    }
}

/// One rewrite over the whole program.
pub trait ProgramPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError>;
}
