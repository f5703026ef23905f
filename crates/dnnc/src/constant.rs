//! Host evaluation of constant subgraphs.

use crate::layout::Layout;
use crate::primitives::HostData;
use crate::program::ProgramNode;

/// A materialized buffer: its values laid out as `layout` describes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantValue {
    pub layout: Layout,
    pub values: HostData,
}

/// Computes the value of a node whose dependencies are all known.
///
/// Constant propagation only folds nodes the evaluator claims through
/// [`can_evaluate`](Self::can_evaluate); everything else stays in the graph
/// and is bound to a kernel like any other node.
pub trait ConstantEvaluator: Send + Sync {
    fn name(&self) -> &str;

    fn can_evaluate(&self, node: &ProgramNode, inputs: &[Layout], output: &Layout) -> bool;

    /// Values of `node`, including any activation it absorbed, laid out as
    /// `output`. `inputs` are its dependency values in argument order.
    fn evaluate(
        &self,
        node: &ProgramNode,
        inputs: &[ConstantValue],
        output: &Layout,
    ) -> anyhow::Result<HostData>;
}
