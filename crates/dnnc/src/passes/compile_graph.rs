use std::sync::Arc;

use dnnc_kernel_selector::KernelSelector;

use crate::error::CompileError;
use crate::primitives::PrimitiveType;
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Binds a dispatch plan to every node that runs a kernel.
#[derive(Default)]
pub struct CompileGraphPass;

impl CompileGraphPass {
    const NAME: &'static str = "compile-graph";
}

impl ProgramPass for CompileGraphPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let mut bound = 0usize;
        for id in program.processing_order().ids() {
            let node = program.node(&id)?;
            if node.is_type(PrimitiveType::Data) || node.is_type(PrimitiveType::InputLayout) {
                continue;
            }
            if bind_implementation(program, cx.selector(), &id)? {
                bound += 1;
            }
        }
        Ok(PassResult::from_counts(bound, 0))
    }
}

/// Validates `id` against its current input layouts and selects its kernel.
/// Returns false for kinds that run none.
pub(crate) fn bind_implementation(
    program: &mut Program,
    selector: &KernelSelector,
    id: &str,
) -> Result<bool, CompileError> {
    let output = program.get_output_layout(id)?;
    let inputs = program.input_layouts(id)?;
    let registry = Arc::clone(program.registry());
    let node = program.node(id)?;
    let ops = registry.get(node.primitive_type())?;
    ops.validate(node, &inputs)?;
    let selected = ops.choose_impl(selector, node, &inputs, &output)?;
    if let Some(kernel) = &selected {
        tracing::debug!(node = id, kernel = %kernel.kernel_name, "kernel bound");
    }
    let bound = selected.is_some();
    program.node_mut(id)?.selected_impl = selected;
    Ok(bound)
}
