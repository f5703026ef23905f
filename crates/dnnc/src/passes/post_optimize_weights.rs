use crate::error::CompileError;
use crate::kernel_params::{data_type_of_weights, format_of_weights};
use crate::layout::Layout;
use crate::program::Program;

use super::reorder_inputs::{insert_reorder, weights_slots};
use super::{bind_implementation, PassContext, PassResult, ProgramPass};

/// Satisfies the weights reorders requested by bound kernels.
///
/// Each request becomes a reorder in front of every weights slot of the
/// node; the reorder is bound immediately since graph compilation already ran.
#[derive(Default)]
pub struct PostOptimizeWeightsPass;

impl PostOptimizeWeightsPass {
    const NAME: &'static str = "post-optimize-weights";
}

impl ProgramPass for PostOptimizeWeightsPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let mut inserted = 0usize;
        for id in program.processing_order().ids() {
            let node = program.node(&id)?;
            let slots = weights_slots(node.kind());
            if slots.is_empty() {
                continue;
            }
            let Some(request) = node.selected_impl().and_then(|kd| kd.weights_reorder.clone()) else {
                continue;
            };
            let data_type = data_type_of_weights(request.output.wtype);
            let format = format_of_weights(request.output.layout);

            for idx in slots {
                let Some(source) = program.node(&id)?.dependency(idx).map(str::to_string) else {
                    continue;
                };
                let current = program.get_output_layout(&source)?;
                let target = Layout::new(data_type, format, current.size);
                let decision = cx
                    .layout_optimizer_mut()
                    .create_reorder_if_needed(&source, &current, &target);
                let Some(reorder_id) = insert_reorder(program, cx, decision, &id, idx)? else {
                    continue;
                };
                if program.node(&reorder_id)?.selected_impl().is_none() {
                    bind_implementation(program, cx.selector(), &reorder_id)?;
                }
                tracing::trace!(node = %id, reorder = %reorder_id, ?format, "weights reordered for kernel");
                inserted += 1;
            }

            if let Some(kernel) = program.node_mut(&id)?.selected_impl.as_mut() {
                kernel.weights_reorder = None;
            }
        }
        Ok(PassResult::from_counts(inserted, 0))
    }
}
