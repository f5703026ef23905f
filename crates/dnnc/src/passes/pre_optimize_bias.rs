use crate::error::CompileError;
use crate::layout_optimizer::DataKind;
use crate::program::Program;

use super::reorder_inputs::{bias_slots, reorder_dependency};
use super::{PassContext, PassResult, ProgramPass};

/// Reorders the bias of convolutions and fully connected layers into
/// `bfyx` of the consumer's element type.
#[derive(Default)]
pub struct PreOptimizeBiasPass;

impl PreOptimizeBiasPass {
    const NAME: &'static str = "pre-optimize-bias";
}

impl ProgramPass for PreOptimizeBiasPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let mut inserted = 0usize;
        for id in program.processing_order().ids() {
            let node = program.node(&id)?;
            let slots = bias_slots(node.kind());
            if slots.is_empty() {
                continue;
            }
            let consumer_type = node.primitive_type();
            let output = program.get_output_layout(&id)?;
            for idx in slots {
                if reorder_dependency(program, cx, &id, idx, DataKind::Bias, consumer_type, &output)? {
                    inserted += 1;
                }
            }
        }
        Ok(PassResult::from_counts(inserted, 0))
    }
}
