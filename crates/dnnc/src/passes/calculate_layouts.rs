use crate::error::CompileError;
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Switches to the level-based processing order and computes every output layout.
#[derive(Default)]
pub struct CalculateLayoutsPass;

impl CalculateLayoutsPass {
    const NAME: &'static str = "calculate-layouts";
}

impl ProgramPass for CalculateLayoutsPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, _cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        program.calculate_bfs_processing_order()?;
        program.recalc_all_layouts()?;
        Ok(PassResult::default())
    }
}
