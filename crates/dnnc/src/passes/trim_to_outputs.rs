use std::collections::{HashSet, VecDeque};

use crate::error::CompileError;
use crate::primitives::{PrimitiveId, PrimitiveType};
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Removes every node that no output depends on. Input layouts always stay:
/// they are filled by the caller whether or not anything reads them. In
/// debug builds every node is kept.
#[derive(Default)]
pub struct TrimToOutputsPass;

impl TrimToOutputsPass {
    const NAME: &'static str = "trim-to-outputs";
}

impl ProgramPass for TrimToOutputsPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        if cx.debug() {
            return Ok(PassResult::default());
        }
        let mut reachable: HashSet<PrimitiveId> = HashSet::with_capacity(program.len());
        let mut queue: VecDeque<PrimitiveId> = program.outputs().iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            queue.extend(program.node(&id)?.dependencies().iter().cloned());
        }

        let doomed: Vec<PrimitiveId> = program
            .processing_order()
            .iter()
            .filter(|id| !reachable.contains(*id))
            .filter(|id| {
                program
                    .get(id)
                    .is_some_and(|node| !node.is_type(PrimitiveType::InputLayout))
            })
            .map(str::to_string)
            .collect();

        for id in &doomed {
            program.remove_node(id)?;
        }
        if !doomed.is_empty() {
            tracing::debug!(removed = doomed.len(), "trimmed nodes no output depends on");
        }
        Ok(PassResult::from_counts(0, doomed.len()))
    }
}
