use std::collections::HashMap;

use anyhow::anyhow;

use crate::constant::{ConstantEvaluator, ConstantValue};
use crate::error::CompileError;
use crate::layout::Layout;
use crate::primitives::{PrimitiveDesc, PrimitiveId, PrimitiveKind};
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Folds constant subgraphs into literals.
///
/// Every constant node that a non-constant node reads, or that is an
/// output, is evaluated on the host and replaced by a literal under the same
/// id. Constant nodes left without readers are then erased. Nodes the
/// evaluator cannot handle stay as they are.
#[derive(Default)]
pub struct PropagateConstantsPass;

impl PropagateConstantsPass {
    const NAME: &'static str = "propagate-constants";
}

impl ProgramPass for PropagateConstantsPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let Some(evaluator) = cx.evaluator() else {
            tracing::debug!("no constant evaluator configured, skipping constant propagation");
            return Ok(PassResult::default());
        };
        program.mark_constants()?;
        let before = program.len();

        let targets: Vec<PrimitiveId> = program
            .processing_order()
            .iter()
            .filter_map(|id| program.get(id))
            .filter(|node| node.is_constant() && !node.is_literal())
            .filter(|node| {
                node.is_output()
                    || node
                        .users()
                        .iter()
                        .any(|user| program.get(user).is_some_and(|u| !u.is_constant()))
            })
            .map(|node| node.id().to_string())
            .collect();

        let mut memo: HashMap<PrimitiveId, ConstantValue> = HashMap::new();
        let mut folded = 0usize;
        for target in targets {
            let Some(value) = evaluate(program, evaluator, &target, &mut memo)? else {
                tracing::trace!(node = %target, evaluator = evaluator.name(), "constant left unfolded");
                continue;
            };
            let desc = PrimitiveDesc::data(target.clone(), value.layout, value.values);
            program.replace(&target, desc, false)?;
            folded += 1;
        }

        let mut erased = 0usize;
        for id in program.processing_order().ids().into_iter().rev() {
            let Some(node) = program.get(&id) else {
                continue;
            };
            if node.is_constant() && node.users().is_empty() && !node.is_output() {
                program.remove_node(&id)?;
                erased += 1;
            }
        }
        debug_assert_eq!(before - erased, program.len());

        Ok(PassResult::from_counts(folded, erased))
    }
}

/// Value of constant node `id`, or `None` when it or something it reads
/// cannot be evaluated.
fn evaluate(
    program: &mut Program,
    evaluator: &dyn ConstantEvaluator,
    id: &str,
    memo: &mut HashMap<PrimitiveId, ConstantValue>,
) -> Result<Option<ConstantValue>, CompileError> {
    if let Some(value) = memo.get(id) {
        return Ok(Some(value.clone()));
    }
    let node = program.node(id)?;
    if let PrimitiveKind::Data { layout, values } = node.kind() {
        let value = ConstantValue {
            layout: *layout,
            values: values.clone(),
        };
        memo.insert(id.to_string(), value.clone());
        return Ok(Some(value));
    }

    let deps: Vec<PrimitiveId> = node.dependencies().to_vec();
    let mut inputs = Vec::with_capacity(deps.len());
    for dep in &deps {
        match evaluate(program, evaluator, dep, memo)? {
            Some(value) => inputs.push(value),
            None => return Ok(None),
        }
    }

    let output = program.get_output_layout(id)?;
    let input_layouts: Vec<Layout> = inputs.iter().map(|value| value.layout).collect();
    let node = program.node(id)?;
    if !evaluator.can_evaluate(node, &input_layouts, &output) {
        return Ok(None);
    }
    let values = evaluator
        .evaluate(node, &inputs, &output)
        .map_err(|source| CompileError::ConstantEvaluation {
            id: id.to_string(),
            source,
        })?;
    if values.len() != output.buffer_size() || values.data_type() != output.data_type {
        return Err(CompileError::ConstantEvaluation {
            id: id.to_string(),
            source: anyhow!(
                "evaluator produced {} {:?} values for a {:?} buffer of {}",
                values.len(),
                values.data_type(),
                output.data_type,
                output.buffer_size()
            ),
        });
    }

    let value = ConstantValue { layout: output, values };
    memo.insert(id.to_string(), value.clone());
    Ok(Some(value))
}
