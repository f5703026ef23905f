use dnnc_kernel_selector::KernelSelector;

use crate::error::CompileError;
use crate::primitives::{PrimitiveKind, PrimitiveType};
use crate::program::Program;

use super::{bind_implementation, PassContext, PassResult, ProgramPass};

/// Collapses reorder chains and drops reorders that leave the layout unchanged.
#[derive(Default)]
pub struct RemoveRedundantReordersPass;

impl RemoveRedundantReordersPass {
    const NAME: &'static str = "remove-redundant-reorders";
}

impl ProgramPass for RemoveRedundantReordersPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let before = program.len();
        let mut rewrites = 0usize;
        for id in program.processing_order().ids() {
            if !program.contains(&id) {
                continue;
            }
            if fuse_reorder_chain(program, Some(cx.selector()), &id)? {
                rewrites += 1;
                continue;
            }
            if remove_identity_reorder(program, &id)? {
                rewrites += 1;
            }
        }
        Ok(PassResult::from_counts(rewrites, before - program.len()))
    }
}

/// Merges reorder `id` into its input when that input is a reorder read by
/// nothing else. The input takes over the target format, type and padding.
///
/// Plans already bound to the survivor are reselected when `selector` is
/// given; without one the survivor is left unbound.
pub(super) fn fuse_reorder_chain(
    program: &mut Program,
    selector: Option<&KernelSelector>,
    id: &str,
) -> Result<bool, CompileError> {
    let node = program.node(id)?;
    let PrimitiveKind::Reorder(reorder) = node.kind() else {
        return Ok(false);
    };
    if !reorder.subtract_per_feature.is_empty() {
        return Ok(false);
    }
    let [input] = node.dependencies() else {
        return Ok(false);
    };
    let input = input.clone();
    let input_node = program.node(&input)?;
    if !input_node.is_type(PrimitiveType::Reorder)
        || input_node.users().len() != 1
        || input_node.is_output()
    {
        return Ok(false);
    }

    let (format, data_type) = (reorder.output_format, reorder.output_data_type);
    let padding = node.output_padding();
    let was_output = node.is_output();
    let was_bound = node.selected_impl().is_some() || input_node.selected_impl().is_some();

    if !program.extract_and_remove(id)? {
        return Ok(false);
    }
    let survivor = if was_output { id.to_string() } else { input };
    {
        let survivor_node = program.node_mut(&survivor)?;
        if let PrimitiveKind::Reorder(merged) = &mut survivor_node.desc.kind {
            merged.output_format = format;
            merged.output_data_type = data_type;
        }
        survivor_node.selected_impl = None;
    }
    program.set_output_padding(&survivor, padding)?;
    program.invalidate_layout(&survivor);
    if let (true, Some(selector)) = (was_bound, selector) {
        bind_implementation(program, selector, &survivor)?;
    }
    tracing::trace!(node = %survivor, "reorder chain merged");
    Ok(true)
}

/// Removes reorder `id` when its output layout equals its input's and it
/// subtracts nothing.
fn remove_identity_reorder(program: &mut Program, id: &str) -> Result<bool, CompileError> {
    let node = program.node(id)?;
    let PrimitiveKind::Reorder(reorder) = node.kind() else {
        return Ok(false);
    };
    if !reorder.subtract_per_feature.is_empty() {
        return Ok(false);
    }
    let [input] = node.dependencies() else {
        return Ok(false);
    };
    let input = input.clone();
    // An input layout keeps its id; the caller binds buffers by it.
    if node.is_output() && program.node(&input)?.is_type(PrimitiveType::InputLayout) {
        return Ok(false);
    }
    if program.get_output_layout(id)? != program.get_output_layout(&input)? {
        return Ok(false);
    }
    let removed = program.extract_and_remove(id)?;
    if removed {
        tracing::trace!(node = id, "identity reorder removed");
    }
    Ok(removed)
}
