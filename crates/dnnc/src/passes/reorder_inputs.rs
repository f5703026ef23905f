use std::ops::Range;

use crate::error::CompileError;
use crate::layout::Layout;
use crate::layout_optimizer::{DataKind, ReorderDecision};
use crate::primitives::{PrimitiveId, PrimitiveKind, PrimitiveType};
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Dependency slots holding the weights of a weighted primitive.
pub(super) fn weights_slots(kind: &PrimitiveKind) -> Range<usize> {
    match kind {
        PrimitiveKind::Convolution(conv) => 1..1 + conv.split(),
        PrimitiveKind::FusedConvBnScale(fused) => 1..1 + fused.conv.split(),
        PrimitiveKind::FullyConnected(_) => 1..2,
        _ => 0..0,
    }
}

/// Dependency slots holding the bias of a weighted primitive.
pub(super) fn bias_slots(kind: &PrimitiveKind) -> Range<usize> {
    match kind {
        PrimitiveKind::Convolution(conv) => {
            let start = 1 + conv.split();
            start..start + conv.bias.len()
        }
        PrimitiveKind::FusedConvBnScale(fused) => {
            let start = 1 + fused.conv.split();
            start..start + fused.conv.bias.len()
        }
        PrimitiveKind::FullyConnected(fc) => 2..2 + usize::from(fc.bias.is_some()),
        _ => 0..0,
    }
}

/// Puts the data and weights of convolutions and fully connected layers into
/// the layouts their fast kernels read, inserting shared reorders.
#[derive(Default)]
pub struct ReorderInputsPass;

impl ReorderInputsPass {
    const NAME: &'static str = "reorder-inputs";
}

impl ProgramPass for ReorderInputsPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let splitted = program.nodes().any(|node| match node.kind() {
            PrimitiveKind::Convolution(conv) => conv.split() > 1,
            PrimitiveKind::FusedConvBnScale(fused) => fused.conv.split() > 1,
            _ => false,
        });
        cx.layout_optimizer_mut().set_splitted_convolution(splitted);

        let mut inserted = 0usize;
        for id in program.processing_order().ids() {
            let node = program.node(&id)?;
            let consumer_type = node.primitive_type();
            let mut slots: Vec<(usize, DataKind)> = weights_slots(node.kind())
                .map(|idx| (idx, DataKind::Weights))
                .collect();
            match consumer_type {
                PrimitiveType::Convolution | PrimitiveType::FusedConvBnScale => {
                    slots.insert(0, (0, DataKind::Input));
                }
                PrimitiveType::FullyConnected => {}
                _ => continue,
            }

            let output = program.get_output_layout(&id)?;
            for (idx, kind) in slots {
                if reorder_dependency(program, cx, &id, idx, kind, consumer_type, &output)? {
                    inserted += 1;
                }
            }
        }

        if inserted > 0 {
            tracing::debug!(
                inserted,
                splitted,
                cached = cx.layout_optimizer().cached_reorders(),
                "input reorders placed"
            );
        }
        Ok(PassResult::from_counts(inserted, 0))
    }
}

/// Routes dependency `idx` of `id` through a reorder to the layout the
/// optimizer prefers. Returns whether the edge changed.
pub(super) fn reorder_dependency(
    program: &mut Program,
    cx: &mut PassContext<'_>,
    id: &str,
    idx: usize,
    kind: DataKind,
    consumer_type: PrimitiveType,
    output: &Layout,
) -> Result<bool, CompileError> {
    let Some(source) = program.node(id)?.dependency(idx).map(str::to_string) else {
        return Ok(false);
    };
    let current = program.get_output_layout(&source)?;
    let decision = cx
        .layout_optimizer_mut()
        .get_reorder(&source, &current, kind, consumer_type, Some(output))?;
    let Some(reorder_id) = insert_reorder(program, cx, decision, id, idx)? else {
        return Ok(false);
    };
    tracing::trace!(node = id, slot = idx, reorder = %reorder_id, ?kind, "dependency reordered");
    Ok(true)
}

/// Places the reorder of `decision` in front of dependency `idx` of `next`.
///
/// A new reorder whose id is already used in the program is renamed to a
/// free one, in the program and in the optimizer's cache.
pub(super) fn insert_reorder(
    program: &mut Program,
    cx: &mut PassContext<'_>,
    decision: ReorderDecision,
    next: &str,
    idx: usize,
) -> Result<Option<PrimitiveId>, CompileError> {
    let desc = match decision {
        ReorderDecision::NotNeeded => return Ok(None),
        ReorderDecision::Cached(desc) => desc,
        ReorderDecision::New(mut desc) => {
            let free = program.unused_id(&desc.id);
            if free != desc.id {
                cx.layout_optimizer_mut().rename_reorder(&desc.id, &free);
                desc.id = free;
            }
            desc
        }
    };
    let reorder_id = desc.id.clone();
    program.add_intermediate(desc, next, idx)?;
    Ok(Some(reorder_id))
}
