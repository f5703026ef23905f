use crate::error::CompileError;
use crate::layout::DataType;
use crate::primitives::{FusedConvBnScaleDesc, PrimitiveDesc, PrimitiveKind, PrimitiveType};
use crate::program::Program;

use super::remove_redundant_reorders::fuse_reorder_chain;
use super::{PassContext, PassResult, ProgramPass};

/// Producers whose kernels apply a fused activation to their result.
const ACTIVATION_HOSTS: [PrimitiveType; 7] = [
    PrimitiveType::Convolution,
    PrimitiveType::FullyConnected,
    PrimitiveType::Eltwise,
    PrimitiveType::Pooling,
    PrimitiveType::BatchNorm,
    PrimitiveType::Scale,
    PrimitiveType::FusedConvBnScale,
];

/// Merges small fixed patterns into single nodes:
/// convolution → batch norm → scale, producer → activation, and
/// reorder → reorder.
#[derive(Default)]
pub struct PreparePrimitiveFusingPass;

impl PreparePrimitiveFusingPass {
    const NAME: &'static str = "prepare-primitive-fusing";
}

impl ProgramPass for PreparePrimitiveFusingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let before = program.len();
        let mut rewrites = 0usize;

        for id in program.processing_order().ids() {
            if program.contains(&id) && fuse_conv_bn_scale(program, &id)? {
                rewrites += 1;
            }
        }
        for id in program.processing_order().ids() {
            if program.contains(&id) && fuse_activation(program, &id, cx.debug())? {
                rewrites += 1;
            }
        }
        for id in program.processing_order().ids() {
            if program.contains(&id) && fuse_reorder_chain(program, None, &id)? {
                rewrites += 1;
            }
        }

        Ok(PassResult::from_counts(rewrites, before - program.len()))
    }
}

/// Replaces `conv → batch_norm → scale` by one fused node that keeps the
/// scale's id and position.
fn fuse_conv_bn_scale(program: &mut Program, conv_id: &str) -> Result<bool, CompileError> {
    let node = program.node(conv_id)?;
    let PrimitiveKind::Convolution(conv) = node.kind() else {
        return Ok(false);
    };
    if node.is_output() || !node.activation().is_none() {
        return Ok(false);
    }
    let [bn_id] = node.users() else {
        return Ok(false);
    };
    let bn_node = program.node(bn_id)?;
    let PrimitiveKind::BatchNorm(bn) = bn_node.kind() else {
        return Ok(false);
    };
    if bn_node.is_output() || bn.input != conv_id {
        return Ok(false);
    }
    let [scale_id] = bn_node.users() else {
        return Ok(false);
    };
    let scale_node = program.node(scale_id)?;
    let PrimitiveKind::Scale(scale) = scale_node.kind() else {
        return Ok(false);
    };
    if scale.input != *bn_id || scale_node.has_fused_activation() {
        return Ok(false);
    }

    let (bn_id, scale_id) = (bn_id.clone(), scale_id.clone());
    let desc = PrimitiveDesc::new(
        scale_id.clone(),
        PrimitiveKind::FusedConvBnScale(FusedConvBnScaleDesc {
            conv: conv.clone(),
            mean: bn.mean.clone(),
            variance: bn.variance.clone(),
            epsilon: bn.epsilon,
            scale: scale.scale.clone(),
            scale_bias: scale.bias.clone(),
        }),
    )
    .with_output_padding(scale_node.output_padding());

    // The fused kernel is single precision and reads every statistic per feature.
    let output = program.get_output_layout(conv_id)?;
    if output.data_type != DataType::F32 {
        return Ok(false);
    }
    let PrimitiveKind::FusedConvBnScale(fused) = &desc.kind else {
        return Ok(false);
    };
    let per_feature = [&fused.mean, &fused.variance, &fused.scale]
        .into_iter()
        .chain(&fused.scale_bias);
    for id in per_feature {
        if program.get_output_layout(id)?.count() != output.size.feature {
            return Ok(false);
        }
    }

    program.replace(&scale_id, desc, false)?;
    program.remove_node(&bn_id)?;
    program.remove_node(conv_id)?;
    program.relocate_users_after(&scale_id)?;
    tracing::trace!(node = %scale_id, "convolution, batch norm and scale fused");
    Ok(true)
}

/// Moves a single-input activation into its producer.
fn fuse_activation(program: &mut Program, id: &str, debug: bool) -> Result<bool, CompileError> {
    let node = program.node(id)?;
    let PrimitiveKind::Activation(activation) = node.kind() else {
        return Ok(false);
    };
    let [input] = node.dependencies() else {
        return Ok(false);
    };
    if node.is_output() {
        return Ok(false);
    }
    let (input, function, padding) = (input.clone(), activation.activation, node.output_padding());

    if !program.get_output_layout(&input)?.padding.is_none() {
        return Ok(false);
    }
    let input_node = program.node(&input)?;
    if (input_node.is_output() && !debug)
        || input_node.users().len() != 1
        || !input_node.activation().is_none()
        || !ACTIVATION_HOSTS.contains(&input_node.primitive_type())
    {
        return Ok(false);
    }

    if !program.extract_and_remove(id)? {
        return Ok(false);
    }
    program.node_mut(&input)?.fused_activation = function;
    program.set_output_padding(&input, padding)?;
    program.invalidate_layout(&input);
    program.relocate_users_after(&input)?;
    tracing::trace!(node = %input, activation = id, "activation fused into producer");
    Ok(true)
}
