//! Built-in kernel implementations.

use std::sync::Arc;

use crate::dispatch::WorkGroups;
use crate::jit::JitConstants;
use crate::kernel::{
    ArgumentDescriptor, ClKernelData, KernelData, KernelError, KernelImpl, WeightsReorderRequest,
};
use crate::params::{KernelType, OptionalParams, WeightBiasParams};
use crate::tensor::{Datatype, WeightsLayout, WeightsType};

/// Unwraps one [`Params`](crate::params::Params) variant or fails the candidate.
macro_rules! expect_params {
    ($params:expr, $variant:ident) => {
        match $params {
            $crate::params::Params::$variant(p) => p,
            other => {
                return Err($crate::kernel::KernelError::invalid(format!(
                    "expected {} parameters, got {}",
                    stringify!($variant),
                    other.kind().as_str()
                )))
            }
        }
    };
}

pub(crate) use expect_params;

pub mod activation;
pub mod concatenation;
pub mod convolution;
pub mod eltwise;
pub mod fully_connected;
pub mod normalization;
pub mod pooling;
pub mod reorder;
pub mod softmax;

/// Every implementation shipped with the selector, grouped by kind.
pub fn builtin_implementations() -> Vec<Arc<dyn KernelImpl>> {
    vec![
        Arc::new(convolution::ConvolutionKernelRef),
        Arc::new(convolution::ConvolutionKernelBfyxOsIyxOsv16::new()),
        Arc::new(convolution::ConvolutionKernelBfyxGemmLike),
        Arc::new(convolution::ConvolutionKernelYxfbYxioB16),
        Arc::new(convolution::ConvolutionKernelBfyx3x3DwOpt::new()),
        Arc::new(fully_connected::FullyConnectedKernelRef),
        Arc::new(fully_connected::FullyConnectedKernelGemm),
        Arc::new(fully_connected::FullyConnectedFbIoBlock),
        Arc::new(fully_connected::FullyConnectedBsFBsv16B1),
        Arc::new(pooling::PoolingKernelRef),
        Arc::new(pooling::PoolingKernelAverageOpt),
        Arc::new(pooling::PoolingKernelBfyxBlockOpt),
        Arc::new(activation::ActivationKernelRef),
        Arc::new(activation::ActivationKernelOpt),
        Arc::new(eltwise::EltwiseKernelRef),
        Arc::new(reorder::ReorderKernelRef),
        Arc::new(reorder::ReorderKernelFastB1),
        Arc::new(reorder::ReorderWeightsKernel),
        Arc::new(softmax::SoftmaxKernelRef),
        Arc::new(softmax::SoftmaxKernelOpt1Dim),
        Arc::new(concatenation::ConcatenationKernelRef),
        Arc::new(normalization::BatchNormKernelRef),
        Arc::new(normalization::ScaleKernelRef),
        Arc::new(normalization::FusedConvBnScaleKernelRef),
    ]
}

pub(crate) fn entry_point(kernel_name: &str, layer_id: &str) -> String {
    let sanitized: String = layer_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{kernel_name}__{sanitized}")
}

pub(crate) fn standard_arguments(inputs: u32, weights: bool, bias: bool) -> Vec<ArgumentDescriptor> {
    let mut args: Vec<ArgumentDescriptor> = (0..inputs).map(ArgumentDescriptor::Input).collect();
    args.push(ArgumentDescriptor::Output);
    if weights {
        args.push(ArgumentDescriptor::Weights);
    }
    if bias {
        args.push(ArgumentDescriptor::Bias);
    }
    args
}

pub(crate) struct PlanParts<'a> {
    pub kernel_type: KernelType,
    pub kernel_name: &'a str,
    pub layer_id: &'a str,
    pub jit: JitConstants,
    pub work_groups: WorkGroups,
    pub arguments: Vec<ArgumentDescriptor>,
    pub estimated_time: f32,
}

pub(crate) fn build_kernel_data(parts: PlanParts<'_>) -> Result<KernelData, KernelError> {
    let PlanParts {
        kernel_type,
        kernel_name,
        layer_id,
        jit,
        work_groups,
        arguments,
        estimated_time,
    } = parts;

    for (global, local) in work_groups.global.iter().zip(work_groups.local.iter()) {
        if *global == 0 || *local == 0 || global % local != 0 {
            return Err(KernelError::invalid(format!(
                "{kernel_name}: work groups {:?} / {:?} do not partition evenly",
                work_groups.global, work_groups.local
            )));
        }
    }

    let kernel = ClKernelData {
        kernel_string: crate::kernel::KernelString::new(entry_point(kernel_name, layer_id), jit),
        work_groups,
        arguments,
        layer_id: layer_id.to_string(),
    };
    Ok(KernelData::new(kernel_type, kernel, estimated_time))
}

fn weights_layout_matches(current: WeightsLayout, wanted: &[WeightsLayout]) -> bool {
    wanted.contains(&current)
        || (wanted.contains(&WeightsLayout::Io) && current == WeightsLayout::Iyxo)
        || (wanted.contains(&WeightsLayout::Oi) && current == WeightsLayout::Oiyx)
}

/// Checks the weights against the layouts a kernel consumes, asking for a
/// weights reorder when the caller allows one.
pub(crate) fn update_weights_params(
    weight_bias: &WeightBiasParams,
    input_dtype: Datatype,
    options: &OptionalParams,
    layouts: &[WeightsLayout],
) -> Result<Option<WeightsReorderRequest>, KernelError> {
    let wanted_type = WeightsType::from_datatype(input_dtype)
        .ok_or_else(|| KernelError::not_applicable(format!("no weights type for {input_dtype:?}")))?;
    let weights = &weight_bias.weights;
    if weights.wtype == wanted_type && weights_layout_matches(weights.layout, layouts) {
        return Ok(None);
    }
    if !options.allow_weights_reorder {
        return Err(KernelError::not_applicable(format!(
            "weights {:?}/{:?} need a reorder to {:?}",
            weights.wtype, weights.layout, layouts
        )));
    }
    let target = layouts
        .first()
        .copied()
        .ok_or_else(|| KernelError::invalid("no target weights layout"))?;
    let mut output = weights.with_layout(target);
    output.wtype = wanted_type;
    Ok(Some(WeightsReorderRequest {
        input: weights.clone(),
        output,
    }))
}
