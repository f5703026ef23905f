//! Convolution kernels and the checks they share.

mod bfyx_3x3_dw_opt;
mod bfyx_gemm_like;
mod bfyx_os_iyx_osv16;
mod reference;
mod yxfb_yxio_b16;

pub use bfyx_3x3_dw_opt::ConvolutionKernelBfyx3x3DwOpt;
pub use bfyx_gemm_like::ConvolutionKernelBfyxGemmLike;
pub use bfyx_os_iyx_osv16::ConvolutionKernelBfyxOsIyxOsv16;
pub use reference::ConvolutionKernelRef;
pub use yxfb_yxio_b16::ConvolutionKernelYxfbYxioB16;

use crate::dispatch::WorkGroups;
use crate::jit::{make_base_jit, make_weight_bias_jit, JitConstants};
use crate::kernel::{ArgumentDescriptor, KernelError};
use crate::params::ConvolutionParams;
use crate::tensor::Pad;

use super::standard_arguments;

pub(crate) fn validate_convolution(p: &ConvolutionParams) -> Result<(), KernelError> {
    if p.base.inputs.len() != 1 {
        return Err(KernelError::invalid(format!(
            "convolution expects one input, got {}",
            p.base.inputs.len()
        )));
    }
    if p.split == 0 {
        return Err(KernelError::invalid("split must be positive"));
    }
    for (what, size) in [
        ("stride", p.stride),
        ("dilation", p.dilation),
        ("filter size", p.filter_size),
    ] {
        if size.x == 0 || size.y == 0 {
            return Err(KernelError::invalid(format!("{what} must be positive")));
        }
    }
    let input = &p.base.inputs[0];
    let weights = &p.weight_bias.weights;
    if input.feature().v != weights.ifm * p.split {
        return Err(KernelError::invalid(format!(
            "input features {} do not match weights ifm {} x split {}",
            input.feature().v,
            weights.ifm,
            p.split
        )));
    }
    if p.base.output.feature().v != weights.ofm * p.split {
        return Err(KernelError::invalid(format!(
            "output features {} do not match weights ofm {} x split {}",
            p.base.output.feature().v,
            weights.ofm,
            p.split
        )));
    }
    Ok(())
}

/// Input padding a kernel without boundary checks needs on x and y.
pub(crate) fn required_input_padding(p: &ConvolutionParams) -> (Pad, Pad) {
    let input = &p.base.inputs[0];
    let output = &p.base.output;
    let limit = |out: usize, stride: usize, filter: usize, dilation: usize| {
        (out.saturating_sub(1)) * stride + (filter - 1) * dilation + 1
    };
    let limit_x = limit(output.x().v, p.stride.x, p.filter_size.x, p.dilation.x);
    let limit_y = limit(output.y().v, p.stride.y, p.filter_size.y, p.dilation.y);
    let pad_x = Pad {
        before: p.padding.x,
        after: limit_x.saturating_sub(input.x().v + p.padding.x),
    };
    let pad_y = Pad {
        before: p.padding.y,
        after: limit_y.saturating_sub(input.y().v + p.padding.y),
    };
    (pad_x, pad_y)
}

pub(crate) fn check_padded_input(p: &ConvolutionParams) -> Result<(), KernelError> {
    let input = &p.base.inputs[0];
    let (req_x, req_y) = required_input_padding(p);
    let (have_x, have_y) = (input.x().pad, input.y().pad);
    let ok = req_x.before <= have_x.before
        && req_x.after <= have_x.after
        && req_y.before <= have_y.before
        && req_y.after <= have_y.after;
    if ok {
        Ok(())
    } else {
        Err(KernelError::not_applicable(format!(
            "input padding x={have_x:?} y={have_y:?} is smaller than required x={req_x:?} y={req_y:?}"
        )))
    }
}

pub(crate) fn convolution_jit(p: &ConvolutionParams) -> JitConstants {
    let mut jit = make_base_jit(&p.base);
    jit.merge(make_weight_bias_jit(&p.weight_bias));
    jit.add("STRIDE_SIZE_X", p.stride.x);
    jit.add("STRIDE_SIZE_Y", p.stride.y);
    jit.add("DILATION_SIZE_X", p.dilation.x);
    jit.add("DILATION_SIZE_Y", p.dilation.y);
    jit.add("INPUT0_OFFSET_WITH_PADDING_X", p.padding.x);
    jit.add("INPUT0_OFFSET_WITH_PADDING_Y", p.padding.y);
    jit.add("FILTER_SIZE_X", p.filter_size.x);
    jit.add("FILTER_SIZE_Y", p.filter_size.y);
    jit.add("SPLIT", p.split);
    jit
}

pub(crate) fn default_dispatch(p: &ConvolutionParams) -> WorkGroups {
    let output = &p.base.output;
    let gws0 = output.feature().v * output.batch().v;
    let mut lws0 = gws0.clamp(1, 32);
    while gws0 % lws0 != 0 {
        lws0 -= 1;
    }
    WorkGroups::new([gws0, output.x().v, output.y().v], [lws0, 1, 1])
}

pub(crate) fn convolution_arguments(p: &ConvolutionParams) -> Vec<ArgumentDescriptor> {
    let mut args = standard_arguments(1, true, !p.weight_bias.bias.is_empty());
    args.push(ArgumentDescriptor::Split);
    args
}
