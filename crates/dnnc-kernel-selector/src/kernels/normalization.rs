//! Batch normalization, per-feature scale and their fusion into a convolution.

use crate::dispatch::WorkGroups;
use crate::jit::make_base_jit;
use crate::kernel::{priority, ArgumentDescriptor, KernelError, KernelImpl, KernelsData};
use crate::kernels::convolution::{convolution_jit, default_dispatch, validate_convolution};
use crate::kernels::{
    build_kernel_data, expect_params, standard_arguments, update_weights_params, PlanParts,
};
use crate::key::ParamsKey;
use crate::params::{BaseParams, KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, DataTensor, Datatype, WeightsLayout, WeightsType};

fn check_per_feature(what: &str, tensor: &DataTensor, features: usize) -> Result<(), KernelError> {
    if tensor.logical_size() != features {
        return Err(KernelError::invalid(format!(
            "{what} has {} elements for {features} features",
            tensor.logical_size()
        )));
    }
    Ok(())
}

fn per_element_dispatch(output: &DataTensor) -> WorkGroups {
    WorkGroups::with_optimal_local([
        output.x().v * output.y().v,
        output.feature().v,
        output.batch().v,
    ])
}

fn float_key() -> ParamsKey {
    let mut k = ParamsKey::new();
    for dtype in [Datatype::F16, Datatype::F32] {
        k.enable_input_data_type(dtype);
        k.enable_output_data_type(dtype);
    }
    for layout in [DataLayout::Bfyx, DataLayout::Yxfb, DataLayout::Byxf] {
        k.enable_input_layout(layout);
        k.enable_output_layout(layout);
    }
    k.enable_tensor_offset();
    k.enable_tensor_pitches();
    k.enable_batching();
    k
}

/// `(x - mean) / sqrt(variance + epsilon)` per feature.
pub struct BatchNormKernelRef;

impl BatchNormKernelRef {
    const NAME: &'static str = "batch_norm_gpu_ref";
}

impl KernelImpl for BatchNormKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::BatchNorm
    }

    fn supported_key(&self) -> ParamsKey {
        float_key()
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, BatchNorm);
        let [input, mean, variance] = p.base.inputs.as_slice() else {
            return Err(KernelError::invalid(
                "batch norm expects data, mean and variance",
            ));
        };
        let features = input.feature().v;
        check_per_feature("mean", mean, features)?;
        check_per_feature("variance", variance, features)?;
        if p.epsilon.is_nan() || p.epsilon < 0.0 {
            return Err(KernelError::invalid("epsilon must be non-negative"));
        }

        let mut jit = make_base_jit(&p.base);
        jit.add("EPSILON", p.epsilon);

        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::BatchNorm,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: per_element_dispatch(&p.base.output),
            arguments: standard_arguments(3, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}

/// `x * scale + bias` per feature.
pub struct ScaleKernelRef;

impl ScaleKernelRef {
    const NAME: &'static str = "scale_gpu_ref";
}

impl KernelImpl for ScaleKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Scale
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = float_key();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Scale);
        let (input, rest) = p
            .base
            .inputs
            .split_first()
            .ok_or_else(|| KernelError::invalid("scale needs an input"))?;
        if rest.is_empty() || rest.len() > 2 {
            return Err(KernelError::invalid(
                "scale expects a scale input and an optional bias",
            ));
        }
        for (what, tensor) in ["scale", "bias"].into_iter().zip(rest) {
            check_per_feature(what, tensor, input.feature().v)?;
        }

        let mut jit = make_base_jit(&p.base);
        jit.add("BIAS_TERM", u8::from(p.has_bias()));

        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Scale,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: per_element_dispatch(&p.base.output),
            arguments: standard_arguments(p.base.inputs.len() as u32, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}

/// Reference convolution that normalizes and scales each output feature
/// before the fused activation.
pub struct FusedConvBnScaleKernelRef;

impl FusedConvBnScaleKernelRef {
    const NAME: &'static str = "fused_conv_bn_scale_kernel_ref";
}

impl KernelImpl for FusedConvBnScaleKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::FusedConvBnScale
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        k.enable_input_data_type(Datatype::F32);
        k.enable_output_data_type(Datatype::F32);
        k.enable_input_weights_type(WeightsType::F32);
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_output_layout(DataLayout::Bfyx);
        k.enable_input_weights_layout(WeightsLayout::Oiyx);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.enable_split_support();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, FusedConvBnScale);
        let inputs = &p.conv.base.inputs;
        if inputs.len() < 4 || inputs.len() > 5 {
            return Err(KernelError::invalid(
                "fused convolution expects data, mean, variance, scale and an optional scale bias",
            ));
        }

        let mut conv = p.conv.clone();
        conv.base = BaseParams {
            inputs: vec![inputs[0].clone()],
            ..p.conv.base.clone()
        };
        validate_convolution(&conv)?;
        let features = conv.base.output.feature().v;
        for (what, tensor) in ["mean", "variance", "scale", "scale bias"]
            .into_iter()
            .zip(&inputs[1..])
        {
            check_per_feature(what, tensor, features)?;
        }
        let weights_reorder =
            update_weights_params(&conv.weight_bias, inputs[0].dtype, options, &[WeightsLayout::Oiyx])?;

        let mut jit = convolution_jit(&conv);
        jit.add("EPSILON", p.epsilon);
        jit.add("SCALE_BIAS_TERM", u8::from(p.has_scale_bias()));

        let mut arguments: Vec<ArgumentDescriptor> =
            (0..inputs.len() as u32).map(ArgumentDescriptor::Input).collect();
        arguments.push(ArgumentDescriptor::Output);
        arguments.push(ArgumentDescriptor::Weights);
        if !conv.weight_bias.bias.is_empty() {
            arguments.push(ArgumentDescriptor::Bias);
        }
        arguments.push(ArgumentDescriptor::Split);

        let mut kd = build_kernel_data(PlanParts {
            kernel_type: KernelType::FusedConvBnScale,
            kernel_name: Self::NAME,
            layer_id: &p.conv.base.layer_id,
            jit,
            work_groups: default_dispatch(&conv),
            arguments,
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?;
        kd.weights_reorder = weights_reorder;
        Ok(vec![kd])
    }
}
