use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, update_weights_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

use super::{convolution_arguments, convolution_jit, default_dispatch, validate_convolution};

const SUPPORTED_WEIGHTS: [WeightsLayout; 4] = [
    WeightsLayout::Oiyx,
    WeightsLayout::Yxio,
    WeightsLayout::Iyxo,
    WeightsLayout::Oyxi,
];

/// Boundary-checked direct convolution; slow but accepts anything.
pub struct ConvolutionKernelRef;

impl ConvolutionKernelRef {
    const NAME: &'static str = "convolution_gpu_ref";
}

impl KernelImpl for ConvolutionKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Convolution
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        k.enable_input_weights_type(WeightsType::F16);
        k.enable_input_weights_type(WeightsType::F32);
        for layout in [DataLayout::Bfyx, DataLayout::Yxfb, DataLayout::Byxf] {
            k.enable_input_layout(layout);
            k.enable_output_layout(layout);
        }
        for layout in SUPPORTED_WEIGHTS {
            k.enable_input_weights_layout(layout);
        }
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_bias_per_feature();
        k.enable_bias_per_output();
        k.enable_non_bias();
        k.enable_split_support();
        k.enable_dilation();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        validate_convolution(p)?;
        let input_dtype = p.base.inputs[0].dtype;
        // The reference kernel reads weights in whatever plain layout they come in.
        let preferred: &[WeightsLayout] = if SUPPORTED_WEIGHTS.contains(&p.weight_bias.weights.layout) {
            std::slice::from_ref(&p.weight_bias.weights.layout)
        } else {
            &SUPPORTED_WEIGHTS
        };
        let weights_reorder = update_weights_params(&p.weight_bias, input_dtype, options, preferred)?;

        let mut kd = build_kernel_data(PlanParts {
            kernel_type: KernelType::Convolution,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit: convolution_jit(p),
            work_groups: default_dispatch(p),
            arguments: convolution_arguments(p),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?;
        kd.weights_reorder = weights_reorder;
        Ok(vec![kd])
    }
}
