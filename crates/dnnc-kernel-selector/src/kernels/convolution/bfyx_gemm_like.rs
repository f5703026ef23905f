use crate::dispatch::{ceil_div, round_up, WorkGroups};
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, update_weights_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

use super::{check_padded_input, convolution_arguments, convolution_jit, validate_convolution};

struct GemmStyle {
    sub_block_dim_m: usize,
    sub_block_dim_n: usize,
    global_work_size_dx: usize,
    global_work_size_dy: usize,
    lws1: usize,
}

/// Convolution lowered to a blocked matrix multiply over reshaped weights.
pub struct ConvolutionKernelBfyxGemmLike;

impl ConvolutionKernelBfyxGemmLike {
    const NAME: &'static str = "convolution_gpu_bfyx_gemm_like";
}

impl KernelImpl for ConvolutionKernelBfyxGemmLike {
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
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_output_layout(DataLayout::Bfyx);
        k.enable_input_weights_layout(WeightsLayout::IyXsOsXsv2Osv16Ao32);
        k.enable_input_weights_layout(WeightsLayout::IyXsOsXsv2Osv8Ao32);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.require_subgroups();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.enable_batching();
        k.enable_split_support();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        validate_convolution(p)?;
        check_padded_input(p)?;

        let input_dtype = p.base.inputs[0].dtype;
        let fp16 = input_dtype == Datatype::F16;
        let (style, weights_layout, estimated_time) = if fp16 {
            (
                GemmStyle {
                    sub_block_dim_m: 1,
                    sub_block_dim_n: 32,
                    global_work_size_dx: 1,
                    global_work_size_dy: 1,
                    lws1: 16,
                },
                WeightsLayout::IyXsOsXsv2Osv16Ao32,
                priority::FORCE_PRIORITY_6,
            )
        } else {
            (
                GemmStyle {
                    sub_block_dim_m: 2,
                    sub_block_dim_n: 32,
                    global_work_size_dx: 2,
                    global_work_size_dy: 1,
                    lws1: 8,
                },
                WeightsLayout::IyXsOsXsv2Osv8Ao32,
                priority::FORCE_PRIORITY_8,
            )
        };
        let weights_reorder =
            update_weights_params(&p.weight_bias, input_dtype, options, &[weights_layout])?;

        let output = &p.base.output;
        let sgemm_m = round_up(output.x().v * output.y().v, style.sub_block_dim_m);
        let sgemm_n = round_up(output.feature().v, style.sub_block_dim_n);
        let work_groups = WorkGroups::new(
            [
                ceil_div(sgemm_n, style.global_work_size_dx),
                round_up(ceil_div(sgemm_m, style.global_work_size_dy), style.lws1),
                output.batch().v,
            ],
            [1, style.lws1, 1],
        );

        let mut jit = convolution_jit(p);
        jit.add("ALIGNED_OFM", sgemm_n);
        jit.add("DX", style.global_work_size_dx);
        jit.add("DY", style.global_work_size_dy);
        jit.add("FILTER_SIZE_X_DIV2", p.filter_size.x / 2);
        jit.add("KERNEL_VARIANT", if fp16 { "fp16" } else { "fp32" });

        let mut kd = build_kernel_data(PlanParts {
            kernel_type: KernelType::Convolution,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups,
            arguments: convolution_arguments(p),
            estimated_time,
        })?;
        kd.weights_reorder = weights_reorder;
        Ok(vec![kd])
    }
}
