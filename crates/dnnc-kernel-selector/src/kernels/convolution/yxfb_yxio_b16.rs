use crate::dispatch::WorkGroups;
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, update_weights_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

use super::{convolution_arguments, convolution_jit, validate_convolution};

const MIN_LWS: usize = 16;

/// Batch-innermost convolution for large batches.
pub struct ConvolutionKernelYxfbYxioB16;

impl ConvolutionKernelYxfbYxioB16 {
    const NAME: &'static str = "convolution_gpu_yxfb_yxio_b16";
}

impl KernelImpl for ConvolutionKernelYxfbYxioB16 {
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
        k.enable_input_layout(DataLayout::Yxfb);
        k.enable_output_layout(DataLayout::Yxfb);
        k.enable_input_weights_layout(WeightsLayout::Yxio);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.enable_batching();
        k.enable_split_support();
        k.enable_dilation();
        k.require_subgroups();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        validate_convolution(p)?;

        let output = &p.base.output;
        let filter_ofm = p.weight_bias.weights.ofm;
        let batch = output.batch().v;
        let input_dtype = p.base.inputs[0].dtype;
        let fp16 = input_dtype == Datatype::F16;

        if filter_ofm == 0 || batch == 0 || output.feature().v != filter_ofm {
            return Err(KernelError::not_applicable(
                "output features must match a single weights group",
            ));
        }

        let (ofm_per_work_item, batches_per_work_item, estimated_time) = if fp16 {
            if filter_ofm % 16 != 0 || batch % MIN_LWS != 0 {
                return Err(KernelError::not_applicable(
                    "fp16 path needs ofm and batch divisible by 16",
                ));
            }
            let batches = if batch % (4 * MIN_LWS) == 0 {
                4
            } else if batch % (2 * MIN_LWS) == 0 {
                2
            } else {
                1
            };
            (16, batches, priority::FORCE_PRIORITY_7)
        } else {
            if (filter_ofm * batch) % MIN_LWS != 0 || batch < 32 {
                return Err(KernelError::not_applicable(
                    "fp32 path needs batch >= 32 and ofm*batch divisible by 16",
                ));
            }
            (8, 2, priority::FORCE_PRIORITY_9)
        };

        let weights_reorder =
            update_weights_params(&p.weight_bias, input_dtype, options, &[WeightsLayout::Yxio])?;

        let mut jit = convolution_jit(p);
        jit.add("LOCAL_WORK_GROUP_SIZE", MIN_LWS);
        jit.add("OFM_PER_WORK_ITEM", ofm_per_work_item);
        jit.add("BATCHES_PER_WORK_ITEM", batches_per_work_item);
        jit.add(
            "LOCAL_WORK_GROUPS_PER_SINGLE_BATCHES_ELEMENTS",
            (batch / batches_per_work_item / MIN_LWS).max(1),
        );
        jit.add(
            "WORK_ITEMS_PER_SINGLE_BATCHES_ELEMENTS",
            batch / batches_per_work_item,
        );

        let gws0 = filter_ofm * batch / (ofm_per_work_item * batches_per_work_item);
        let work_groups = WorkGroups::new(
            [gws0, output.x().v, output.y().v],
            [MIN_LWS, 1, 1],
        );

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
