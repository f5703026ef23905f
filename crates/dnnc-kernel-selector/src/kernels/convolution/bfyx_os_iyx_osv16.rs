use crate::dispatch::{ceil_div, round_up, WorkGroups};
use crate::kernel::{priority, KernelData, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, update_weights_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{ConvolutionParams, KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

use super::{check_padded_input, convolution_arguments, convolution_jit, validate_convolution};

const SUB_GROUP_SIZE: usize = 16;
const MAX_BLOCK_SIZE: usize = 60;
const BLOCK_WIDTHS: [usize; 10] = [1, 2, 4, 5, 6, 8, 10, 12, 14, 16];
const BLOCK_HEIGHTS: [usize; 5] = [1, 2, 3, 4, 5];
const PREFETCHES: [usize; 8] = [1, 2, 3, 4, 5, 6, 8, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockConfig {
    block_width: usize,
    block_height: usize,
    prefetch: usize,
}

/// Sub-group convolution over `os_iyx_osv16` weights, computing an output
/// block per work item. Tunable over block shape and prefetch depth.
pub struct ConvolutionKernelBfyxOsIyxOsv16 {
    auto_tune_options: Vec<BlockConfig>,
}

impl ConvolutionKernelBfyxOsIyxOsv16 {
    const NAME: &'static str = "convolution_gpu_bfyx_os_iyx_osv16";

    pub fn new() -> Self {
        let mut auto_tune_options = Vec::new();
        for block_width in BLOCK_WIDTHS {
            for block_height in BLOCK_HEIGHTS {
                for prefetch in PREFETCHES {
                    if block_width * block_height <= MAX_BLOCK_SIZE {
                        auto_tune_options.push(BlockConfig {
                            block_width,
                            block_height,
                            prefetch,
                        });
                    }
                }
            }
        }
        Self { auto_tune_options }
    }

    pub fn tuning_variant_count(&self) -> usize {
        self.auto_tune_options.len()
    }

    fn default_config(p: &ConvolutionParams) -> BlockConfig {
        let (stride, filter, dilation) = (p.stride, p.filter_size, p.dilation);
        let out_x = p.base.output.x().v;
        let (block_width, block_height, prefetch) = if stride.x == 1 && stride.y == 1 {
            if filter.x == 1 && filter.y == 1 {
                (16, 1, 4)
            } else if out_x + (filter.x - 1) * dilation.x < SUB_GROUP_SIZE {
                // One row per work item keeps the whole row inside the sub-group.
                (out_x, 1, 4)
            } else if filter.x < 5 && filter.y < 5 {
                (SUB_GROUP_SIZE - filter.x + 1, 2, 4)
            } else {
                (4, 3, 4)
            }
        } else if stride.x == 2 && stride.y == 2 {
            (5, 4, 4)
        } else {
            (4, 3, 5)
        };
        BlockConfig {
            block_width,
            block_height,
            prefetch,
        }
    }

    fn kernel_data_for(
        &self,
        p: &ConvolutionParams,
        options: &OptionalParams,
        config: BlockConfig,
    ) -> Result<KernelData, KernelError> {
        let input = &p.base.inputs[0];
        let output = &p.base.output;
        let fp16 = input.dtype == Datatype::F16;

        let in_block_req_width =
            (config.block_width - 1) * p.stride.x + (p.filter_size.x - 1) * p.dilation.x + 1;
        let in_block_req_height =
            (config.block_height - 1) * p.stride.y + (p.filter_size.y - 1) * p.dilation.y + 1;
        let read_chunk = if fp16 { SUB_GROUP_SIZE } else { SUB_GROUP_SIZE / 2 };
        let in_block_width = round_up(in_block_req_width, read_chunk).max(SUB_GROUP_SIZE);
        let in_block_array_size = ceil_div(in_block_req_height * in_block_width, SUB_GROUP_SIZE);

        let of_maps = output.feature().v;
        let of_threads_per_batch = round_up(of_maps, SUB_GROUP_SIZE);
        let leftovers = of_threads_per_batch - of_maps;

        let weights_reorder = update_weights_params(
            &p.weight_bias,
            input.dtype,
            options,
            &[WeightsLayout::OsIyxOsv16],
        )?;

        let mut jit = convolution_jit(p);
        jit.add("SUB_GROUP_SIZE", SUB_GROUP_SIZE);
        jit.add("OUTPUT_BLOCK_WIDTH", config.block_width);
        jit.add("OUTPUT_BLOCK_HEIGHT", config.block_height);
        jit.add("IN_BLOCK_ARRAY_SIZE", in_block_array_size);
        jit.add("IN_BLOCK_WIDTH", in_block_width);
        jit.add("PREFETCH", config.prefetch);
        if leftovers > 0 {
            jit.add("LEFTOVERS", leftovers);
        }

        let work_groups = WorkGroups::new(
            [
                ceil_div(output.x().v, config.block_width),
                ceil_div(output.y().v, config.block_height),
                of_threads_per_batch * output.batch().v,
            ],
            [1, 1, SUB_GROUP_SIZE],
        );

        let mut kd = build_kernel_data(PlanParts {
            kernel_type: KernelType::Convolution,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups,
            arguments: convolution_arguments(p),
            estimated_time: priority::FORCE_PRIORITY_3,
        })?;
        kd.weights_reorder = weights_reorder;
        Ok(kd)
    }

    fn validate(p: &ConvolutionParams) -> Result<(), KernelError> {
        validate_convolution(p)?;
        check_padded_input(p)
    }
}

impl Default for ConvolutionKernelBfyxOsIyxOsv16 {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelImpl for ConvolutionKernelBfyxOsIyxOsv16 {
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
        k.enable_input_weights_layout(WeightsLayout::OsIyxOsv16);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.require_subgroups();
        k.enable_bias_per_feature();
        k.enable_bias_per_output();
        k.enable_non_bias();
        k.enable_batching();
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
        Self::validate(p)?;
        Ok(vec![self.kernel_data_for(p, options, Self::default_config(p))?])
    }

    fn supports_tuning(&self) -> bool {
        true
    }

    fn tuned_kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
        index: Option<usize>,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        Self::validate(p)?;
        let config = match index {
            None => Self::default_config(p),
            Some(index) => *self.auto_tune_options.get(index).ok_or_else(|| {
                KernelError::not_applicable(format!(
                    "{} has {} tuning variants, asked for {index}",
                    Self::NAME,
                    self.auto_tune_options.len()
                ))
            })?,
        };
        let mut kd = self.kernel_data_for(p, options, config)?;
        kd.auto_tune_index = index;
        Ok(vec![kd])
    }

    fn kernels_data_for_auto_tune(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        Self::validate(p)?;
        let mut all = Vec::with_capacity(self.auto_tune_options.len() + 1);
        for (index, config) in self.auto_tune_options.iter().enumerate() {
            let mut kd = self.kernel_data_for(p, options, *config)?;
            kd.auto_tune_index = Some(index);
            all.push(kd);
        }
        all.push(self.kernel_data_for(p, options, Self::default_config(p))?);
        Ok(all)
    }
}
