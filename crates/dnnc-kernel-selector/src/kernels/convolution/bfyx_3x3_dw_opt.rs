use crate::dispatch::{ceil_div, WorkGroups};
use crate::kernel::{priority, KernelData, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, update_weights_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{ConvolutionParams, KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

use super::{check_padded_input, convolution_arguments, convolution_jit, validate_convolution};

const SIMD_SIZE: usize = 16;
const TILE_X_SIZES: [usize; 10] = [1, 2, 4, 5, 6, 8, 10, 12, 14, 16];
const TILE_Y_SIZES: [usize; 7] = [1, 2, 3, 4, 5, 6, 7];
const DEFAULT_TILE: (usize, usize) = (SIMD_SIZE - 2, 7);

/// Depthwise 3x3 stride-1 convolution, one feature per split group.
pub struct ConvolutionKernelBfyx3x3DwOpt {
    auto_tune_options: Vec<(usize, usize)>,
}

impl ConvolutionKernelBfyx3x3DwOpt {
    const NAME: &'static str = "convolution_gpu_bfyx_3x3_dw_opt";

    pub fn new() -> Self {
        let auto_tune_options = TILE_X_SIZES
            .iter()
            .flat_map(|x| TILE_Y_SIZES.iter().map(move |y| (*x, *y)))
            .collect();
        Self { auto_tune_options }
    }

    fn validate(p: &ConvolutionParams) -> Result<(), KernelError> {
        validate_convolution(p)?;
        check_padded_input(p)?;
        let input = &p.base.inputs[0];
        let depthwise = p.filter_size.x == 3
            && p.filter_size.y == 3
            && p.stride.x == 1
            && p.stride.y == 1
            && p.padding.x == 1
            && p.padding.y == 1
            && input.feature().v == p.split;
        if !depthwise || p.base.output.is_padded() {
            return Err(KernelError::not_applicable(
                "needs unpadded output of a depthwise 3x3 stride-1 pad-1 convolution",
            ));
        }
        Ok(())
    }

    fn kernel_data_for(
        &self,
        p: &ConvolutionParams,
        options: &OptionalParams,
        tile: (usize, usize),
    ) -> Result<KernelData, KernelError> {
        let input = &p.base.inputs[0];
        let weights_reorder =
            update_weights_params(&p.weight_bias, input.dtype, options, &[WeightsLayout::Oiyx])?;

        let mut jit = convolution_jit(p);
        jit.add(
            "UNIT_BYTE_SIZE",
            if input.dtype == Datatype::F16 { 2 } else { 4 },
        );
        jit.add("SUB_GROUP_SIZE", SIMD_SIZE);
        jit.add("TILE_WIDTH", tile.0);
        jit.add("TILE_HEIGHT", tile.1);

        let work_groups = WorkGroups::new(
            [
                ceil_div(input.x().v, tile.0) * SIMD_SIZE,
                ceil_div(input.y().v, tile.1),
                input.feature().v * input.batch().v,
            ],
            [SIMD_SIZE, 1, 1],
        );

        let mut kd = build_kernel_data(PlanParts {
            kernel_type: KernelType::Convolution,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups,
            arguments: convolution_arguments(p),
            estimated_time: priority::FORCE_PRIORITY_5,
        })?;
        kd.weights_reorder = weights_reorder;
        Ok(kd)
    }
}

impl Default for ConvolutionKernelBfyx3x3DwOpt {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelImpl for ConvolutionKernelBfyx3x3DwOpt {
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
        k.enable_input_weights_layout(WeightsLayout::Oiyx);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.enable_batching();
        k.enable_split_support();
        k.require_subgroups();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Convolution);
        Self::validate(p)?;
        Ok(vec![self.kernel_data_for(p, options, DEFAULT_TILE)?])
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
        let tile = match index {
            None => DEFAULT_TILE,
            Some(index) => *self.auto_tune_options.get(index).ok_or_else(|| {
                KernelError::not_applicable(format!("{} has no tuning variant {index}", Self::NAME))
            })?,
        };
        let mut kd = self.kernel_data_for(p, options, tile)?;
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
        for (index, tile) in self.auto_tune_options.iter().enumerate() {
            let mut kd = self.kernel_data_for(p, options, *tile)?;
            kd.auto_tune_index = Some(index);
            all.push(kd);
        }
        all.push(self.kernel_data_for(p, options, DEFAULT_TILE)?);
        Ok(all)
    }
}
