//! Pooling kernels.

use crate::dispatch::{ceil_div, WorkGroups};
use crate::jit::{make_base_jit, JitConstants};
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, standard_arguments, PlanParts};
use crate::key::ParamsKey;
use crate::params::{
    KernelDividerMode, KernelType, OptionalParams, Params, PoolRemainder, PoolType, PoolingParams,
};
use crate::tensor::{DataLayout, Datatype};

fn validate_pooling(p: &PoolingParams) -> Result<(), KernelError> {
    if p.base.inputs.len() != 1 {
        return Err(KernelError::invalid("pooling expects one input"));
    }
    for (what, size) in [("window", p.pool_size), ("stride", p.pool_stride)] {
        if size.x == 0 || size.y == 0 {
            return Err(KernelError::invalid(format!("pooling {what} must be positive")));
        }
    }
    let input = &p.base.inputs[0];
    let output = &p.base.output;
    if input.feature().v != output.feature().v || input.batch().v != output.batch().v {
        return Err(KernelError::invalid(
            "pooling keeps feature and batch counts",
        ));
    }
    Ok(())
}

fn pooling_jit(p: &PoolingParams) -> JitConstants {
    let mut jit = make_base_jit(&p.base);
    jit.add("POOL_SIZE_X", p.pool_size.x);
    jit.add("POOL_SIZE_Y", p.pool_size.y);
    jit.add("POOL_STRIDE_X", p.pool_stride.x);
    jit.add("POOL_STRIDE_Y", p.pool_stride.y);
    jit.add("POOL_PAD_X", p.pool_pad.x);
    jit.add("POOL_PAD_Y", p.pool_pad.y);
    jit.add(
        "POOL_TYPE",
        match p.pool_type {
            PoolType::Max => "MAX",
            PoolType::Average => "AVG",
        },
    );
    jit.add(
        "POOL_REMAINDER",
        match p.remainder {
            PoolRemainder::Floor => "FLOOR",
            PoolRemainder::Ceil => "CEIL",
        },
    );
    jit.add(
        "KERNEL_DIVIDER",
        match p.divider {
            KernelDividerMode::Fixed => "FIXED",
            KernelDividerMode::DynamicWithPadding => "DYNAMIC_WITH_PADDING",
        },
    );
    jit
}

fn plan(
    p: &PoolingParams,
    kernel_name: &str,
    jit: JitConstants,
    work_groups: WorkGroups,
    estimated_time: f32,
) -> Result<KernelsData, KernelError> {
    Ok(vec![build_kernel_data(PlanParts {
        kernel_type: KernelType::Pooling,
        kernel_name,
        layer_id: &p.base.layer_id,
        jit,
        work_groups,
        arguments: standard_arguments(1, false, false),
        estimated_time,
    })?])
}

/// Generic window reduction with full boundary checks.
pub struct PoolingKernelRef;

impl PoolingKernelRef {
    const NAME: &'static str = "pooling_gpu_ref";
}

impl KernelImpl for PoolingKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Pooling
    }

    fn supported_key(&self) -> ParamsKey {
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
        k.enable_pool_type(PoolType::Max);
        k.enable_pool_type(PoolType::Average);
        k.enable_pool_remainder(PoolRemainder::Floor);
        k.enable_pool_remainder(PoolRemainder::Ceil);
        k.enable_pool_kernel_divider(KernelDividerMode::Fixed);
        k.enable_pool_kernel_divider(KernelDividerMode::DynamicWithPadding);
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Pooling);
        validate_pooling(p)?;
        let output = &p.base.output;
        plan(
            p,
            Self::NAME,
            pooling_jit(p),
            WorkGroups::with_optimal_local([
                output.x().v,
                output.y().v,
                output.feature().v * output.batch().v,
            ]),
            priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        )
    }
}

/// 3x3 stride-1 average pooling computed over shared tiles.
pub struct PoolingKernelAverageOpt;

impl PoolingKernelAverageOpt {
    const NAME: &'static str = "pooling_gpu_average_opt";
    const SIMD_SIZE: usize = 16;
    const TILE_HEIGHT: usize = 7;
}

impl KernelImpl for PoolingKernelAverageOpt {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Pooling
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        k.enable_input_data_type(Datatype::F32);
        k.enable_output_data_type(Datatype::F32);
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_output_layout(DataLayout::Bfyx);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_pool_type(PoolType::Average);
        k.enable_pool_remainder(PoolRemainder::Floor);
        k.enable_pool_remainder(PoolRemainder::Ceil);
        k.enable_pool_kernel_divider(KernelDividerMode::Fixed);
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Pooling);
        validate_pooling(p)?;
        let window_ok = p.pool_size.x == 3
            && p.pool_size.y == 3
            && p.pool_stride.x == 1
            && p.pool_stride.y == 1;
        if !window_ok || !p.base.activation.is_none() {
            return Err(KernelError::not_applicable(
                "only 3x3 stride-1 windows without a fused activation",
            ));
        }

        let tile_width = Self::SIMD_SIZE - 2;
        let output = &p.base.output;
        let mut jit = pooling_jit(p);
        jit.add("SUB_GROUP_SIZE", Self::SIMD_SIZE);
        jit.add("TILE_HEIGHT", Self::TILE_HEIGHT);
        jit.add("TILE_WIDTH", tile_width);
        jit.add("ONE_OVER_POOL_SIZE", 1.0f32 / 9.0);

        plan(
            p,
            Self::NAME,
            jit,
            WorkGroups::new(
                [
                    ceil_div(output.x().v, tile_width) * Self::SIMD_SIZE,
                    ceil_div(output.y().v, Self::TILE_HEIGHT),
                    output.feature().v * output.batch().v,
                ],
                [Self::SIMD_SIZE, 1, 1],
            ),
            priority::FORCE_PRIORITY_7,
        )
    }
}

/// Column-blocked pooling for windows that never leave the input.
pub struct PoolingKernelBfyxBlockOpt;

impl PoolingKernelBfyxBlockOpt {
    const NAME: &'static str = "pooling_gpu_bfyx_block_opt";

    fn needs_boundary_check(p: &PoolingParams) -> bool {
        if p.pool_pad.x != 0 || p.pool_pad.y != 0 {
            return true;
        }
        let input = &p.base.inputs[0];
        let output = &p.base.output;
        let reach = |out: usize, stride: usize, size: usize| out.saturating_sub(1) * stride + size;
        reach(output.x().v, p.pool_stride.x, p.pool_size.x) > input.x().v
            || reach(output.y().v, p.pool_stride.y, p.pool_size.y) > input.y().v
    }
}

impl KernelImpl for PoolingKernelBfyxBlockOpt {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Pooling
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_output_layout(DataLayout::Bfyx);
        k.enable_different_types();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_pool_type(PoolType::Max);
        k.enable_pool_type(PoolType::Average);
        k.enable_pool_remainder(PoolRemainder::Floor);
        k.enable_pool_remainder(PoolRemainder::Ceil);
        k.enable_pool_kernel_divider(KernelDividerMode::Fixed);
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Pooling);
        validate_pooling(p)?;
        if Self::needs_boundary_check(p) {
            return Err(KernelError::not_applicable(
                "pooling window reaches outside the input",
            ));
        }

        let output = &p.base.output;
        let block_size_y = p.pool_size.y + p.pool_size.y * p.pool_stride.y - 1;
        let mut jit = pooling_jit(p);
        jit.add("BLOCK_SIZE_Y", block_size_y);

        plan(
            p,
            Self::NAME,
            jit,
            WorkGroups::with_optimal_local([
                output.x().v,
                ceil_div(output.y().v, p.pool_size.y),
                output.feature().v * output.batch().v,
            ]),
            priority::FORCE_PRIORITY_8,
        )
    }
}
