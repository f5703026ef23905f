//! Fully-connected kernels.

use crate::dispatch::{ceil_div, WorkGroups};
use crate::jit::{make_base_jit, make_weight_bias_jit, JitConstants};
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{
    build_kernel_data, expect_params, standard_arguments, update_weights_params, PlanParts,
};
use crate::key::ParamsKey;
use crate::params::{FullyConnectedParams, KernelType, OptionalParams, Params};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

fn validate_fully_connected(p: &FullyConnectedParams) -> Result<(), KernelError> {
    if p.base.inputs.len() != 1 {
        return Err(KernelError::invalid("fully connected expects one input"));
    }
    let input = &p.base.inputs[0];
    let weights = &p.weight_bias.weights;
    let input_elements = input.feature().v * input.x().v * input.y().v;
    if weights.ifm * weights.x * weights.y != input_elements {
        return Err(KernelError::invalid(format!(
            "weights consume {} elements per batch, input has {input_elements}",
            weights.ifm * weights.x * weights.y
        )));
    }
    if weights.ofm != p.base.output.feature().v {
        return Err(KernelError::invalid(format!(
            "weights produce {} outputs, output has {}",
            weights.ofm,
            p.base.output.feature().v
        )));
    }
    Ok(())
}

fn fully_connected_jit(p: &FullyConnectedParams) -> JitConstants {
    let mut jit = make_base_jit(&p.base);
    jit.merge(make_weight_bias_jit(&p.weight_bias));
    jit
}

fn plan(
    p: &FullyConnectedParams,
    kernel_name: &str,
    jit: JitConstants,
    work_groups: WorkGroups,
    estimated_time: f32,
    weights_reorder: Option<crate::kernel::WeightsReorderRequest>,
) -> Result<KernelsData, KernelError> {
    let mut kd = build_kernel_data(PlanParts {
        kernel_type: KernelType::FullyConnected,
        kernel_name,
        layer_id: &p.base.layer_id,
        jit,
        work_groups,
        arguments: standard_arguments(1, true, !p.weight_bias.bias.is_empty()),
        estimated_time,
    })?;
    kd.weights_reorder = weights_reorder;
    Ok(vec![kd])
}

fn enable_float_types(k: &mut ParamsKey) {
    for dtype in [Datatype::F16, Datatype::F32] {
        k.enable_input_data_type(dtype);
        k.enable_output_data_type(dtype);
    }
    k.enable_input_weights_type(WeightsType::F16);
    k.enable_input_weights_type(WeightsType::F32);
}

const REF_WEIGHTS: [WeightsLayout; 6] = [
    WeightsLayout::Oiyx,
    WeightsLayout::Oi,
    WeightsLayout::Yxio,
    WeightsLayout::Io,
    WeightsLayout::OsIOsv16,
    WeightsLayout::OsIsv8Osv8,
];

/// One work item per output element.
pub struct FullyConnectedKernelRef;

impl FullyConnectedKernelRef {
    const NAME: &'static str = "fully_connected_gpu_ref";
}

impl KernelImpl for FullyConnectedKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::FullyConnected
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_float_types(&mut k);
        for layout in [
            DataLayout::Bfyx,
            DataLayout::Bf,
            DataLayout::Yxfb,
            DataLayout::Fb,
        ] {
            k.enable_input_layout(layout);
        }
        k.enable_output_layout(DataLayout::Bf);
        k.enable_output_layout(DataLayout::Fb);
        for layout in REF_WEIGHTS {
            k.enable_input_weights_layout(layout);
        }
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, FullyConnected);
        validate_fully_connected(p)?;
        let current = p.weight_bias.weights.layout;
        let layouts: &[WeightsLayout] = if REF_WEIGHTS.contains(&current) {
            std::slice::from_ref(&p.weight_bias.weights.layout)
        } else {
            &REF_WEIGHTS
        };
        let weights_reorder =
            update_weights_params(&p.weight_bias, p.base.inputs[0].dtype, options, layouts)?;

        let gws0 = p.base.output.logical_size();
        let mut lws0 = gws0.clamp(1, 32);
        while gws0 % lws0 != 0 {
            lws0 -= 1;
        }
        plan(
            p,
            Self::NAME,
            fully_connected_jit(p),
            WorkGroups::new([gws0, 1, 1], [lws0, 1, 1]),
            priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
            weights_reorder,
        )
    }
}

/// Row-blocked matrix-vector product.
pub struct FullyConnectedKernelGemm;

impl FullyConnectedKernelGemm {
    const NAME: &'static str = "fully_connected_gpu_gemm";
    const LOCAL_WORK_SIZE_X: usize = 64;
    const VEC_SIZE: usize = 4;
}

impl KernelImpl for FullyConnectedKernelGemm {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::FullyConnected
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_float_types(&mut k);
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_input_layout(DataLayout::Bf);
        k.enable_output_layout(DataLayout::Bf);
        k.enable_input_weights_layout(WeightsLayout::Oiyx);
        k.enable_input_weights_layout(WeightsLayout::Oi);
        k.enable_bias_per_feature();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, FullyConnected);
        validate_fully_connected(p)?;
        let input = &p.base.inputs[0];
        let weights_reorder =
            update_weights_params(&p.weight_bias, input.dtype, options, &[WeightsLayout::Oiyx])?;

        let line = input.batch().pitch;
        let mut jit = fully_connected_jit(p);
        jit.add(
            "LAST_INPUT_SIZE_REMAINDER",
            line % (Self::LOCAL_WORK_SIZE_X * Self::VEC_SIZE),
        );
        jit.add("LAST_INPUT_SIZE_DIV_4", line % Self::VEC_SIZE);

        let output = &p.base.output;
        plan(
            p,
            Self::NAME,
            jit,
            WorkGroups::new(
                [
                    Self::LOCAL_WORK_SIZE_X,
                    output.feature().v,
                    output.batch().v,
                ],
                [Self::LOCAL_WORK_SIZE_X, 1, 1],
            ),
            priority::FORCE_PRIORITY_6,
            weights_reorder,
        )
    }
}

/// Half-precision block reads over batch-innermost data; large batches only.
pub struct FullyConnectedFbIoBlock;

impl FullyConnectedFbIoBlock {
    const NAME: &'static str = "fully_connected_gpu_fb_io_block_fp16";
    const SUB_GROUP_SIZE: usize = 16;
    const UNITS_PER_CHUNK: usize = 2;
    const UNITS_PER_SG_READ: usize = Self::SUB_GROUP_SIZE * Self::UNITS_PER_CHUNK;
}

impl KernelImpl for FullyConnectedFbIoBlock {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::FullyConnected
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        k.enable_input_data_type(Datatype::F16);
        k.enable_output_data_type(Datatype::F16);
        k.enable_input_weights_type(WeightsType::F16);
        k.enable_input_weights_type(WeightsType::F32);
        k.enable_all_input_layout();
        k.enable_output_layout(DataLayout::Fb);
        k.enable_input_weights_layout(WeightsLayout::Io);
        k.enable_input_weights_layout(WeightsLayout::Iyxo);
        k.enable_batching();
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.require_subgroups();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, FullyConnected);
        validate_fully_connected(p)?;
        let input = &p.base.inputs[0];
        let output = &p.base.output;

        let proper_input = match input.layout {
            DataLayout::Fb => true,
            DataLayout::Yxfb => input.is_spatial_flat(),
            DataLayout::Fyxb => !input.is_padded(),
            _ => false,
        };
        if !proper_input {
            return Err(KernelError::not_applicable(format!(
                "input layout {:?} is not batch-innermost",
                input.layout
            )));
        }

        let batches = output.batch().v;
        let response_size = output.feature().v;
        let x_size = input.logical_size() / batches.max(1);
        let batch_ok = batches > 0 && batches % 8 == 0 && batches % Self::UNITS_PER_SG_READ == 0;
        let feature_ok = response_size > 0 && (response_size * 2) % 4 == 0 && x_size % 8 == 0;
        if !batch_ok || !feature_ok {
            return Err(KernelError::not_applicable(
                "batch must be a multiple of 32 and responses even",
            ));
        }

        let weights_reorder =
            update_weights_params(&p.weight_bias, input.dtype, options, &[WeightsLayout::Io])?;

        let rg_count = ceil_div(response_size, Self::UNITS_PER_SG_READ);
        let mut jit = fully_connected_jit(p);
        jit.add("SUB_GROUP_SIZE", Self::SUB_GROUP_SIZE);
        jit.add("WORK_ITEMS_PER_BATCH", batches / Self::UNITS_PER_SG_READ);
        jit.add("UNIT_BYTE_SIZE", 2);
        jit.add("CHUNK_TYPE", "uint");
        jit.add("CHUNK_BYTE_SIZE", 4);
        jit.add("UNITS_PER_CHUNK", Self::UNITS_PER_CHUNK);
        jit.add("BYTES_PER_SG_READ", Self::SUB_GROUP_SIZE * 4);
        jit.add("UNITS_PER_SG_READ", Self::UNITS_PER_SG_READ);
        jit.add("RG_COUNT", rg_count);
        jit.add("LAST_RG_SIZE", response_size % Self::UNITS_PER_SG_READ);

        plan(
            p,
            Self::NAME,
            jit,
            WorkGroups::new(
                [
                    rg_count * Self::SUB_GROUP_SIZE,
                    batches / Self::UNITS_PER_SG_READ,
                    1,
                ],
                [Self::SUB_GROUP_SIZE, 1, 1],
            ),
            priority::FORCE_PRIORITY_4,
            weights_reorder,
        )
    }
}

/// Single-batch kernel over `os_i_osv16` weights.
pub struct FullyConnectedBsFBsv16B1;

impl FullyConnectedBsFBsv16B1 {
    const NAME: &'static str = "fully_connected_gpu_bs_f_bsv16_b1";
    const SUB_GROUP_SIZE: usize = 16;
    const RESPONSES_PER_SG_EXEC: usize = 16;
}

impl KernelImpl for FullyConnectedBsFBsv16B1 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::FullyConnected
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_float_types(&mut k);
        k.enable_input_layout(DataLayout::Bfyx);
        k.enable_input_layout(DataLayout::Bf);
        k.enable_output_layout(DataLayout::Bf);
        k.enable_input_weights_layout(WeightsLayout::OsIOsv16);
        k.enable_bias_per_feature();
        k.enable_non_bias();
        k.require_subgroups();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, FullyConnected);
        validate_fully_connected(p)?;
        let input = &p.base.inputs[0];
        let weights_reorder = update_weights_params(
            &p.weight_bias,
            input.dtype,
            options,
            &[WeightsLayout::OsIOsv16],
        )?;

        let unit_byte_size = if input.dtype == Datatype::F16 { 2 } else { 4 };
        let units_per_chunk = 4 / unit_byte_size;
        let response_size = p.base.output.feature().v;
        let rg_count = ceil_div(response_size, Self::RESPONSES_PER_SG_EXEC);

        let mut jit = fully_connected_jit(p);
        jit.add("SUB_GROUP_SIZE", Self::SUB_GROUP_SIZE);
        jit.add("WORK_ITEMS_PER_BATCH", 1);
        jit.add("UNIT_BYTE_SIZE", unit_byte_size);
        jit.add("CHUNK_TYPE", "uint");
        jit.add("CHUNK_BYTE_SIZE", 4);
        jit.add("UNITS_PER_CHUNK", units_per_chunk);
        jit.add("BYTES_PER_SG_READ", Self::SUB_GROUP_SIZE * 4);
        jit.add("UNITS_PER_SG_READ", Self::SUB_GROUP_SIZE * units_per_chunk);
        jit.add("RESPONSES_PER_SG_EXEC", Self::RESPONSES_PER_SG_EXEC);
        jit.add("IN_CHUNK_PREFETCH_SIZE", 2);
        jit.add("FILTER_CHUNK_PREFETCH_SIZE", Self::RESPONSES_PER_SG_EXEC);

        plan(
            p,
            Self::NAME,
            jit,
            WorkGroups::new(
                [rg_count * Self::SUB_GROUP_SIZE, 1, 1],
                [Self::SUB_GROUP_SIZE, 1, 1],
            ),
            priority::FORCE_PRIORITY_5,
            weights_reorder,
        )
    }
}
