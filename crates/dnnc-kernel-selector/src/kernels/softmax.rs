//! Softmax kernels.

use crate::dispatch::{ceil_div, WorkGroups};
use crate::jit::{make_base_jit, JitConstants};
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, standard_arguments, PlanParts};
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params, SoftmaxDim, SoftmaxParams};
use crate::tensor::{DataLayout, Datatype};

fn validate_softmax(p: &SoftmaxParams) -> Result<(), KernelError> {
    let [input] = p.base.inputs.as_slice() else {
        return Err(KernelError::invalid("softmax expects exactly one input"));
    };
    if input.logical_size() != p.base.output.logical_size() {
        return Err(KernelError::invalid("softmax keeps the input shape"));
    }
    if !p.base.activation.is_none() {
        return Err(KernelError::not_applicable(
            "softmax cannot apply a fused activation",
        ));
    }
    Ok(())
}

fn softmax_jit(p: &SoftmaxParams) -> JitConstants {
    let mut jit = make_base_jit(&p.base);
    jit.add(
        "SOFTMAX_DIM",
        match p.dim {
            SoftmaxDim::X => "X",
            SoftmaxDim::Y => "Y",
            SoftmaxDim::Feature => "FEATURE",
        },
    );
    jit
}

/// One work item per softmax set, looping over the normalized dimension.
pub struct SoftmaxKernelRef;

impl SoftmaxKernelRef {
    const NAME: &'static str = "softmax_gpu_ref";
}

impl KernelImpl for SoftmaxKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Softmax
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        for layout in [
            DataLayout::Bfyx,
            DataLayout::Yxfb,
            DataLayout::Bf,
            DataLayout::Fb,
        ] {
            k.enable_input_layout(layout);
            k.enable_output_layout(layout);
        }
        k.enable_softmax_dim(SoftmaxDim::X);
        k.enable_softmax_dim(SoftmaxDim::Y);
        k.enable_softmax_dim(SoftmaxDim::Feature);
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Softmax);
        validate_softmax(p)?;
        let input = &p.base.inputs[0];
        let (x, y, f, b) = (input.x().v, input.y().v, input.feature().v, input.batch().v);
        let (global, items) = match p.dim {
            SoftmaxDim::X => ([y, f, b], x),
            SoftmaxDim::Y => ([x, f, b], y),
            SoftmaxDim::Feature => ([x, y, b], f),
        };
        let mut jit = softmax_jit(p);
        jit.add("ITEMS_NUM", items);

        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Softmax,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local(global),
            arguments: standard_arguments(1, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}

/// Sub-group reduction over the feature axis of flat tensors.
pub struct SoftmaxKernelOpt1Dim;

impl SoftmaxKernelOpt1Dim {
    const NAME: &'static str = "softmax_gpu_items_class_optimized";
    const WORK_GROUP_SIZE: usize = 16;
}

impl KernelImpl for SoftmaxKernelOpt1Dim {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Softmax
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        k.enable_input_layout(DataLayout::Bf);
        k.enable_output_layout(DataLayout::Bf);
        k.enable_softmax_dim(SoftmaxDim::Feature);
        k.enable_tensor_offset();
        k.enable_batching();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Softmax);
        validate_softmax(p)?;
        let input = &p.base.inputs[0];
        let mut jit = softmax_jit(p);
        jit.add("ITEMS_NUM", input.feature().v);
        jit.add("LWS", Self::WORK_GROUP_SIZE);
        jit.add(
            "ITEMS_PER_WORK_ITEM",
            ceil_div(input.feature().v, Self::WORK_GROUP_SIZE),
        );

        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Softmax,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::new(
                [Self::WORK_GROUP_SIZE * input.batch().v, 1, 1],
                [Self::WORK_GROUP_SIZE, 1, 1],
            ),
            arguments: standard_arguments(1, false, false),
            estimated_time: priority::FORCE_PRIORITY_8,
        })?])
    }
}
