//! Standalone activation kernels.

use crate::dispatch::{ceil_div, WorkGroups};
use crate::jit::make_base_jit;
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, standard_arguments, PlanParts};
use crate::key::ParamsKey;
use crate::params::{ActivationParams, KernelType, OptionalParams, Params};
use crate::tensor::Datatype;

fn validate_activation(p: &ActivationParams) -> Result<(), KernelError> {
    let Some(input) = p.base.inputs.first() else {
        return Err(KernelError::invalid("activation expects an input"));
    };
    if input.logical_size() != p.base.output.logical_size() {
        return Err(KernelError::invalid(format!(
            "activation input has {} elements, output {}",
            input.logical_size(),
            p.base.output.logical_size()
        )));
    }
    if p.base.inputs.len() > 1 {
        let slopes = &p.base.inputs[1];
        if slopes.logical_size() != p.base.output.feature().v {
            return Err(KernelError::invalid(
                "activation parameters must hold one entry per feature",
            ));
        }
    }
    Ok(())
}

fn enable_float_types(k: &mut ParamsKey) {
    for dtype in [Datatype::F16, Datatype::F32] {
        k.enable_input_data_type(dtype);
        k.enable_output_data_type(dtype);
    }
}

/// Element-wise activation over any layout, optionally with per-feature
/// parameters supplied as a second input.
pub struct ActivationKernelRef;

impl ActivationKernelRef {
    const NAME: &'static str = "activation_gpu_ref";
}

impl KernelImpl for ActivationKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Activation
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_float_types(&mut k);
        k.enable_all_input_layout();
        k.enable_all_output_layout();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_activation_params_as_input();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Activation);
        validate_activation(p)?;
        let output = &p.base.output;
        let mut jit = make_base_jit(&p.base);
        if p.base.inputs.len() > 1 {
            jit.add("PARAMETERIZED", 1);
        }
        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Activation,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local([
                output.x().v,
                output.y().v,
                output.feature().v * output.batch().v,
            ]),
            arguments: standard_arguments(p.base.inputs.len() as u32, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}

/// Vectorized activation over dense buffers.
pub struct ActivationKernelOpt;

impl ActivationKernelOpt {
    const NAME: &'static str = "activation_gpu_opt";
    const NUM_COLS_WI: usize = 4;
}

impl KernelImpl for ActivationKernelOpt {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Activation
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_float_types(&mut k);
        k.enable_all_input_layout();
        k.enable_all_output_layout();
        k.enable_tensor_offset();
        k.enable_batching();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Activation);
        validate_activation(p)?;
        let total = p.base.output.logical_size();
        if total % Self::NUM_COLS_WI != 0 {
            return Err(KernelError::not_applicable(format!(
                "{total} elements do not split into vectors of {}",
                Self::NUM_COLS_WI
            )));
        }
        let mut jit = make_base_jit(&p.base);
        jit.add("NUM_COLS_WI", Self::NUM_COLS_WI);
        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Activation,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local([
                ceil_div(total, Self::NUM_COLS_WI),
                1,
                1,
            ]),
            arguments: standard_arguments(1, false, false),
            estimated_time: priority::FORCE_PRIORITY_6,
        })?])
    }
}
