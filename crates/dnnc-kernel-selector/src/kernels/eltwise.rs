use crate::dispatch::WorkGroups;
use crate::jit::make_base_jit;
use crate::kernel::{priority, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, standard_arguments, PlanParts};
use crate::key::ParamsKey;
use crate::params::{EltwiseMode, KernelType, OptionalParams, Params};
use crate::tensor::Datatype;

/// Element-wise combination of two or more equally shaped inputs.
pub struct EltwiseKernelRef;

impl EltwiseKernelRef {
    const NAME: &'static str = "eltwise_gpu_ref";
}

impl KernelImpl for EltwiseKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Eltwise
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32, Datatype::Int8, Datatype::Uint8] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        k.enable_different_types();
        k.enable_all_input_layout();
        k.enable_all_output_layout();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        k.enable_eltwise_coefficients();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Eltwise);
        let inputs = &p.base.inputs;
        let output = &p.base.output;
        if inputs.len() < 2 {
            return Err(KernelError::invalid("eltwise needs at least two inputs"));
        }
        if let Some(mismatch) = inputs
            .iter()
            .find(|input| input.logical_size() != output.logical_size())
        {
            return Err(KernelError::invalid(format!(
                "eltwise input with {} elements does not match output with {}",
                mismatch.logical_size(),
                output.logical_size()
            )));
        }
        if !p.coefficients.is_empty() && p.coefficients.len() != inputs.len() {
            return Err(KernelError::invalid(
                "eltwise needs one coefficient per input",
            ));
        }

        let mut jit = make_base_jit(&p.base);
        jit.add(
            "ELTWISE_MODE",
            match p.mode {
                EltwiseMode::Sum => "SUM",
                EltwiseMode::Sub => "SUB",
                EltwiseMode::Prod => "PROD",
                EltwiseMode::Max => "MAX",
                EltwiseMode::Min => "MIN",
            },
        );
        for (idx, coefficient) in p.coefficients.iter().enumerate() {
            jit.add(format!("INPUT{idx}_COEFF"), coefficient);
        }

        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Eltwise,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local([
                output.x().v,
                output.y().v,
                output.feature().v * output.batch().v,
            ]),
            arguments: standard_arguments(inputs.len() as u32, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}
