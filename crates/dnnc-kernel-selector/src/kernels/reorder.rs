//! Data and weights reorders.

use crate::dispatch::{round_up, WorkGroups};
use crate::jit::{make_base_jit, make_weights_jit};
use crate::kernel::{priority, ArgumentDescriptor, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, standard_arguments, PlanParts};
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params, ReorderParams};

fn validate_reorder(p: &ReorderParams) -> Result<(), KernelError> {
    let [input] = p.base.inputs.as_slice() else {
        return Err(KernelError::invalid("reorder expects exactly one input"));
    };
    if input.logical_size() != p.base.output.logical_size() {
        return Err(KernelError::invalid(format!(
            "reorder cannot change the element count ({} -> {})",
            input.logical_size(),
            p.base.output.logical_size()
        )));
    }
    if !p.subtract_per_feature.is_empty()
        && p.subtract_per_feature.len() != input.feature().v
    {
        return Err(KernelError::invalid(
            "mean subtraction needs one value per feature",
        ));
    }
    Ok(())
}

fn enable_data_reorder_key(k: &mut ParamsKey) {
    k.enable_all_input_data_type();
    k.enable_all_output_data_type();
    k.enable_different_types();
    k.enable_all_input_layout();
    k.enable_all_output_layout();
    k.enable_tensor_offset();
    k.enable_tensor_pitches();
    k.enable_batching();
}

/// Index-by-index copy between any two layouts and types.
pub struct ReorderKernelRef;

impl ReorderKernelRef {
    const NAME: &'static str = "reorder_data";
}

impl KernelImpl for ReorderKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Reorder
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_data_reorder_key(&mut k);
        k.enable_reorder_subtract();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Reorder);
        validate_reorder(p)?;
        let input = &p.base.inputs[0];
        let mut jit = make_base_jit(&p.base);
        if !p.subtract_per_feature.is_empty() {
            let values: Vec<String> = p
                .subtract_per_feature
                .iter()
                .map(|v| v.to_string())
                .collect();
            jit.add("VALUE_TO_SUBTRACT", values.join(","));
        }
        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Reorder,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local([
                input.batch().v,
                input.feature().v,
                input.x().v * input.y().v,
            ]),
            arguments: standard_arguments(1, false, false),
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}

/// Flat copy with one work item per element; fast for single-batch tensors.
pub struct ReorderKernelFastB1;

impl ReorderKernelFastB1 {
    const NAME: &'static str = "reorder_data_fast_b1";
    const LOCAL_SIZE: usize = 32;
}

impl KernelImpl for ReorderKernelFastB1 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Reorder
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        enable_data_reorder_key(&mut k);
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Reorder);
        validate_reorder(p)?;
        let output = &p.base.output;
        let elements = output.logical_size();
        let mut jit = make_base_jit(&p.base);
        jit.add("ELEMENTS_COUNT", elements);

        let estimated_time = if output.batch().v == 1 {
            priority::FORCE_PRIORITY_6
        } else {
            priority::DONT_USE_IF_HAVE_SOMETHING_ELSE
        };
        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::Reorder,
            kernel_name: Self::NAME,
            layer_id: &p.base.layer_id,
            jit,
            work_groups: WorkGroups::new(
                [round_up(elements, Self::LOCAL_SIZE), 1, 1],
                [Self::LOCAL_SIZE, 1, 1],
            ),
            arguments: standard_arguments(1, false, false),
            estimated_time,
        })?])
    }
}

/// Converts weights between layouts and element types.
pub struct ReorderWeightsKernel;

impl ReorderWeightsKernel {
    const NAME: &'static str = "reorder_weights";
}

impl KernelImpl for ReorderWeightsKernel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::WeightsReorder
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        k.enable_all_input_weights_type();
        k.enable_all_output_weights_type();
        k.enable_all_input_weights_layout();
        k.enable_all_output_weights_layout();
        k.enable_different_types();
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, WeightsReorder);
        if p.input.logical_size() != p.output.logical_size() {
            return Err(KernelError::invalid(
                "weights reorder cannot change the element count",
            ));
        }
        let mut jit = make_weights_jit(&p.input, "INPUT0");
        jit.merge(make_weights_jit(&p.output, "OUTPUT"));
        Ok(vec![build_kernel_data(PlanParts {
            kernel_type: KernelType::WeightsReorder,
            kernel_name: Self::NAME,
            layer_id: &p.layer_id,
            jit,
            work_groups: WorkGroups::with_optimal_local([
                p.output.ofm,
                p.output.ifm,
                p.output.x * p.output.y,
            ]),
            arguments: vec![ArgumentDescriptor::Input(0), ArgumentDescriptor::Output],
            estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
        })?])
    }
}
