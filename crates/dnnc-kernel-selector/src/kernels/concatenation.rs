use crate::dispatch::WorkGroups;
use crate::jit::make_base_jit;
use crate::kernel::{priority, ArgumentDescriptor, KernelData, KernelError, KernelImpl, KernelsData};
use crate::kernels::{build_kernel_data, expect_params, PlanParts};
use crate::key::ParamsKey;
use crate::params::{BaseParams, ConcatAxis, KernelType, OptionalParams, Params};
use crate::tensor::{Channel, Datatype};

fn axis_channel(axis: ConcatAxis) -> Channel {
    match axis {
        ConcatAxis::X => Channel::X,
        ConcatAxis::Y => Channel::Y,
        ConcatAxis::Feature => Channel::Feature,
        ConcatAxis::Batch => Channel::Batch,
    }
}

/// Copies every input into its slice of the output, one launch per input.
pub struct ConcatenationKernelRef;

impl ConcatenationKernelRef {
    const NAME: &'static str = "concatenation_gpu_ref";
}

impl KernelImpl for ConcatenationKernelRef {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Concatenation
    }

    fn supported_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        for dtype in [Datatype::F16, Datatype::F32] {
            k.enable_input_data_type(dtype);
            k.enable_output_data_type(dtype);
        }
        k.enable_all_input_layout();
        k.enable_all_output_layout();
        k.enable_tensor_offset();
        k.enable_tensor_pitches();
        k.enable_batching();
        for axis in [
            ConcatAxis::X,
            ConcatAxis::Y,
            ConcatAxis::Feature,
            ConcatAxis::Batch,
        ] {
            k.enable_concat_axis(axis);
        }
        k
    }

    fn kernels_data(
        &self,
        params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        let p = expect_params!(params, Concatenation);
        if p.base.inputs.is_empty() {
            return Err(KernelError::invalid("concatenation needs inputs"));
        }
        if !p.base.activation.is_none() {
            return Err(KernelError::not_applicable(
                "concatenation cannot apply a fused activation",
            ));
        }

        let axis = axis_channel(p.axis);
        let output = &p.base.output;
        let mut along_axis = 0usize;
        for input in &p.base.inputs {
            for channel in [Channel::X, Channel::Y, Channel::Feature, Channel::Batch] {
                if channel != axis && input.dim(channel).v != output.dim(channel).v {
                    return Err(KernelError::invalid(format!(
                        "input {channel:?} extent {} differs from output {}",
                        input.dim(channel).v,
                        output.dim(channel).v
                    )));
                }
            }
            along_axis += input.dim(axis).v;
        }
        if along_axis != output.dim(axis).v {
            return Err(KernelError::invalid(format!(
                "inputs cover {along_axis} along {axis:?}, output has {}",
                output.dim(axis).v
            )));
        }

        let mut result: Option<KernelData> = None;
        let mut offset = 0usize;
        for (idx, input) in p.base.inputs.iter().enumerate() {
            let part = BaseParams::new(p.base.layer_id.clone(), vec![input.clone()], output.clone());
            let mut jit = make_base_jit(&part);
            jit.add("CONCAT_AXIS", format!("{axis:?}").to_uppercase());
            jit.add("OUTPUT_AXIS_OFFSET", offset);
            offset += input.dim(axis).v;

            let layer_id = format!("{}_{idx}", p.base.layer_id);
            let mut kd = build_kernel_data(PlanParts {
                kernel_type: KernelType::Concatenation,
                kernel_name: Self::NAME,
                layer_id: &layer_id,
                jit,
                work_groups: WorkGroups::with_optimal_local([
                    input.x().v * input.y().v,
                    input.feature().v,
                    input.batch().v,
                ]),
                arguments: vec![ArgumentDescriptor::Input(idx as u32), ArgumentDescriptor::Output],
                estimated_time: priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
            })?;
            match result.as_mut() {
                Some(first) => first.kernels.append(&mut kd.kernels),
                None => result = Some(kd),
            }
        }

        result
            .map(|kd| vec![kd])
            .ok_or_else(|| KernelError::invalid("concatenation produced no kernels"))
    }
}
