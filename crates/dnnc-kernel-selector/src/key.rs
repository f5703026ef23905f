//! Capability keys.
//!
//! A [`ParamsKey`] is a set of feature flags. Requests build one from their
//! parameters; implementations advertise one describing everything they can
//! handle. Selection keeps a candidate only when its key covers every flag the
//! request sets.

use crate::params::{ConcatAxis, KernelDividerMode, PoolRemainder, PoolType, SoftmaxDim};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

mod restrict {
    pub const INPUT_F16: u64 = 1 << 0;
    pub const INPUT_F32: u64 = 1 << 1;
    pub const INPUT_INT8: u64 = 1 << 2;
    pub const INPUT_UINT8: u64 = 1 << 3;
    pub const OUTPUT_F16: u64 = 1 << 4;
    pub const OUTPUT_F32: u64 = 1 << 5;
    pub const OUTPUT_INT8: u64 = 1 << 6;
    pub const OUTPUT_UINT8: u64 = 1 << 7;
    pub const INPUT_WEIGHTS_F16: u64 = 1 << 8;
    pub const INPUT_WEIGHTS_F32: u64 = 1 << 9;
    pub const INPUT_WEIGHTS_INT8: u64 = 1 << 10;
    pub const OUTPUT_WEIGHTS_F16: u64 = 1 << 11;
    pub const OUTPUT_WEIGHTS_F32: u64 = 1 << 12;
    pub const OUTPUT_WEIGHTS_INT8: u64 = 1 << 13;
    pub const DIFFERENT_TYPES: u64 = 1 << 14;
    pub const OFFSET: u64 = 1 << 15;
    pub const PITCHES: u64 = 1 << 16;
    pub const BATCHING: u64 = 1 << 17;
    pub const BIAS_PER_FEATURE: u64 = 1 << 18;
    pub const BIAS_PER_OUTPUT: u64 = 1 << 19;
    pub const NON_BIAS: u64 = 1 << 20;
    pub const ACTIVATION_PARAMS_AS_INPUT: u64 = 1 << 21;
}

mod dedicated {
    pub const POOL_MAX: u64 = 1 << 0;
    pub const POOL_AVG: u64 = 1 << 1;
    pub const POOL_FLOOR: u64 = 1 << 2;
    pub const POOL_CEIL: u64 = 1 << 3;
    pub const POOL_FIXED_DIVIDER: u64 = 1 << 4;
    pub const POOL_DYNAMIC_DIVIDER: u64 = 1 << 5;
    pub const CONV_SPLIT: u64 = 1 << 6;
    pub const CONV_DILATION: u64 = 1 << 7;
    pub const SOFTMAX_DIM_X: u64 = 1 << 8;
    pub const SOFTMAX_DIM_Y: u64 = 1 << 9;
    pub const SOFTMAX_DIM_FEATURE: u64 = 1 << 10;
    pub const CONCAT_AXIS_X: u64 = 1 << 11;
    pub const CONCAT_AXIS_Y: u64 = 1 << 12;
    pub const CONCAT_AXIS_FEATURE: u64 = 1 << 13;
    pub const CONCAT_AXIS_BATCH: u64 = 1 << 14;
    pub const ELTWISE_COEFFICIENTS: u64 = 1 << 15;
    pub const REORDER_SUBTRACT: u64 = 1 << 16;
}

mod machine {
    pub const SUBGROUPS: u32 = 1 << 0;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ParamsKey {
    restrict: u64,
    dedicated: u64,
    machine: u32,
    input_layout: u32,
    output_layout: u32,
    input_weights_layout: u32,
    output_weights_layout: u32,
}

impl ParamsKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of both keys' flags.
    pub fn merge(&self, other: &ParamsKey) -> ParamsKey {
        ParamsKey {
            restrict: self.restrict | other.restrict,
            dedicated: self.dedicated | other.dedicated,
            machine: self.machine | other.machine,
            input_layout: self.input_layout | other.input_layout,
            output_layout: self.output_layout | other.output_layout,
            input_weights_layout: self.input_weights_layout | other.input_weights_layout,
            output_weights_layout: self.output_weights_layout | other.output_weights_layout,
        }
    }

    /// Returns true when every flag set in `required` is also set in `self`.
    pub fn supports(&self, required: &ParamsKey) -> bool {
        fn covers<T>(have: T, need: T) -> bool
        where
            T: std::ops::BitAnd<Output = T> + std::ops::Not<Output = T> + PartialEq + Default,
        {
            (need & !have) == T::default()
        }

        covers(self.restrict, required.restrict)
            && covers(self.dedicated, required.dedicated)
            && covers(self.machine, required.machine)
            && covers(self.input_layout, required.input_layout)
            && covers(self.output_layout, required.output_layout)
            && covers(self.input_weights_layout, required.input_weights_layout)
            && covers(self.output_weights_layout, required.output_weights_layout)
    }

    pub fn enable_input_data_type(&mut self, dtype: Datatype) {
        self.restrict |= match dtype {
            Datatype::F16 => restrict::INPUT_F16,
            Datatype::F32 => restrict::INPUT_F32,
            Datatype::Int8 => restrict::INPUT_INT8,
            Datatype::Uint8 => restrict::INPUT_UINT8,
        };
    }

    pub fn enable_all_input_data_type(&mut self) {
        self.restrict |= restrict::INPUT_F16
            | restrict::INPUT_F32
            | restrict::INPUT_INT8
            | restrict::INPUT_UINT8;
    }

    pub fn enable_output_data_type(&mut self, dtype: Datatype) {
        self.restrict |= match dtype {
            Datatype::F16 => restrict::OUTPUT_F16,
            Datatype::F32 => restrict::OUTPUT_F32,
            Datatype::Int8 => restrict::OUTPUT_INT8,
            Datatype::Uint8 => restrict::OUTPUT_UINT8,
        };
    }

    pub fn enable_all_output_data_type(&mut self) {
        self.restrict |= restrict::OUTPUT_F16
            | restrict::OUTPUT_F32
            | restrict::OUTPUT_INT8
            | restrict::OUTPUT_UINT8;
    }

    pub fn enable_input_weights_type(&mut self, wtype: WeightsType) {
        self.restrict |= match wtype {
            WeightsType::F16 => restrict::INPUT_WEIGHTS_F16,
            WeightsType::F32 => restrict::INPUT_WEIGHTS_F32,
            WeightsType::Int8 => restrict::INPUT_WEIGHTS_INT8,
        };
    }

    pub fn enable_all_input_weights_type(&mut self) {
        self.restrict |= restrict::INPUT_WEIGHTS_F16
            | restrict::INPUT_WEIGHTS_F32
            | restrict::INPUT_WEIGHTS_INT8;
    }

    pub fn enable_output_weights_type(&mut self, wtype: WeightsType) {
        self.restrict |= match wtype {
            WeightsType::F16 => restrict::OUTPUT_WEIGHTS_F16,
            WeightsType::F32 => restrict::OUTPUT_WEIGHTS_F32,
            WeightsType::Int8 => restrict::OUTPUT_WEIGHTS_INT8,
        };
    }

    pub fn enable_all_output_weights_type(&mut self) {
        self.restrict |= restrict::OUTPUT_WEIGHTS_F16
            | restrict::OUTPUT_WEIGHTS_F32
            | restrict::OUTPUT_WEIGHTS_INT8;
    }

    pub fn enable_different_types(&mut self) {
        self.restrict |= restrict::DIFFERENT_TYPES;
    }

    pub fn enable_tensor_offset(&mut self) {
        self.restrict |= restrict::OFFSET;
    }

    pub fn enable_tensor_pitches(&mut self) {
        self.restrict |= restrict::PITCHES;
    }

    pub fn enable_batching(&mut self) {
        self.restrict |= restrict::BATCHING;
    }

    pub fn enable_bias_per_feature(&mut self) {
        self.restrict |= restrict::BIAS_PER_FEATURE;
    }

    pub fn enable_bias_per_output(&mut self) {
        self.restrict |= restrict::BIAS_PER_OUTPUT;
    }

    pub fn enable_non_bias(&mut self) {
        self.restrict |= restrict::NON_BIAS;
    }

    pub fn enable_activation_params_as_input(&mut self) {
        self.restrict |= restrict::ACTIVATION_PARAMS_AS_INPUT;
    }

    pub fn enable_split_support(&mut self) {
        self.dedicated |= dedicated::CONV_SPLIT;
    }

    pub fn enable_dilation(&mut self) {
        self.dedicated |= dedicated::CONV_DILATION;
    }

    pub fn enable_pool_type(&mut self, pool: PoolType) {
        self.dedicated |= match pool {
            PoolType::Max => dedicated::POOL_MAX,
            PoolType::Average => dedicated::POOL_AVG,
        };
    }

    pub fn enable_pool_remainder(&mut self, remainder: PoolRemainder) {
        self.dedicated |= match remainder {
            PoolRemainder::Floor => dedicated::POOL_FLOOR,
            PoolRemainder::Ceil => dedicated::POOL_CEIL,
        };
    }

    pub fn enable_pool_kernel_divider(&mut self, divider: KernelDividerMode) {
        self.dedicated |= match divider {
            KernelDividerMode::Fixed => dedicated::POOL_FIXED_DIVIDER,
            KernelDividerMode::DynamicWithPadding => dedicated::POOL_DYNAMIC_DIVIDER,
        };
    }

    pub fn enable_softmax_dim(&mut self, dim: SoftmaxDim) {
        self.dedicated |= match dim {
            SoftmaxDim::X => dedicated::SOFTMAX_DIM_X,
            SoftmaxDim::Y => dedicated::SOFTMAX_DIM_Y,
            SoftmaxDim::Feature => dedicated::SOFTMAX_DIM_FEATURE,
        };
    }

    pub fn enable_concat_axis(&mut self, axis: ConcatAxis) {
        self.dedicated |= match axis {
            ConcatAxis::X => dedicated::CONCAT_AXIS_X,
            ConcatAxis::Y => dedicated::CONCAT_AXIS_Y,
            ConcatAxis::Feature => dedicated::CONCAT_AXIS_FEATURE,
            ConcatAxis::Batch => dedicated::CONCAT_AXIS_BATCH,
        };
    }

    pub fn enable_eltwise_coefficients(&mut self) {
        self.dedicated |= dedicated::ELTWISE_COEFFICIENTS;
    }

    pub fn enable_reorder_subtract(&mut self) {
        self.dedicated |= dedicated::REORDER_SUBTRACT;
    }

    pub fn require_subgroups(&mut self) {
        self.machine |= machine::SUBGROUPS;
    }

    pub fn needs_subgroups(&self) -> bool {
        self.machine & machine::SUBGROUPS != 0
    }

    pub fn enable_input_layout(&mut self, layout: DataLayout) {
        self.input_layout |= layout.bit();
    }

    pub fn enable_all_input_layout(&mut self) {
        for layout in DataLayout::ALL {
            self.enable_input_layout(layout);
        }
    }

    pub fn enable_output_layout(&mut self, layout: DataLayout) {
        self.output_layout |= layout.bit();
    }

    pub fn enable_all_output_layout(&mut self) {
        for layout in DataLayout::ALL {
            self.enable_output_layout(layout);
        }
    }

    pub fn enable_input_weights_layout(&mut self, layout: WeightsLayout) {
        self.input_weights_layout |= layout.bit();
    }

    pub fn enable_all_input_weights_layout(&mut self) {
        for layout in WeightsLayout::ALL {
            self.enable_input_weights_layout(layout);
        }
    }

    pub fn enable_output_weights_layout(&mut self, layout: WeightsLayout) {
        self.output_weights_layout |= layout.bit();
    }

    pub fn enable_all_output_weights_layout(&mut self) {
        for layout in WeightsLayout::ALL {
            self.enable_output_weights_layout(layout);
        }
    }

    /// Drops the input weights layout requirement. Used when the caller may
    /// insert a weights reorder in front of the chosen kernel.
    pub fn clear_input_weights_layout(&mut self) {
        self.input_weights_layout = 0;
    }

    pub fn is_empty(&self) -> bool {
        *self == ParamsKey::default()
    }
}
