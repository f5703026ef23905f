//! Dispatch plans and the kernel implementation interface.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::WorkGroups;
use crate::hashing::source_fingerprint;
use crate::jit::JitConstants;
use crate::key::ParamsKey;
use crate::params::{KernelType, OptionalParams, Params};
use crate::tensor::WeightsTensor;

/// Estimated-time buckets. Lower wins.
pub mod priority {
    pub const FORCE_PRIORITY_1: f32 = 0.000_000_1;
    pub const FORCE_PRIORITY_2: f32 = 0.000_000_2;
    pub const FORCE_PRIORITY_3: f32 = 0.000_000_3;
    pub const FORCE_PRIORITY_4: f32 = 0.000_000_4;
    pub const FORCE_PRIORITY_5: f32 = 0.000_000_5;
    pub const FORCE_PRIORITY_6: f32 = 0.000_000_6;
    pub const FORCE_PRIORITY_7: f32 = 0.000_000_7;
    pub const FORCE_PRIORITY_8: f32 = 0.000_000_8;
    pub const FORCE_PRIORITY_9: f32 = 0.000_000_9;
    pub const DONT_USE_IF_HAVE_SOMETHING_ELSE: f32 = 1_000_000.0;
}

/// Recoverable, candidate-local failure. The selector skips the candidate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("not applicable: {0}")]
    NotApplicable(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl KernelError {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        KernelError::NotApplicable(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        KernelError::InvalidParams(reason.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentDescriptor {
    Input(u32),
    Output,
    Weights,
    Bias,
    Split,
}

/// Identity of the generated source for one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelString {
    pub entry_point: String,
    pub jit: JitConstants,
    pub source_id: u64,
}

impl KernelString {
    pub fn new(entry_point: impl Into<String>, jit: JitConstants) -> Self {
        let entry_point = entry_point.into();
        let source_id = source_fingerprint(&entry_point, jit.iter());
        Self {
            entry_point,
            jit,
            source_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClKernelData {
    pub kernel_string: KernelString,
    pub work_groups: WorkGroups,
    pub arguments: Vec<ArgumentDescriptor>,
    pub layer_id: String,
}

/// Weights layout the chosen kernel needs in place of the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightsReorderRequest {
    pub input: WeightsTensor,
    pub output: WeightsTensor,
}

/// Bound dispatch plan for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelData {
    pub kernel_type: KernelType,
    pub kernels: Vec<ClKernelData>,
    pub estimated_time: f32,
    pub run_time: Option<Duration>,
    /// `None` is the implementation's default configuration.
    pub auto_tune_index: Option<usize>,
    pub kernel_name: String,
    pub weights_reorder: Option<WeightsReorderRequest>,
}

impl KernelData {
    pub fn new(kernel_type: KernelType, kernel: ClKernelData, estimated_time: f32) -> Self {
        Self {
            kernel_type,
            kernels: vec![kernel],
            estimated_time,
            run_time: None,
            auto_tune_index: None,
            kernel_name: String::new(),
            weights_reorder: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

pub type KernelsData = Vec<KernelData>;

/// One concrete strategy for executing one kernel kind.
pub trait KernelImpl: Send + Sync {
    fn name(&self) -> &'static str;

    fn kernel_type(&self) -> KernelType;

    fn supported_key(&self) -> ParamsKey;

    /// Builds the default dispatch plan.
    fn kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError>;

    fn supports_tuning(&self) -> bool {
        false
    }

    /// Plan for one tuning variant; `None` asks for the default plan.
    fn tuned_kernels_data(
        &self,
        params: &Params,
        options: &OptionalParams,
        index: Option<usize>,
    ) -> Result<KernelsData, KernelError> {
        match index {
            None => self.kernels_data(params, options),
            Some(index) => Err(KernelError::not_applicable(format!(
                "{} has no tuning variant {index}",
                self.name()
            ))),
        }
    }

    /// Every variant worth measuring, each tagged with its tuning index.
    fn kernels_data_for_auto_tune(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        self.kernels_data(params, options)
    }
}
