//! Capability matching and kernel selection.
//!
//! Requests describe one node as a [`Params`] value. The [`KernelSelector`]
//! filters the registered [`KernelImpl`]s by [`ParamsKey`] coverage, asks the
//! survivors for dispatch plans and keeps the cheapest one, optionally
//! measuring candidates and remembering winners in a [`TuningCache`].

pub mod dispatch;
pub mod engine;
pub mod error;
mod hashing;
pub mod jit;
pub mod kernel;
pub mod kernels;
pub mod key;
pub mod offline;
pub mod overrides;
pub mod params;
pub mod registry;
pub mod selector;
pub mod tensor;
pub mod tuning;

pub use dispatch::WorkGroups;
pub use engine::EngineInfo;
pub use error::SelectorError;
pub use kernel::{
    priority, ArgumentDescriptor, ClKernelData, KernelData, KernelError, KernelImpl, KernelsData,
    WeightsReorderRequest,
};
pub use key::ParamsKey;
pub use offline::OfflineTuningTable;
pub use overrides::KernelOverrides;
pub use params::{KernelType, OptionalParams, Params};
pub use registry::ImplementationRegistry;
pub use selector::KernelSelector;
pub use tensor::{Channel, DataLayout, DataTensor, Datatype, Pad, WeightsLayout, WeightsTensor, WeightsType};
pub use tuning::{KernelRunner, TuningCache, TuningConfig, TuningEntry, TuningMode};
