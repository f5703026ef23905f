//! Graph compiler for neural-network topologies.
//!
//! A [`Topology`] of [`PrimitiveDesc`]s is built into a [`Program`] graph,
//! rewritten by the pass pipeline (trimming, fusion, layout reorders, padding,
//! constant folding) and every executing node is bound to a dispatch plan
//! from the kernel selector.

pub mod compiler;
pub mod constant;
mod env;
pub mod error;
pub mod kernel_params;
pub mod layout;
pub mod layout_optimizer;
pub mod passes;
pub mod pipeline;
pub mod primitives;
pub mod program;
pub mod topology;

pub use dnnc_kernel_selector as kernel_selector;

pub use compiler::{BuildOptions, CompiledProgram, Compiler};
pub use constant::{ConstantEvaluator, ConstantValue};
pub use error::CompileError;
pub use layout::{DataType, Format, Layout, Padding, Shape};
pub use layout_optimizer::{DataKind, LayoutOptimizer, ReorderDecision};
pub use primitives::{HostData, PrimitiveDesc, PrimitiveId, PrimitiveKind, PrimitiveType};
pub use program::{PrimitiveTypeOps, PrimitiveTypeRegistry, Program, ProgramNode};
pub use topology::Topology;
