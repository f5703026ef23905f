pub mod cpu;

pub use cpu::{apply_activation, is_addressable, pack, unpack, HostTensor, RefCpuEvaluator};
