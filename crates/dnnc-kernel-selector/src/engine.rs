use serde::{Deserialize, Serialize};

use crate::key::ParamsKey;

/// Device capabilities the selector filters candidates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineInfo {
    pub compute_units: u32,
    pub supports_subgroups: bool,
    pub supports_fp16: bool,
    pub max_work_group_size: usize,
}

impl EngineInfo {
    /// True when the device provides every machine feature `key` asks for.
    pub fn can_run(&self, key: &ParamsKey) -> bool {
        !key.needs_subgroups() || self.supports_subgroups
    }
}

impl Default for EngineInfo {
    fn default() -> Self {
        Self {
            compute_units: 24,
            supports_subgroups: true,
            supports_fp16: true,
            max_work_group_size: 256,
        }
    }
}
