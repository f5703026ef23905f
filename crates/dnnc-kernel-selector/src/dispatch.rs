use serde::{Deserialize, Serialize};

const MAX_LOCAL_WORK_GROUP: usize = 256;
const OPTIMAL_LWS_VALUES: [usize; 17] = [
    256, 224, 192, 160, 128, 96, 64, 32, 16, 8, 7, 6, 5, 4, 3, 2, 1,
];

/// Global and local work sizes of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkGroups {
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl WorkGroups {
    pub fn new(global: [usize; 3], local: [usize; 3]) -> Self {
        Self { global, local }
    }

    /// Global sizes with the local sizes picked by [`optimal_lws`].
    pub fn with_optimal_local(global: [usize; 3]) -> Self {
        Self {
            global,
            local: optimal_lws(global),
        }
    }

    pub fn total_work_items(&self) -> usize {
        self.global.iter().product()
    }
}

pub fn ceil_div(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor.max(1))
}

pub fn round_up(value: usize, multiple: usize) -> usize {
    ceil_div(value, multiple) * multiple.max(1)
}

/// Largest local size per dimension that divides the global size while the
/// product stays within the device work-group limit.
pub fn optimal_lws(global: [usize; 3]) -> [usize; 3] {
    let mut local = [1usize; 3];
    let mut total = 1usize;
    for (dim, gws) in global.iter().enumerate() {
        let rest = MAX_LOCAL_WORK_GROUP / total;
        let pick = OPTIMAL_LWS_VALUES
            .iter()
            .copied()
            .filter(|candidate| *candidate <= rest)
            .find(|candidate| *gws % *candidate == 0)
            .unwrap_or(1);
        local[dim] = pick;
        total *= pick;
    }
    local
}
