//! Force/deny lists applied ahead of cost comparison.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelOverrides {
    force: BTreeSet<String>,
    deny: BTreeSet<String>,
}

/// Splits a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl KernelOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force(mut self, name: impl Into<String>) -> Self {
        self.force.insert(name.into());
        self
    }

    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.deny.insert(name.into());
        self
    }

    pub fn is_forced(&self, name: &str) -> bool {
        self.force.contains(name)
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.deny.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.force.is_empty() && self.deny.is_empty()
    }

    /// Reads `DNNC_FORCE_KERNELS` and `DNNC_DENY_KERNELS`.
    #[cfg(feature = "env-overrides")]
    pub fn from_env() -> Self {
        let read = |var: &str| {
            std::env::var(var)
                .map(|value| parse_list(&value))
                .unwrap_or_default()
        };
        let overrides = Self {
            force: read("DNNC_FORCE_KERNELS"),
            deny: read("DNNC_DENY_KERNELS"),
        };
        if !overrides.is_empty() {
            tracing::info!(force = ?overrides.force, deny = ?overrides.deny, "kernel overrides from environment");
        }
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parsing_trims_and_skips_blanks() {
        let names = parse_list(" a, b ,,c ");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
