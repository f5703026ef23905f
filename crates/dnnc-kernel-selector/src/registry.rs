use std::collections::HashMap;
use std::sync::Arc;

use crate::kernel::KernelImpl;
use crate::kernels::builtin_implementations;
use crate::params::KernelType;

/// Implementations grouped by the kernel kind they serve, in registration
/// order. Registration order breaks cost ties during selection.
#[derive(Clone, Default)]
pub struct ImplementationRegistry {
    by_kind: HashMap<KernelType, Vec<Arc<dyn KernelImpl>>>,
}

impl ImplementationRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for implementation in builtin_implementations() {
            registry.register(implementation);
        }
        registry
    }

    pub fn register(&mut self, implementation: Arc<dyn KernelImpl>) {
        self.by_kind
            .entry(implementation.kernel_type())
            .or_default()
            .push(implementation);
    }

    pub fn implementations(&self, kind: KernelType) -> &[Arc<dyn KernelImpl>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, kind: KernelType, name: &str) -> Option<&Arc<dyn KernelImpl>> {
        self.implementations(kind)
            .iter()
            .find(|candidate| candidate.name() == name)
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ImplementationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(&str, &str)> = self
            .by_kind
            .iter()
            .flat_map(|(kind, impls)| impls.iter().map(move |i| (kind.as_str(), i.name())))
            .collect();
        names.sort_unstable();
        f.debug_struct("ImplementationRegistry")
            .field("implementations", &names)
            .finish()
    }
}
