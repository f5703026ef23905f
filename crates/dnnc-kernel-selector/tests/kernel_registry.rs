use std::collections::HashSet;

use dnnc_kernel_selector::kernels::builtin_implementations;
use dnnc_kernel_selector::{ImplementationRegistry, KernelType};

const ALL_KINDS: [KernelType; 12] = [
    KernelType::Convolution,
    KernelType::FullyConnected,
    KernelType::Pooling,
    KernelType::Activation,
    KernelType::Eltwise,
    KernelType::Reorder,
    KernelType::WeightsReorder,
    KernelType::Softmax,
    KernelType::Concatenation,
    KernelType::BatchNorm,
    KernelType::Scale,
    KernelType::FusedConvBnScale,
];

#[test]
fn builtin_implementations_have_unique_names() {
    let implementations = builtin_implementations();
    assert!(!implementations.is_empty(), "builtin registry is empty");

    let mut names = HashSet::new();
    for implementation in &implementations {
        assert!(
            names.insert(implementation.name()),
            "duplicate implementation name: {}",
            implementation.name()
        );
    }
}

#[test]
fn every_kind_has_an_implementation() {
    let registry = ImplementationRegistry::builtin();
    for kind in ALL_KINDS {
        assert!(
            !registry.implementations(kind).is_empty(),
            "no implementation registered for {}",
            kind.as_str()
        );
    }
    assert_eq!(registry.len(), builtin_implementations().len());
}

#[test]
fn registry_keeps_registration_order_per_kind() {
    let registry = ImplementationRegistry::builtin();
    let names: Vec<&str> = registry
        .implementations(KernelType::Convolution)
        .iter()
        .map(|implementation| implementation.name())
        .collect();
    assert_eq!(names.first(), Some(&"convolution_gpu_ref"));
    assert!(registry
        .find(KernelType::Convolution, "convolution_gpu_bfyx_os_iyx_osv16")
        .is_some());
    assert!(registry
        .find(KernelType::Pooling, "convolution_gpu_bfyx_os_iyx_osv16")
        .is_none());
}

#[test]
fn builtin_keys_are_not_empty() {
    for implementation in builtin_implementations() {
        assert!(
            !implementation.supported_key().is_empty(),
            "{} advertises an empty key",
            implementation.name()
        );
    }
}
