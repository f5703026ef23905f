mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{activation_request, key_for, StubKernel};
use dnnc_kernel_selector::params::{
    BaseParams, ConvolutionParams, FullyConnectedParams, Size2, WeightBiasParams,
};
use dnnc_kernel_selector::{
    DataLayout, DataTensor, Datatype, EngineInfo, ImplementationRegistry, KernelOverrides,
    KernelSelector, OptionalParams, Params, SelectorError, WeightsLayout, WeightsTensor,
    WeightsType,
};

fn selector_with(kernels: Vec<Arc<StubKernel>>) -> KernelSelector {
    let mut registry = ImplementationRegistry::empty();
    for kernel in kernels {
        registry.register(kernel);
    }
    KernelSelector::new(EngineInfo::default())
        .with_registry(registry)
        .with_overrides(KernelOverrides::new())
}

fn fully_connected(batch: usize) -> Params {
    let input = DataTensor::new(Datatype::F32, DataLayout::Bfyx, batch, 64, 1, 1);
    let output = DataTensor::new(Datatype::F32, DataLayout::Bf, batch, 32, 1, 1);
    Params::FullyConnected(FullyConnectedParams {
        base: BaseParams::new("fc1", vec![input], output),
        weight_bias: WeightBiasParams {
            weights: WeightsTensor {
                wtype: WeightsType::F32,
                layout: WeightsLayout::Oiyx,
                ofm: 32,
                ifm: 64,
                x: 1,
                y: 1,
            },
            bias: vec![DataTensor::new(Datatype::F32, DataLayout::Bf, 1, 32, 1, 1)],
        },
    })
}

fn convolution(filter: usize, padding: usize) -> Params {
    let input = DataTensor::new(Datatype::F32, DataLayout::Bfyx, 1, 16, 8, 8);
    let output = DataTensor::new(Datatype::F32, DataLayout::Bfyx, 1, 32, 8, 8);
    Params::Convolution(ConvolutionParams {
        base: BaseParams::new("conv1", vec![input], output),
        weight_bias: WeightBiasParams {
            weights: WeightsTensor {
                wtype: WeightsType::F32,
                layout: WeightsLayout::Oiyx,
                ofm: 32,
                ifm: 16,
                x: filter,
                y: filter,
            },
            bias: Vec::new(),
        },
        filter_size: Size2::new(filter, filter),
        stride: Size2::ONE,
        dilation: Size2::ONE,
        padding: Size2::new(padding, padding),
        split: 1,
    })
}

fn allow_reorder() -> OptionalParams {
    OptionalParams {
        allow_weights_reorder: true,
        ..OptionalParams::default()
    }
}

#[test]
fn selection_skips_implementations_whose_key_does_not_cover_the_request() {
    let covering = Arc::new(StubKernel::new("k1", key_for(&[Datatype::F32]), 5.0));
    let narrow = Arc::new(StubKernel::new("k2", key_for(&[Datatype::F16]), 1.0));
    let selector = selector_with(vec![narrow.clone(), covering.clone()]);

    let chosen = selector
        .select_naive(&activation_request(Datatype::F32), &OptionalParams::default())
        .expect("k1 covers the request");
    assert_eq!(chosen.kernel_name, "k1");
    assert_eq!(narrow.default_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failing_candidate_is_skipped_not_fatal() {
    let key = key_for(&[Datatype::F32]);
    let broken = Arc::new(StubKernel::new("cheap_but_broken", key, 0.1).failing());
    let fallback = Arc::new(StubKernel::new("fallback", key, 9.0));
    let selector = selector_with(vec![broken.clone(), fallback]);

    let chosen = selector
        .select_naive(&activation_request(Datatype::F32), &OptionalParams::default())
        .expect("fallback must be chosen");
    assert_eq!(chosen.kernel_name, "fallback");
    assert_eq!(broken.default_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn lowest_cost_wins_and_ties_keep_registration_order() {
    let key = key_for(&[Datatype::F32]);
    let selector = selector_with(vec![
        Arc::new(StubKernel::new("slow", key, 3.0)),
        Arc::new(StubKernel::new("first_fast", key, 1.0)),
        Arc::new(StubKernel::new("second_fast", key, 1.0)),
    ]);
    let request = activation_request(Datatype::F32);

    for _ in 0..3 {
        let chosen = selector
            .select_naive(&request, &OptionalParams::default())
            .expect("selection");
        assert_eq!(chosen.kernel_name, "first_fast");
    }
}

#[test]
fn no_matching_implementation_is_fatal() {
    let selector = selector_with(vec![Arc::new(StubKernel::new(
        "f16_only",
        key_for(&[Datatype::F16]),
        1.0,
    ))]);
    let err = selector
        .select_naive(&activation_request(Datatype::F32), &OptionalParams::default())
        .expect_err("nothing covers f32");
    match err {
        SelectorError::NoImplementation { kind, layer_id } => {
            assert_eq!(kind, "activation");
            assert_eq!(layer_id, "relu1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn forced_and_denied_names_override_cost() {
    let key = key_for(&[Datatype::F32]);
    let kernels = || {
        vec![
            Arc::new(StubKernel::new("cheap", key, 1.0)),
            Arc::new(StubKernel::new("middle", key, 2.0)),
            Arc::new(StubKernel::new("expensive", key, 3.0)),
        ]
    };
    let request = activation_request(Datatype::F32);

    let forced = selector_with(kernels()).with_overrides(KernelOverrides::new().force("expensive"));
    let chosen = forced
        .select_naive(&request, &OptionalParams::default())
        .expect("forced selection");
    assert_eq!(chosen.kernel_name, "expensive");

    let denied = selector_with(kernels()).with_overrides(KernelOverrides::new().deny("cheap"));
    let chosen = denied
        .select_naive(&request, &OptionalParams::default())
        .expect("denied selection");
    assert_eq!(chosen.kernel_name, "middle");
}

#[test]
fn half_precision_needs_device_support() {
    let engine = EngineInfo {
        supports_fp16: false,
        ..EngineInfo::default()
    };
    let selector = KernelSelector::new(engine).with_overrides(KernelOverrides::new());
    let err = selector
        .select_naive(&activation_request(Datatype::F16), &OptionalParams::default())
        .expect_err("fp16 is unsupported");
    assert!(matches!(err, SelectorError::TypeMismatch { .. }), "{err}");
}

#[test]
fn builtin_activation_prefers_the_vectorized_kernel() {
    let selector = KernelSelector::new(EngineInfo::default()).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&activation_request(Datatype::F32), &OptionalParams::default())
        .expect("activation kernel");
    assert_eq!(chosen.kernel_name, "activation_gpu_opt");
    assert_eq!(chosen.kernels[0].work_groups.global, [32, 1, 1]);
}

#[test]
fn fully_connected_uses_gemm_without_weights_reorder() {
    let selector = KernelSelector::new(EngineInfo::default()).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&fully_connected(1), &OptionalParams::default())
        .expect("fully connected kernel");
    assert_eq!(chosen.kernel_name, "fully_connected_gpu_gemm");
    assert!(chosen.weights_reorder.is_none());

    let batched = selector
        .select(&fully_connected(2), &OptionalParams::default())
        .expect("batched fully connected kernel");
    assert_eq!(batched.kernel_name, "fully_connected_gpu_gemm");
}

#[test]
fn fully_connected_requests_blocked_weights_when_allowed() {
    let selector = KernelSelector::new(EngineInfo::default()).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&fully_connected(1), &allow_reorder())
        .expect("fully connected kernel");
    assert_eq!(chosen.kernel_name, "fully_connected_gpu_bs_f_bsv16_b1");
    let reorder = chosen.weights_reorder.expect("weights reorder request");
    assert_eq!(reorder.input.layout, WeightsLayout::Oiyx);
    assert_eq!(reorder.output.layout, WeightsLayout::OsIOsv16);
}

#[test]
fn subgroup_kernels_need_device_support() {
    let engine = EngineInfo {
        supports_subgroups: false,
        ..EngineInfo::default()
    };
    let selector = KernelSelector::new(engine).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&fully_connected(1), &allow_reorder())
        .expect("fully connected kernel");
    assert_eq!(chosen.kernel_name, "fully_connected_gpu_gemm");
}

#[test]
fn pointwise_convolution_picks_the_blocked_kernel() {
    let selector = KernelSelector::new(EngineInfo::default()).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&convolution(1, 0), &allow_reorder())
        .expect("convolution kernel");
    assert_eq!(chosen.kernel_name, "convolution_gpu_bfyx_os_iyx_osv16");
    assert_eq!(
        chosen.weights_reorder.map(|r| r.output.layout),
        Some(WeightsLayout::OsIyxOsv16)
    );

    let strict = selector
        .select(&convolution(1, 0), &OptionalParams::default())
        .expect("reference convolution");
    assert_eq!(strict.kernel_name, "convolution_gpu_ref");
}

#[test]
fn fast_convolutions_need_padded_input() {
    let selector = KernelSelector::new(EngineInfo::default()).with_overrides(KernelOverrides::new());
    let chosen = selector
        .select(&convolution(3, 1), &allow_reorder())
        .expect("convolution kernel");
    assert_eq!(chosen.kernel_name, "convolution_gpu_ref");
}
