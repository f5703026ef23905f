use std::sync::Arc;

use dnnc::primitives::{
    ActivationFunction, ConcatAxis, ConcatenationDesc, ConvolutionDesc, EltwiseDesc, EltwiseMode,
    FusedActivation, InputOffset, PoolingDesc, PoolingMode, Spatial,
};
use dnnc::{
    ConstantEvaluator, ConstantValue, DataType, Format, HostData, Layout, Padding, PrimitiveDesc,
    PrimitiveKind, PrimitiveTypeRegistry, Program, Shape,
};
use dnnc_backend_ref_cpu::{unpack, RefCpuEvaluator};

fn layout(format: Format, size: Shape) -> Layout {
    Layout::new(DataType::F32, format, size)
}

fn counting(layout: Layout) -> ConstantValue {
    let values: Vec<f32> = (0..layout.buffer_size()).map(|i| i as f32).collect();
    ConstantValue {
        layout,
        values: HostData::F32(values.into()),
    }
}

/// Evaluates `desc` as a detached node.
fn evaluate(desc: PrimitiveDesc, inputs: &[ConstantValue], output: &Layout) -> HostData {
    let mut program = Program::new(Arc::new(PrimitiveTypeRegistry::builtin()));
    let node = program.create_or_get(desc);
    let input_layouts: Vec<Layout> = inputs.iter().map(|value| value.layout).collect();
    assert!(RefCpuEvaluator.can_evaluate(node, &input_layouts, output));
    RefCpuEvaluator.evaluate(node, inputs, output).unwrap()
}

#[test]
fn weights_reorder_packs_output_feature_blocks() {
    let source = layout(Format::Oiyx, Shape::new(4, 2, 3, 3));
    let target = layout(Format::OsIyxOsv16, source.size);
    let weights = counting(source);

    let packed = evaluate(PrimitiveDesc::reorder("r", "w", &target), &[weights.clone()], &target);

    assert_eq!(packed.len(), target.buffer_size());
    let raw = packed.to_f32_vec();
    // Output feature 1, first input element: 18th value of the plain buffer.
    assert_eq!(raw[1], 18.0);
    // Block tail for features 4..16 stays zero.
    assert!(raw[4..16].iter().all(|&v| v == 0.0));
    assert_eq!(
        unpack(&target, &packed).unwrap(),
        unpack(&source, &weights.values).unwrap()
    );
}

#[test]
fn padded_output_keeps_a_zero_border() {
    let source = layout(Format::Bfyx, Shape::new(1, 1, 2, 2));
    let target = source.with_padding(Padding::spatial(1, 1, 1, 1));

    let padded = evaluate(PrimitiveDesc::reorder("r", "x", &target), &[counting(source)], &target);

    assert_eq!(
        padded.to_f32_vec(),
        [
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 2.0, 3.0, 0.0, //
            0.0, 0.0, 0.0, 0.0,
        ]
    );
}

#[test]
fn eltwise_applies_coefficients_and_broadcasts() {
    let size = Shape::new(1, 2, 2, 1);
    let values = ConstantValue {
        layout: layout(Format::Bfyx, size),
        values: HostData::F32(vec![1.0, 2.0, 3.0, 4.0].into()),
    };
    let per_feature = ConstantValue {
        layout: layout(Format::Bfyx, Shape::new(1, 2, 1, 1)),
        values: HostData::F32(vec![10.0, 20.0].into()),
    };
    let desc = PrimitiveDesc::new(
        "e",
        PrimitiveKind::Eltwise(EltwiseDesc {
            inputs: vec!["a".into(), "b".into()],
            mode: EltwiseMode::Sub,
            coefficients: vec![2.0, 0.5],
            activation: FusedActivation::default(),
        }),
    );

    let out = evaluate(desc, &[values, per_feature], &layout(Format::Bfyx, size));
    assert_eq!(out.to_f32_vec(), [-3.0, -1.0, -4.0, -2.0]);
}

#[test]
fn fused_activation_runs_after_the_operation() {
    let size = Shape::new(1, 1, 4, 1);
    let values = ConstantValue {
        layout: layout(Format::Bfyx, size),
        values: HostData::F32(vec![-2.0, -1.0, 1.0, 2.0].into()),
    };
    let desc = PrimitiveDesc::new(
        "e",
        PrimitiveKind::Eltwise(EltwiseDesc {
            inputs: vec!["a".into(), "a".into()],
            mode: EltwiseMode::Sum,
            coefficients: Vec::new(),
            activation: FusedActivation {
                function: ActivationFunction::Relu,
                m: 0.0,
                n: 0.0,
            },
        }),
    );

    let out = evaluate(desc, &[values.clone(), values], &layout(Format::Bfyx, size));
    assert_eq!(out.to_f32_vec(), [0.0, 0.0, 2.0, 4.0]);
}

#[test]
fn concatenation_stacks_features() {
    let a = ConstantValue {
        layout: layout(Format::Bfyx, Shape::new(1, 1, 2, 1)),
        values: HostData::F32(vec![1.0, 2.0].into()),
    };
    let b = ConstantValue {
        layout: layout(Format::Bfyx, Shape::new(1, 2, 2, 1)),
        values: HostData::F32(vec![3.0, 4.0, 5.0, 6.0].into()),
    };
    let desc = PrimitiveDesc::new(
        "cat",
        PrimitiveKind::Concatenation(ConcatenationDesc {
            inputs: vec!["a".into(), "b".into()],
            axis: ConcatAxis::Feature,
        }),
    );

    let out = evaluate(desc, &[a, b], &layout(Format::Bfyx, Shape::new(1, 3, 2, 1)));
    assert_eq!(out.to_f32_vec(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn max_pooling_picks_window_maxima() {
    let input = counting(layout(Format::Bfyx, Shape::new(1, 1, 4, 4)));
    let desc = PrimitiveDesc::new(
        "pool",
        PrimitiveKind::Pooling(PoolingDesc {
            input: "x".into(),
            mode: PoolingMode::Max,
            size: Spatial::new(2, 2),
            stride: Spatial::new(2, 2),
            input_offset: InputOffset::default(),
            output_size: None,
        }),
    );

    let out = evaluate(desc, &[input], &layout(Format::Bfyx, Shape::new(1, 1, 2, 2)));
    assert_eq!(out.to_f32_vec(), [5.0, 7.0, 13.0, 15.0]);
}

#[test]
fn half_precision_output_is_converted() {
    let source = layout(Format::Bfyx, Shape::new(1, 1, 2, 1));
    let target = Layout::new(DataType::F16, Format::Bfyx, source.size);
    let out = evaluate(PrimitiveDesc::reorder("r", "x", &target), &[counting(source)], &target);

    assert_eq!(out.data_type(), DataType::F16);
    assert_eq!(out.to_f32_vec(), [0.0, 1.0]);
}

#[test]
fn convolution_is_left_to_kernels() {
    let mut program = Program::new(Arc::new(PrimitiveTypeRegistry::builtin()));
    let conv = ConvolutionDesc::new("in", "w", None);
    let node = program.create_or_get(PrimitiveDesc::new("conv", PrimitiveKind::Convolution(conv)));
    let plain = layout(Format::Bfyx, Shape::new(1, 1, 1, 1));
    assert!(!RefCpuEvaluator.can_evaluate(node, &[plain, plain], &plain));
}
