mod common;

use common::{activation, assert_edges_consistent, conv3x3, data, input, program, selector};
use dnnc::passes::{PassContext, PreOptimizeBiasPass, ProgramPass, ReorderInputsPass};
use dnnc::primitives::{FullyConnectedDesc, FusedActivation};
use dnnc::{Format, PrimitiveDesc, PrimitiveKind, PrimitiveType, Shape};

fn reorders_of(program: &dnnc::Program, source: &str) -> Vec<String> {
    program
        .node(source)
        .unwrap()
        .users()
        .iter()
        .filter(|user| program.node(user).unwrap().is_type(PrimitiveType::Reorder))
        .cloned()
        .collect()
}

#[test]
fn shared_weights_get_one_shared_reorder() {
    let mut program = program(
        vec![
            input("in", Shape::new(1, 2, 8, 8)),
            data("w", Format::Oiyx, Shape::new(4, 2, 3, 3), 0.0),
            conv3x3("left", "in", "w", None, 0),
            conv3x3("right", "in", "w", None, 0),
        ],
        &[],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    let result = ReorderInputsPass.run(&mut program, &mut cx).unwrap();

    assert_eq!(result.rewrites_applied, 2);
    assert_eq!(cx.layout_optimizer().cached_reorders(), 1);
    assert_eq!(reorders_of(&program, "w"), ["reorder_0_w"]);
    assert_eq!(program.node("w").unwrap().users(), ["reorder_0_w"]);
    for conv in ["left", "right"] {
        assert_eq!(program.node(conv).unwrap().dependencies()[1], "reorder_0_w");
    }
    assert_eq!(
        program.get_output_layout("reorder_0_w").unwrap().format,
        Format::OsIyxOsv16
    );
    // Node flags follow the reordered buffer.
    let reorder = program.node("reorder_0_w").unwrap();
    assert!(reorder.is_constant() && reorder.is_constant_frontier());
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
    assert!(!cx.layout_optimizer().splitted_convolution());
}

#[test]
fn input_already_in_the_preferred_layout_is_untouched() {
    let mut program = program(
        vec![
            input("in", Shape::new(1, 2, 8, 8)),
            data("w", Format::Oiyx, Shape::new(4, 2, 3, 3), 0.0),
            conv3x3("conv", "in", "w", None, 0),
        ],
        &[],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    ReorderInputsPass.run(&mut program, &mut cx).unwrap();
    assert_eq!(program.node("conv").unwrap().dependencies()[0], "in");
}

#[test]
fn fully_connected_weights_follow_the_batch_rule() {
    let fc = PrimitiveDesc::new(
        "fc",
        PrimitiveKind::FullyConnected(FullyConnectedDesc {
            input: "in".into(),
            weights: "w".into(),
            bias: None,
            activation: FusedActivation::default(),
        }),
    );
    let mut program = program(
        vec![
            input("in", Shape::new(1, 4, 2, 2)),
            data("w", Format::Oiyx, Shape::new(10, 4, 2, 2), 0.0),
            fc,
        ],
        &[],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    ReorderInputsPass.run(&mut program, &mut cx).unwrap();

    let weights = program.node("fc").unwrap().dependencies()[1].clone();
    assert_eq!(program.get_output_layout(&weights).unwrap().format, Format::OsIOsv16);
    assert_eq!(program.node("fc").unwrap().dependencies()[0], "in");
}

#[test]
fn bias_is_brought_to_a_plain_layout() {
    let mut program = program(
        vec![
            input("in", Shape::new(1, 2, 8, 8)),
            data("w", Format::Oiyx, Shape::new(4, 2, 3, 3), 0.0),
            data("b", Format::Yxfb, Shape::new(1, 4, 1, 1), 0.0),
            conv3x3("conv", "in", "w", Some("b"), 0),
        ],
        &[],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    let result = PreOptimizeBiasPass.run(&mut program, &mut cx).unwrap();

    assert_eq!(result.rewrites_applied, 1);
    let bias = program.node("conv").unwrap().dependencies()[2].clone();
    assert_ne!(bias, "b");
    assert_eq!(program.get_output_layout(&bias).unwrap().format, Format::Bfyx);
    // Weights are another pass's business.
    assert_eq!(program.node("conv").unwrap().dependencies()[1], "w");
}

#[test]
fn reorder_never_takes_over_an_existing_id() {
    let mut program = program(
        vec![
            input("in", Shape::new(1, 2, 8, 8)),
            data("w", Format::Oiyx, Shape::new(4, 2, 3, 3), 0.0),
            activation("reorder_0_w", "in"),
            conv3x3("conv", "in", "w", None, 0),
        ],
        &["conv", "reorder_0_w"],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    ReorderInputsPass.run(&mut program, &mut cx).unwrap();

    let weights = program.node("conv").unwrap().dependencies()[1].clone();
    assert_eq!(weights, "reorder_0_w_1");
    let reorder = program.node(&weights).unwrap();
    assert!(reorder.is_type(PrimitiveType::Reorder));
    assert_eq!(reorder.dependencies(), ["w"]);
    assert_eq!(
        program.get_output_layout(&weights).unwrap().format,
        Format::OsIyxOsv16
    );

    // The user's node is untouched.
    let relu = program.node("reorder_0_w").unwrap();
    assert!(relu.is_type(PrimitiveType::Activation));
    assert!(relu.users().is_empty());
    assert_edges_consistent(&program);
}

#[test]
fn fully_connected_bias_is_brought_to_a_plain_layout() {
    let fc = PrimitiveDesc::new(
        "fc",
        PrimitiveKind::FullyConnected(FullyConnectedDesc {
            input: "in".into(),
            weights: "w".into(),
            bias: Some("b".into()),
            activation: FusedActivation::default(),
        }),
    );
    let mut program = program(
        vec![
            input("in", Shape::new(1, 4, 2, 2)),
            data("w", Format::Oiyx, Shape::new(10, 4, 2, 2), 0.0),
            data("b", Format::Yxfb, Shape::new(1, 10, 1, 1), 0.0),
            fc,
        ],
        &[],
    );
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    let result = PreOptimizeBiasPass.run(&mut program, &mut cx).unwrap();

    assert_eq!(result.rewrites_applied, 1);
    let bias = program.node("fc").unwrap().dependencies()[2].clone();
    assert_eq!(program.get_output_layout(&bias).unwrap().format, Format::Bfyx);
    assert_edges_consistent(&program);
}
