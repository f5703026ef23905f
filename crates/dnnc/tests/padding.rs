mod common;

use common::{activation, assert_edges_consistent, conv3x3, data, input, max_pool, program, run_pass};
use dnnc::passes::PreparePaddingPass;
use dnnc::{Format, Padding, PrimitiveKind, Program, Shape};

fn conv_after(producer: dnnc::PrimitiveDesc, source: &str, pad: i32) -> Program {
    program(
        vec![
            input("in", Shape::new(1, 2, 8, 8)),
            producer,
            data("w", Format::Oiyx, Shape::new(4, 2, 3, 3), 0.0),
            conv3x3("conv", source, "w", None, pad),
        ],
        &["conv"],
    )
}

#[test]
fn producer_takes_the_padding_its_consumer_reads() {
    let mut program = conv_after(max_pool("pool", "in", 2, 2), "pool", 1);
    let result = run_pass(&mut program, &PreparePaddingPass);

    assert!(result.changed);
    let pool = program.get_output_layout("pool").unwrap();
    assert_eq!(pool.padding, Padding::spatial(1, 1, 1, 1));
    assert_eq!(pool.size, Shape::new(1, 2, 4, 4));
    assert_eq!(program.get_output_layout("conv").unwrap().size, Shape::new(1, 4, 4, 4));
    assert_eq!(program.node("conv").unwrap().dependencies()[0], "pool");
}

#[test]
fn input_layout_gets_a_padded_reorder() {
    let mut program = conv_after(max_pool("pool", "in", 2, 2), "in", 1);
    run_pass(&mut program, &PreparePaddingPass);

    let reorder = program.node("reorder_input_conv").unwrap();
    assert!(matches!(reorder.kind(), PrimitiveKind::Reorder(r) if r.input == "in"));
    assert_eq!(program.node("conv").unwrap().dependencies()[0], "reorder_input_conv");
    assert!(program.get_output_layout("in").unwrap().padding.is_none());
    assert_eq!(
        program.get_output_layout("reorder_input_conv").unwrap().padding,
        Padding::spatial(1, 1, 1, 1)
    );
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
}

#[test]
fn unpadded_window_changes_nothing() {
    let mut program = conv_after(max_pool("pool", "in", 2, 2), "pool", 0);
    let result = run_pass(&mut program, &PreparePaddingPass);

    assert!(!result.changed);
    assert!(program.get_output_layout("pool").unwrap().padding.is_none());
}

#[test]
fn padding_is_idempotent() {
    let mut program = conv_after(max_pool("pool", "in", 2, 2), "pool", 1);
    run_pass(&mut program, &PreparePaddingPass);
    let nodes = program.len();
    let second = run_pass(&mut program, &PreparePaddingPass);

    assert!(!second.changed);
    assert_eq!(program.len(), nodes);
}

#[test]
fn pooling_with_an_explicit_output_size_leaves_its_producer_alone() {
    let mut pool = max_pool("pool", "act", 2, 2);
    if let PrimitiveKind::Pooling(p) = &mut pool.kind {
        p.output_size = Some(Shape::new(1, 2, 5, 5));
    }
    let mut program = program(
        vec![input("in", Shape::new(1, 2, 8, 8)), activation("act", "in"), pool],
        &["pool"],
    );
    let result = run_pass(&mut program, &PreparePaddingPass);

    assert!(!result.changed);
    assert!(program.get_output_layout("act").unwrap().padding.is_none());
    assert_eq!(program.get_output_layout("pool").unwrap().size, Shape::new(1, 2, 5, 5));
}
