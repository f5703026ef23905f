mod common;

use common::{assert_edges_consistent, f32_layout, ids, input, max_pool, program, run_pass};
use dnnc::passes::RemoveRedundantReordersPass;
use dnnc::{Format, PrimitiveDesc, PrimitiveKind, Shape};

const SIZE: Shape = Shape::new(1, 3, 4, 4);

fn reorder(id: &str, source: &str, format: Format) -> PrimitiveDesc {
    PrimitiveDesc::reorder(id, source, &f32_layout(format, SIZE))
}

fn reorder_format(program: &dnnc::Program, id: &str) -> Format {
    match program.node(id).unwrap().kind() {
        PrimitiveKind::Reorder(r) => r.output_format,
        other => panic!("{id} is a {:?}", other.primitive_type()),
    }
}

#[test]
fn reorder_chain_collapses_into_the_first() {
    let mut program = program(
        vec![
            input("in", SIZE),
            reorder("r1", "in", Format::Yxfb),
            reorder("r2", "r1", Format::Byxf),
            max_pool("pool", "r2", 2, 2),
        ],
        &[],
    );
    let result = run_pass(&mut program, &RemoveRedundantReordersPass);

    assert_eq!(result.removed_nodes, 1);
    assert_eq!(ids(&program), ["in", "pool", "r1"]);
    assert_eq!(reorder_format(&program, "r1"), Format::Byxf);
    assert_eq!(program.node("pool").unwrap().dependencies(), ["r1"]);
    assert_eq!(program.get_output_layout("pool").unwrap().format, Format::Byxf);
    assert_edges_consistent(&program);
}

#[test]
fn output_reorder_keeps_its_id_when_merged() {
    let mut program = program(
        vec![
            input("in", SIZE),
            reorder("r1", "in", Format::Yxfb),
            reorder("r2", "r1", Format::Byxf),
        ],
        &[],
    );
    run_pass(&mut program, &RemoveRedundantReordersPass);

    assert_eq!(ids(&program), ["in", "r2"]);
    assert!(program.node("r2").unwrap().is_output());
    assert_eq!(reorder_format(&program, "r2"), Format::Byxf);
    assert_eq!(program.node("r2").unwrap().dependencies(), ["in"]);
}

#[test]
fn identity_reorder_is_removed() {
    let mut program = program(
        vec![
            input("in", SIZE),
            reorder("same", "in", Format::Bfyx),
            max_pool("pool", "same", 2, 2),
        ],
        &[],
    );
    let result = run_pass(&mut program, &RemoveRedundantReordersPass);

    assert!(result.changed);
    assert_eq!(ids(&program), ["in", "pool"]);
    assert_eq!(program.node("pool").unwrap().dependencies(), ["in"]);
}

#[test]
fn output_reorder_of_an_input_layout_stays() {
    let mut program = program(
        vec![input("in", SIZE), reorder("out", "in", Format::Bfyx)],
        &[],
    );
    let result = run_pass(&mut program, &RemoveRedundantReordersPass);

    assert!(!result.changed);
    assert_eq!(ids(&program), ["in", "out"]);
}

#[test]
fn mean_subtraction_survives_a_chain_merge() {
    let mut subtracting = reorder("mean", "in", Format::Bfyx);
    if let PrimitiveKind::Reorder(r) = &mut subtracting.kind {
        r.subtract_per_feature = vec![0.5, 0.25, 0.125];
    }
    let mut program = program(
        vec![
            input("in", SIZE),
            subtracting,
            reorder("to_yxfb", "mean", Format::Yxfb),
            max_pool("pool", "to_yxfb", 2, 2),
        ],
        &[],
    );
    run_pass(&mut program, &RemoveRedundantReordersPass);

    assert!(!program.contains("to_yxfb"));
    let PrimitiveKind::Reorder(merged) = program.node("mean").unwrap().kind() else {
        panic!("mean is no longer a reorder");
    };
    assert_eq!(merged.output_format, Format::Yxfb);
    assert_eq!(merged.subtract_per_feature, [0.5, 0.25, 0.125]);
}

#[test]
fn subtracting_reorder_is_not_an_identity() {
    let mut subtracting = reorder("mean", "in", Format::Bfyx);
    if let PrimitiveKind::Reorder(r) = &mut subtracting.kind {
        r.subtract_per_feature = vec![1.0, 1.0, 1.0];
    }
    let mut program = program(
        vec![input("in", SIZE), subtracting, max_pool("pool", "mean", 2, 2)],
        &[],
    );
    let result = run_pass(&mut program, &RemoveRedundantReordersPass);

    assert!(!result.changed);
    assert!(program.contains("mean"));
}
