mod common;

use common::{activation, assert_edges_consistent, ids, input, program, run_pass, selector};
use dnnc::passes::{PassContext, ProgramPass, TrimToOutputsPass};
use dnnc::Shape;

fn chain_with_side_branches() -> dnnc::Program {
    program(
        vec![
            input("in", Shape::new(1, 3, 4, 4)),
            activation("b", "in"),
            activation("c", "b"),
            activation("d", "c"),
            activation("side", "b"),
            input("unused_input", Shape::new(1, 1, 1, 1)),
        ],
        &["c"],
    )
}

#[test]
fn keeps_only_what_the_output_needs() {
    let mut program = chain_with_side_branches();
    let result = run_pass(&mut program, &TrimToOutputsPass);

    assert_eq!(ids(&program), ["b", "c", "in", "unused_input"]);
    assert_eq!(result.removed_nodes, 2);
    assert!(result.changed);
    assert!(program.node("c").unwrap().users().is_empty());
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
    for id in ["d", "side"] {
        assert!(program.optimized_out().contains(&id.to_string()));
    }
}

#[test]
fn plain_chain_leaves_exactly_the_chain() {
    let mut program = program(
        vec![
            input("In", Shape::new(1, 1, 2, 2)),
            activation("B", "In"),
            activation("C", "B"),
            activation("D", "C"),
        ],
        &["C"],
    );
    run_pass(&mut program, &TrimToOutputsPass);
    assert_eq!(ids(&program), ["B", "C", "In"]);
}

#[test]
fn second_run_changes_nothing() {
    let mut program = chain_with_side_branches();
    run_pass(&mut program, &TrimToOutputsPass);
    let before = program.processing_order().ids();

    let result = run_pass(&mut program, &TrimToOutputsPass);
    assert!(!result.changed);
    assert_eq!(program.processing_order().ids(), before);
}

#[test]
fn debug_builds_keep_everything() {
    let mut program = chain_with_side_branches();
    let selector = selector();
    let mut cx = PassContext::new(&selector).with_debug(true);
    let result = TrimToOutputsPass.run(&mut program, &mut cx).unwrap();

    assert!(!result.changed);
    assert_eq!(program.len(), 6);
}
