mod common;

use common::{activation, assert_edges_consistent, data, eltwise, ids, input, program, selector};
use dnnc::passes::{PassContext, PassResult, ProgramPass, PropagateConstantsPass};
use dnnc::primitives::EltwiseMode;
use dnnc::{
    CompileError, ConstantEvaluator, ConstantValue, Format, HostData, Layout, PrimitiveKind,
    Program, ProgramNode, Shape,
};
use dnnc_backend_ref_cpu::RefCpuEvaluator;

const SIZE: Shape = Shape::new(1, 2, 2, 2);

/// Two literals summed, then multiplied with the network input.
fn folded_sum() -> Program {
    program(
        vec![
            input("in", SIZE),
            data("lhs", Format::Bfyx, SIZE, 0.0),
            data("rhs", Format::Bfyx, SIZE, 10.0),
            eltwise("add", &["lhs", "rhs"], EltwiseMode::Sum),
            eltwise("consumer", &["in", "add"], EltwiseMode::Prod),
        ],
        &[],
    )
}

fn propagate(program: &mut Program, evaluator: &dyn ConstantEvaluator) -> Result<PassResult, CompileError> {
    let selector = selector();
    let mut cx = PassContext::new(&selector).with_evaluator(evaluator);
    PropagateConstantsPass.run(program, &mut cx)
}

#[test]
fn literal_sum_becomes_one_literal() {
    let mut program = folded_sum();
    let result = propagate(&mut program, &RefCpuEvaluator).unwrap();

    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(result.removed_nodes, 2);
    assert_eq!(ids(&program), ["add", "consumer", "in"]);

    let add = program.node("add").unwrap();
    let PrimitiveKind::Data { layout, values } = add.kind() else {
        panic!("add was not folded: {:?}", add.kind());
    };
    assert_eq!(layout.size, SIZE);
    let expected: Vec<f32> = (0..8).map(|i| 10.0 + 2.0 * i as f32).collect();
    assert_eq!(values.to_f32_vec(), expected);

    assert_eq!(program.node("consumer").unwrap().dependencies(), ["in", "add"]);
    assert_eq!(add.users(), ["consumer"]);
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
}

#[test]
fn constant_output_is_folded_in_place() {
    let mut program = program(
        vec![
            data("a", Format::Bfyx, SIZE, -4.0),
            activation("relu", "a"),
        ],
        &[],
    );
    propagate(&mut program, &RefCpuEvaluator).unwrap();

    assert_eq!(ids(&program), ["relu"]);
    let relu = program.node("relu").unwrap();
    assert!(relu.is_output());
    let PrimitiveKind::Data { values, .. } = relu.kind() else {
        panic!("relu was not folded");
    };
    assert_eq!(values.to_f32_vec(), [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn without_an_evaluator_nothing_changes() {
    let mut program = folded_sum();
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    let result = PropagateConstantsPass.run(&mut program, &mut cx).unwrap();

    assert!(!result.changed);
    assert_eq!(ids(&program), ["add", "consumer", "in", "lhs", "rhs"]);
}

struct Declining;

impl ConstantEvaluator for Declining {
    fn name(&self) -> &str {
        "declining"
    }

    fn can_evaluate(&self, _: &ProgramNode, _: &[Layout], _: &Layout) -> bool {
        false
    }

    fn evaluate(&self, node: &ProgramNode, _: &[ConstantValue], _: &Layout) -> anyhow::Result<HostData> {
        panic!("{} evaluated despite declining", node.id());
    }
}

#[test]
fn unsupported_nodes_stay_in_the_graph() {
    let mut program = folded_sum();
    let result = propagate(&mut program, &Declining).unwrap();
    assert!(!result.changed);
    assert!(matches!(program.node("add").unwrap().kind(), PrimitiveKind::Eltwise(_)));
    assert_eq!(program.len(), 5);
}

struct ShortBuffer;

impl ConstantEvaluator for ShortBuffer {
    fn name(&self) -> &str {
        "short"
    }

    fn can_evaluate(&self, _: &ProgramNode, _: &[Layout], _: &Layout) -> bool {
        true
    }

    fn evaluate(&self, _: &ProgramNode, _: &[ConstantValue], _: &Layout) -> anyhow::Result<HostData> {
        Ok(HostData::F32(vec![0.0; 3].into()))
    }
}

#[test]
fn wrongly_sized_results_are_rejected() {
    let mut program = folded_sum();
    let err = propagate(&mut program, &ShortBuffer).unwrap_err();
    assert!(matches!(err, CompileError::ConstantEvaluation { ref id, .. } if id == "add"));
}
