mod common;

use std::sync::Arc;

use common::{activation, assert_edges_consistent, data, eltwise, filled, input, program, topology};
use dnnc::primitives::EltwiseMode;
use dnnc::{CompileError, Format, PrimitiveDesc, PrimitiveTypeRegistry, Program, Shape};

fn diamond() -> Program {
    // in -> a -> c, in -> b -> c, c -> d
    program(
        vec![
            eltwise("c", &["a", "b"], EltwiseMode::Sum),
            activation("d", "c"),
            activation("a", "in"),
            activation("b", "in"),
            input("in", Shape::new(1, 4, 8, 8)),
        ],
        &[],
    )
}

#[test]
fn processing_order_is_topological_for_forward_references() {
    let mut program = diamond();
    assert!(program.is_order_valid());
    program.update_processing_numbers();
    for id in ["in", "a", "b", "c", "d"] {
        assert!(program.is_correct(id), "{id} precedes a dependency");
    }

    program.calculate_bfs_processing_order().unwrap();
    assert!(program.is_order_valid());
    let order = program.processing_order().ids();
    assert_eq!(order.first().map(String::as_str), Some("in"));
    assert_eq!(order.last().map(String::as_str), Some("d"));
}

/// Layered DAG of `layers` x `width` nodes, each reading one or two nodes of
/// earlier layers, listed in a seed-dependent order.
fn layered_dag(layers: usize, width: usize, seed: u64) -> Vec<PrimitiveDesc> {
    let mut state = seed | 1;
    let mut next = move |bound: usize| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % bound as u64) as usize
    };
    let name = |layer: usize, idx: usize| format!("n{layer}_{idx}");

    let mut descs: Vec<PrimitiveDesc> = (0..width)
        .map(|idx| input(&name(0, idx), Shape::new(1, 2, 4, 4)))
        .collect();
    for layer in 1..layers {
        for idx in 0..width {
            let a = {
                let l = next(layer);
                name(l, next(width))
            };
            let b = {
                let l = next(layer);
                name(l, next(width))
            };
            let id = name(layer, idx);
            if a == b {
                descs.push(activation(&id, &a));
            } else {
                descs.push(eltwise(&id, &[a.as_str(), b.as_str()], EltwiseMode::Sum));
            }
        }
    }
    for i in (1..descs.len()).rev() {
        descs.swap(i, next(i + 1));
    }
    descs
}

#[test]
fn processing_order_is_topological_for_generated_dags() {
    for seed in 1..=16u64 {
        let layers = 2 + (seed as usize % 4);
        let width = 1 + (seed as usize % 5);
        let mut program = program(layered_dag(layers, width, seed), &[]);
        assert!(program.is_order_valid(), "seed {seed}");
        assert_eq!(program.processing_order().ids().len(), layers * width);

        program.calculate_bfs_processing_order().unwrap();
        assert!(program.is_order_valid(), "seed {seed} after bfs");
        assert_edges_consistent(&program);
    }
}

#[test]
fn missing_dependency_is_reported_with_both_ids() {
    let topology = topology(vec![activation("a", "ghost")]);
    let err = Program::from_topology(&topology, Arc::new(PrimitiveTypeRegistry::builtin())).unwrap_err();
    match err {
        CompileError::MissingDependency { user, dependency } => {
            assert_eq!(user, "a");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn endpoints_become_outputs_when_none_are_requested() {
    let program = diamond();
    assert_eq!(program.outputs(), ["d"]);
    assert!(program.node("d").unwrap().is_output());
    assert!(!program.node("c").unwrap().is_output());
    assert_eq!(program.inputs(), ["in"]);
}

#[test]
fn constants_and_frontier_are_marked() {
    let program = program(
        vec![
            input("in", Shape::new(1, 2, 2, 2)),
            filled("k1", Shape::new(1, 2, 2, 2), 1.0),
            filled("k2", Shape::new(1, 2, 2, 2), 2.0),
            eltwise("k", &["k1", "k2"], EltwiseMode::Sum),
            eltwise("out", &["in", "k"], EltwiseMode::Prod),
        ],
        &[],
    );
    let node = |id: &str| program.node(id).unwrap();
    assert!(node("k1").is_constant() && node("k2").is_constant() && node("k").is_constant());
    assert!(!node("in").is_constant() && !node("out").is_constant());
    assert!(node("k").is_constant_frontier());
    assert!(!node("k1").is_constant_frontier());
    assert!(node("in").is_in_data_flow() && node("out").is_in_data_flow());
    assert!(!node("k").is_in_data_flow());
}

#[test]
fn add_intermediate_places_node_after_its_input() {
    let mut program = diamond();
    let layout = program.get_output_layout("a").unwrap();
    let desc = PrimitiveDesc::reorder("r", "a", &layout);
    program.add_intermediate(desc, "c", 0).unwrap();

    assert_eq!(program.node("c").unwrap().dependencies()[0], "r");
    assert_eq!(program.node("a").unwrap().users(), ["r"]);
    assert_eq!(program.processing_order().next("a"), Some("r"));
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
}

#[test]
fn add_intermediate_rejects_node_not_reading_the_dependency() {
    let mut program = diamond();
    let layout = program.get_output_layout("b").unwrap();
    let desc = PrimitiveDesc::reorder("r", "b", &layout);
    assert!(matches!(
        program.add_intermediate(desc, "c", 0),
        Err(CompileError::InvalidGraph(_))
    ));
    assert!(!program.contains("r"));
}

#[test]
fn add_intermediate_refuses_an_unrelated_node_with_the_same_id() {
    let mut program = diamond();
    let layout = program.get_output_layout("a").unwrap();
    // `b` exists but is an activation of `in`, not a reorder of `a`.
    let desc = PrimitiveDesc::reorder("b", "a", &layout);
    assert!(matches!(
        program.add_intermediate(desc, "c", 0),
        Err(CompileError::InvalidGraph(_))
    ));
    assert_eq!(program.node("c").unwrap().dependencies(), ["a", "b"]);
    assert_edges_consistent(&program);
}

#[test]
fn add_intermediate_shares_an_existing_reorder() {
    let mut program = diamond();
    let layout = program.get_output_layout("in").unwrap();
    program
        .add_intermediate(PrimitiveDesc::reorder("r", "in", &layout), "a", 0)
        .unwrap();
    program
        .add_intermediate(PrimitiveDesc::reorder("r", "in", &layout), "b", 0)
        .unwrap();

    assert_eq!(program.node("in").unwrap().users(), ["r"]);
    let mut users = program.node("r").unwrap().users().to_vec();
    users.sort();
    assert_eq!(users, ["a", "b"]);
    assert!(program.is_order_valid());
    assert_edges_consistent(&program);
}

#[test]
fn extract_and_remove_moves_the_output_pin_and_id() {
    let mut program = diamond();
    assert!(program.extract_and_remove("d").unwrap());

    // `c` now carries the id `d` and is the output.
    assert!(!program.contains("c"));
    let d = program.node("d").unwrap();
    assert!(d.is_output());
    assert_eq!(d.dependencies(), ["a", "b"]);
    assert_eq!(program.outputs(), ["d"]);
    assert!(program.optimized_out().contains(&"d".to_string()));
    assert_edges_consistent(&program);
    assert!(program.is_order_valid());
}

#[test]
fn extract_and_remove_refuses_multi_input_nodes() {
    let mut program = diamond();
    assert!(!program.extract_and_remove("c").unwrap());
    assert!(program.contains("c"));
}

#[test]
fn replace_keeps_id_users_and_position() {
    let mut program = diamond();
    let before = program.processing_order().ids();
    let desc = eltwise("ignored", &["a", "b"], EltwiseMode::Max);
    program.replace("c", desc, false).unwrap();

    let c = program.node("c").unwrap();
    assert!(matches!(c.kind(), dnnc::PrimitiveKind::Eltwise(e) if e.mode == EltwiseMode::Max));
    assert_eq!(c.users(), ["d"]);
    assert_eq!(program.processing_order().ids(), before);
    assert_edges_consistent(&program);
}

#[test]
fn rename_updates_every_reference() {
    let mut program = diamond();
    program.rename("in", "image").unwrap();
    assert_eq!(program.inputs(), ["image"]);
    assert_eq!(program.node("a").unwrap().dependencies(), ["image"]);
    assert!(matches!(
        program.node("a").unwrap().kind(),
        dnnc::PrimitiveKind::Activation(a) if a.input == "image"
    ));
    assert!(program.rename("a", "b").is_err());
    assert_edges_consistent(&program);
}

#[test]
fn reverse_connection_swaps_direction() {
    let mut program = program(
        vec![input("x", Shape::new(1, 1, 1, 1)), activation("y", "x")],
        &[],
    );
    program.reverse_connection("x", "y").unwrap();
    assert_eq!(program.node("x").unwrap().dependencies(), ["y"]);
    assert!(program.node("y").unwrap().dependencies().is_empty());
    assert!(program.reverse_connection("x", "y").is_err());
}

#[test]
fn layouts_follow_padding_changes_downstream() {
    let mut program = diamond();
    let before = program.get_output_layout("d").unwrap();
    program
        .set_output_padding("c", dnnc::Padding::spatial(1, 1, 1, 1))
        .unwrap();
    assert_eq!(program.get_output_layout("c").unwrap().padding, dnnc::Padding::spatial(1, 1, 1, 1));
    // Activation output keeps the input format and size but not its padding.
    assert_eq!(program.get_output_layout("d").unwrap(), before);
}

#[test]
fn literal_size_must_match_its_layout() {
    let mut bad = data("w", Format::Bfyx, Shape::new(1, 1, 2, 2), 0.0);
    if let dnnc::PrimitiveKind::Data { layout, .. } = &mut bad.kind {
        layout.size = Shape::new(1, 1, 3, 3);
    }
    let topology = topology(vec![bad]);
    let mut program = Program::from_topology(&topology, Arc::new(PrimitiveTypeRegistry::builtin())).unwrap();
    assert!(matches!(
        program.get_output_layout("w"),
        Err(CompileError::InvalidPrimitive { .. })
    ));
}

#[test]
fn json_dump_lists_nodes_in_order() {
    let program = diamond();
    let json = program.to_json();
    let ids: Vec<&str> = json["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, program.processing_order().ids());
    assert_eq!(json["outputs"][0], "d");
}
