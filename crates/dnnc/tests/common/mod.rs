#![allow(dead_code)]

use std::sync::Arc;

use dnnc::kernel_selector::{EngineInfo, KernelSelector};
use dnnc::passes::{PassContext, PassResult, ProgramPass};
use dnnc::primitives::{
    ActivationDesc, ActivationFunction, BatchNormDesc, ConvolutionDesc, EltwiseDesc, EltwiseMode,
    FusedActivation, InputOffset, PoolingDesc, PoolingMode, ScaleDesc, Spatial,
};
use dnnc::{
    DataType, Format, HostData, Layout, PrimitiveDesc, PrimitiveKind, PrimitiveTypeRegistry,
    Program, Shape, Topology,
};

pub fn f32_layout(format: Format, size: Shape) -> Layout {
    Layout::new(DataType::F32, format, size)
}

pub fn input(id: &str, size: Shape) -> PrimitiveDesc {
    PrimitiveDesc::input_layout(id, f32_layout(Format::Bfyx, size))
}

/// Literal whose values count up from `start`.
pub fn data(id: &str, format: Format, size: Shape, start: f32) -> PrimitiveDesc {
    let layout = f32_layout(format, size);
    let values: Vec<f32> = (0..layout.buffer_size()).map(|i| start + i as f32).collect();
    PrimitiveDesc::data(id, layout, HostData::F32(values.into()))
}

pub fn filled(id: &str, size: Shape, value: f32) -> PrimitiveDesc {
    let layout = f32_layout(Format::Bfyx, size);
    PrimitiveDesc::data(id, layout, HostData::F32(vec![value; layout.buffer_size()].into()))
}

pub fn relu() -> FusedActivation {
    FusedActivation {
        function: ActivationFunction::Relu,
        m: 0.0,
        n: 0.0,
    }
}

pub fn activation(id: &str, source: &str) -> PrimitiveDesc {
    PrimitiveDesc::new(
        id,
        PrimitiveKind::Activation(ActivationDesc {
            input: source.to_string(),
            activation: relu(),
            slope: None,
        }),
    )
}

pub fn eltwise(id: &str, inputs: &[&str], mode: EltwiseMode) -> PrimitiveDesc {
    PrimitiveDesc::new(
        id,
        PrimitiveKind::Eltwise(EltwiseDesc {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            mode,
            coefficients: Vec::new(),
            activation: FusedActivation::default(),
        }),
    )
}

/// 3x3 convolution reading `source`; `pad` becomes a negative input offset.
pub fn conv3x3(id: &str, source: &str, weights: &str, bias: Option<&str>, pad: i32) -> PrimitiveDesc {
    let conv = ConvolutionDesc {
        input_offset: InputOffset::new(-pad, -pad),
        ..ConvolutionDesc::new(source, weights, bias.map(str::to_string))
    };
    PrimitiveDesc::new(id, PrimitiveKind::Convolution(conv))
}

pub fn max_pool(id: &str, source: &str, size: usize, stride: usize) -> PrimitiveDesc {
    PrimitiveDesc::new(
        id,
        PrimitiveKind::Pooling(PoolingDesc {
            input: source.to_string(),
            mode: PoolingMode::Max,
            size: Spatial::new(size, size),
            stride: Spatial::new(stride, stride),
            input_offset: InputOffset::default(),
            output_size: None,
        }),
    )
}

pub fn batch_norm(id: &str, source: &str, mean: &str, variance: &str) -> PrimitiveDesc {
    PrimitiveDesc::new(
        id,
        PrimitiveKind::BatchNorm(BatchNormDesc {
            input: source.to_string(),
            mean: mean.to_string(),
            variance: variance.to_string(),
            epsilon: 1e-5,
        }),
    )
}

pub fn scale(id: &str, source: &str, scale: &str, bias: Option<&str>) -> PrimitiveDesc {
    PrimitiveDesc::new(
        id,
        PrimitiveKind::Scale(ScaleDesc {
            input: source.to_string(),
            scale: scale.to_string(),
            bias: bias.map(str::to_string),
        }),
    )
}

pub fn topology(descs: Vec<PrimitiveDesc>) -> Topology {
    let mut topology = Topology::new();
    for desc in descs {
        topology.add(desc).expect("unique primitive ids");
    }
    topology
}

/// Program built from `descs` with `outputs` pinned (all endpoints when
/// empty), constants and data flow marked and layouts computed.
pub fn program(descs: Vec<PrimitiveDesc>, outputs: &[&str]) -> Program {
    let topology = topology(descs);
    let mut program = Program::from_topology(&topology, Arc::new(PrimitiveTypeRegistry::builtin()))
        .expect("program builds");
    let outputs: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
    program.set_outputs(&outputs).expect("outputs exist");
    program.mark_constants().expect("constants");
    program.mark_data_flow().expect("data flow");
    program.recalc_all_layouts().expect("layouts");
    program
}

pub fn selector() -> KernelSelector {
    KernelSelector::new(EngineInfo::default())
}

pub fn run_pass(program: &mut Program, pass: &dyn ProgramPass) -> PassResult {
    let selector = selector();
    let mut cx = PassContext::new(&selector);
    pass.run(program, &mut cx).expect("pass succeeds")
}

pub fn ids(program: &Program) -> Vec<String> {
    let mut ids: Vec<String> = program.node_ids().map(str::to_string).collect();
    ids.sort();
    ids
}

/// Every edge resolves to a node present in the arena, in both directions.
pub fn assert_edges_consistent(program: &Program) {
    for node in program.nodes() {
        for dep in node.dependencies() {
            let dep_node = program.get(dep).unwrap_or_else(|| panic!("{} reads missing {dep}", node.id()));
            assert!(dep_node.has_user(node.id()), "{dep} does not list {} as user", node.id());
        }
        for user in node.users() {
            let user_node = program.get(user).unwrap_or_else(|| panic!("{} feeds missing {user}", node.id()));
            assert!(
                user_node.dependencies().iter().any(|d| d == node.id()),
                "{user} does not read {}",
                node.id()
            );
        }
        let desc_deps: Vec<&String> = node.kind().dependencies();
        assert_eq!(desc_deps.len(), node.dependencies().len(), "{} argument slots", node.id());
        for (slot, dep) in desc_deps.iter().zip(node.dependencies()) {
            assert_eq!(*slot, dep, "{} argument slot out of sync", node.id());
        }
    }
}
