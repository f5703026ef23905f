//! JIT constant lists passed to generated kernel sources.

use serde::{Deserialize, Serialize};

use crate::params::{ActivationFunction, BaseParams, FusedActivation, WeightBiasParams};
use crate::tensor::{DataTensor, WeightsTensor};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JitConstants {
    definitions: Vec<(String, String)>,
}

impl JitConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl ToString) {
        self.definitions.push((name.into(), value.to_string()));
    }

    pub fn merge(&mut self, other: JitConstants) {
        self.definitions.extend(other.definitions);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.definitions
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.definitions
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn add_tensor(jit: &mut JitConstants, prefix: &str, tensor: &DataTensor) {
    jit.add(format!("{prefix}_TYPE"), format!("{:?}", tensor.dtype).to_lowercase());
    jit.add(format!("{prefix}_LAYOUT"), format!("{:?}", tensor.layout).to_lowercase());
    for (suffix, dim) in [
        ("X", tensor.x()),
        ("Y", tensor.y()),
        ("FEATURE_NUM", tensor.feature()),
        ("BATCH_NUM", tensor.batch()),
    ] {
        jit.add(format!("{prefix}_SIZE_{suffix}"), dim.v);
        jit.add(format!("{prefix}_PITCH_{suffix}"), dim.pitch);
    }
    jit.add(format!("{prefix}_OFFSET"), tensor.offset());
}

fn activation_name(function: ActivationFunction) -> &'static str {
    match function {
        ActivationFunction::None => "NONE",
        ActivationFunction::Logistic => "LOGISTIC",
        ActivationFunction::Hyperbolic => "HYPERBOLIC_TAN",
        ActivationFunction::Relu => "RELU",
        ActivationFunction::ReluNegativeSlope => "RELU_NEGATIVE_SLOPE",
        ActivationFunction::Clamp => "CLAMP",
        ActivationFunction::Linear => "LINEAR",
        ActivationFunction::Abs => "ABS",
        ActivationFunction::Sqrt => "SQRT",
        ActivationFunction::Square => "SQUARE",
        ActivationFunction::Elu => "ELU",
    }
}

pub fn make_activation_jit(activation: &FusedActivation) -> JitConstants {
    let mut jit = JitConstants::new();
    jit.add("ACTIVATION_FUNCTION", activation_name(activation.function));
    if !activation.is_none() {
        jit.add("NL_M", activation.m);
        jit.add("NL_N", activation.n);
    }
    jit
}

/// Sizes, pitches and offsets of every input and the output, plus the fused activation.
pub fn make_base_jit(params: &BaseParams) -> JitConstants {
    let mut jit = JitConstants::new();
    for (idx, input) in params.inputs.iter().enumerate() {
        add_tensor(&mut jit, &format!("INPUT{idx}"), input);
    }
    add_tensor(&mut jit, "OUTPUT", &params.output);
    jit.merge(make_activation_jit(&params.activation));
    jit
}

pub fn make_weights_jit(weights: &WeightsTensor, prefix: &str) -> JitConstants {
    let mut jit = JitConstants::new();
    jit.add(format!("{prefix}_TYPE"), format!("{:?}", weights.wtype).to_lowercase());
    jit.add(format!("{prefix}_LAYOUT"), format!("{:?}", weights.layout).to_lowercase());
    jit.add(format!("{prefix}_OFM_NUM"), weights.ofm);
    jit.add(format!("{prefix}_IFM_NUM"), weights.ifm);
    jit.add(format!("{prefix}_SIZE_X"), weights.x);
    jit.add(format!("{prefix}_SIZE_Y"), weights.y);
    jit
}

pub fn make_weight_bias_jit(params: &WeightBiasParams) -> JitConstants {
    let mut jit = make_weights_jit(&params.weights, "FILTER");
    match params.bias.first() {
        Some(bias) => {
            jit.add("BIAS_TERM", 1);
            add_tensor(&mut jit, "BIAS", bias);
        }
        None => jit.add("BIAS_TERM", 0),
    }
    jit
}
