//! Kernel request parameters.
//!
//! [`Params`] is a closed set of per-kind parameter structs. Each variant knows
//! how to describe itself as a [`ParamsKey`] and how to fingerprint itself for
//! the tuning cache.

use serde::{Deserialize, Serialize};

use crate::error::SelectorError;
use crate::hashing::fnv1a_hash;
use crate::key::ParamsKey;
use crate::tensor::{DataTensor, WeightsTensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    Convolution,
    FullyConnected,
    Pooling,
    Activation,
    Eltwise,
    Reorder,
    WeightsReorder,
    Softmax,
    Concatenation,
    BatchNorm,
    Scale,
    FusedConvBnScale,
}

impl KernelType {
    pub fn as_str(self) -> &'static str {
        match self {
            KernelType::Convolution => "convolution",
            KernelType::FullyConnected => "fully_connected",
            KernelType::Pooling => "pooling",
            KernelType::Activation => "activation",
            KernelType::Eltwise => "eltwise",
            KernelType::Reorder => "reorder",
            KernelType::WeightsReorder => "reorder_weights",
            KernelType::Softmax => "softmax",
            KernelType::Concatenation => "concatenation",
            KernelType::BatchNorm => "batch_norm",
            KernelType::Scale => "scale",
            KernelType::FusedConvBnScale => "fused_conv_bn_scale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActivationFunction {
    #[default]
    None,
    Logistic,
    Hyperbolic,
    Relu,
    ReluNegativeSlope,
    Clamp,
    Linear,
    Abs,
    Sqrt,
    Square,
    Elu,
}

/// Activation applied to a kernel's output, with its two scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FusedActivation {
    pub function: ActivationFunction,
    pub m: f32,
    pub n: f32,
}

impl FusedActivation {
    pub fn is_none(&self) -> bool {
        self.function == ActivationFunction::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolType {
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolRemainder {
    Floor,
    Ceil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelDividerMode {
    Fixed,
    DynamicWithPadding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoftmaxDim {
    X,
    Y,
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcatAxis {
    X,
    Y,
    Feature,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EltwiseMode {
    Sum,
    Sub,
    Prod,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size2 {
    pub x: usize,
    pub y: usize,
}

impl Size2 {
    pub const ONE: Size2 = Size2 { x: 1, y: 1 };

    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Parameters shared by every kernel kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseParams {
    /// Id of the graph node the request came from. Not part of the fingerprint.
    #[serde(skip)]
    pub layer_id: String,
    pub activation: FusedActivation,
    pub inputs: Vec<DataTensor>,
    pub output: DataTensor,
}

impl BaseParams {
    pub fn new(layer_id: impl Into<String>, inputs: Vec<DataTensor>, output: DataTensor) -> Self {
        Self {
            layer_id: layer_id.into(),
            activation: FusedActivation::default(),
            inputs,
            output,
        }
    }

    pub fn params_key(&self) -> ParamsKey {
        let mut k = ParamsKey::new();
        let mut different_types = false;

        for input in &self.inputs {
            k.enable_input_data_type(input.dtype);
            k.enable_input_layout(input.layout);
            different_types |= input.dtype != self.output.dtype;
            describe_tensor(&mut k, input);
        }

        k.enable_output_data_type(self.output.dtype);
        k.enable_output_layout(self.output.layout);
        describe_tensor(&mut k, &self.output);

        if different_types {
            k.enable_different_types();
        }
        k
    }
}

fn describe_tensor(k: &mut ParamsKey, tensor: &DataTensor) {
    if tensor.batch().v > 1 {
        k.enable_batching();
    }
    if tensor.is_padded() {
        k.enable_tensor_pitches();
    }
    if tensor.offset() != 0 {
        k.enable_tensor_offset();
    }
}

/// Weights and biases of a convolution or fully-connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBiasParams {
    pub weights: WeightsTensor,
    pub bias: Vec<DataTensor>,
}

impl WeightBiasParams {
    fn extend_key(&self, k: &mut ParamsKey, output: &DataTensor) {
        k.enable_input_weights_type(self.weights.wtype);
        k.enable_input_weights_layout(self.weights.layout);

        match self.bias.first() {
            None => k.enable_non_bias(),
            Some(bias)
                if bias.feature().v == output.feature().v
                    && bias.logical_size() == bias.feature().v =>
            {
                k.enable_bias_per_feature()
            }
            Some(_) => k.enable_bias_per_output(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionParams {
    pub base: BaseParams,
    pub weight_bias: WeightBiasParams,
    pub filter_size: Size2,
    pub stride: Size2,
    pub dilation: Size2,
    /// Implicit zero padding read before the first input element.
    pub padding: Size2,
    pub split: usize,
}

impl ConvolutionParams {
    fn params_key(&self) -> ParamsKey {
        let mut k = self.base.params_key();
        self.weight_bias.extend_key(&mut k, &self.base.output);
        if self.split > 1 {
            k.enable_split_support();
        }
        if self.dilation != Size2::ONE {
            k.enable_dilation();
        }
        k
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedParams {
    pub base: BaseParams,
    pub weight_bias: WeightBiasParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingParams {
    pub base: BaseParams,
    pub pool_type: PoolType,
    pub remainder: PoolRemainder,
    pub divider: KernelDividerMode,
    pub pool_size: Size2,
    pub pool_stride: Size2,
    pub pool_pad: Size2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationParams {
    pub base: BaseParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EltwiseParams {
    pub base: BaseParams,
    pub mode: EltwiseMode,
    pub coefficients: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderParams {
    pub base: BaseParams,
    pub subtract_per_feature: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsReorderParams {
    #[serde(skip)]
    pub layer_id: String,
    pub input: WeightsTensor,
    pub output: WeightsTensor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxParams {
    pub base: BaseParams,
    pub dim: SoftmaxDim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatenationParams {
    pub base: BaseParams,
    pub axis: ConcatAxis,
}

/// Inputs are the data, the per-feature mean and the per-feature variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParams {
    pub base: BaseParams,
    pub epsilon: f32,
}

/// Inputs are the data, the per-feature scale and optionally a per-feature bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub base: BaseParams,
}

impl ScaleParams {
    pub fn has_bias(&self) -> bool {
        self.base.inputs.len() > 2
    }
}

/// Convolution followed by batch normalization and scale in one kernel.
///
/// `conv.base.inputs` holds the data input followed by mean, variance,
/// scale and the optional scale bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedConvBnScaleParams {
    pub conv: ConvolutionParams,
    pub epsilon: f32,
}

impl FusedConvBnScaleParams {
    pub fn has_scale_bias(&self) -> bool {
        self.conv.base.inputs.len() > 4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Params {
    Convolution(ConvolutionParams),
    FullyConnected(FullyConnectedParams),
    Pooling(PoolingParams),
    Activation(ActivationParams),
    Eltwise(EltwiseParams),
    Reorder(ReorderParams),
    WeightsReorder(WeightsReorderParams),
    Softmax(SoftmaxParams),
    Concatenation(ConcatenationParams),
    BatchNorm(BatchNormParams),
    Scale(ScaleParams),
    FusedConvBnScale(FusedConvBnScaleParams),
}

impl Params {
    pub fn kind(&self) -> KernelType {
        match self {
            Params::Convolution(_) => KernelType::Convolution,
            Params::FullyConnected(_) => KernelType::FullyConnected,
            Params::Pooling(_) => KernelType::Pooling,
            Params::Activation(_) => KernelType::Activation,
            Params::Eltwise(_) => KernelType::Eltwise,
            Params::Reorder(_) => KernelType::Reorder,
            Params::WeightsReorder(_) => KernelType::WeightsReorder,
            Params::Softmax(_) => KernelType::Softmax,
            Params::Concatenation(_) => KernelType::Concatenation,
            Params::BatchNorm(_) => KernelType::BatchNorm,
            Params::Scale(_) => KernelType::Scale,
            Params::FusedConvBnScale(_) => KernelType::FusedConvBnScale,
        }
    }

    /// Shared parameters; weights reorders have none.
    pub fn base(&self) -> Option<&BaseParams> {
        match self {
            Params::Convolution(p) => Some(&p.base),
            Params::FullyConnected(p) => Some(&p.base),
            Params::Pooling(p) => Some(&p.base),
            Params::Activation(p) => Some(&p.base),
            Params::Eltwise(p) => Some(&p.base),
            Params::Reorder(p) => Some(&p.base),
            Params::Softmax(p) => Some(&p.base),
            Params::Concatenation(p) => Some(&p.base),
            Params::BatchNorm(p) => Some(&p.base),
            Params::Scale(p) => Some(&p.base),
            Params::FusedConvBnScale(p) => Some(&p.conv.base),
            Params::WeightsReorder(_) => None,
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            Params::WeightsReorder(p) => &p.layer_id,
            other => other.base().map(|b| b.layer_id.as_str()).unwrap_or_default(),
        }
    }

    pub fn params_key(&self) -> ParamsKey {
        match self {
            Params::Convolution(p) => p.params_key(),
            Params::FusedConvBnScale(p) => p.conv.params_key(),
            Params::FullyConnected(p) => {
                let mut k = p.base.params_key();
                p.weight_bias.extend_key(&mut k, &p.base.output);
                k
            }
            Params::Pooling(p) => {
                let mut k = p.base.params_key();
                k.enable_pool_type(p.pool_type);
                k.enable_pool_remainder(p.remainder);
                k.enable_pool_kernel_divider(p.divider);
                k
            }
            Params::Activation(p) => {
                let mut k = p.base.params_key();
                if p.base.inputs.len() > 1 {
                    k.enable_activation_params_as_input();
                }
                k
            }
            Params::Eltwise(p) => {
                let mut k = p.base.params_key();
                if !p.coefficients.is_empty() {
                    k.enable_eltwise_coefficients();
                }
                k
            }
            Params::Reorder(p) => {
                let mut k = p.base.params_key();
                if !p.subtract_per_feature.is_empty() {
                    k.enable_reorder_subtract();
                }
                k
            }
            Params::WeightsReorder(p) => {
                let mut k = ParamsKey::new();
                k.enable_input_weights_type(p.input.wtype);
                k.enable_output_weights_type(p.output.wtype);
                k.enable_input_weights_layout(p.input.layout);
                k.enable_output_weights_layout(p.output.layout);
                if p.input.wtype != p.output.wtype {
                    k.enable_different_types();
                }
                k
            }
            Params::Softmax(p) => {
                let mut k = p.base.params_key();
                k.enable_softmax_dim(p.dim);
                k
            }
            Params::Concatenation(p) => {
                let mut k = p.base.params_key();
                k.enable_concat_axis(p.axis);
                k
            }
            Params::BatchNorm(p) => p.base.params_key(),
            Params::Scale(p) => {
                let mut k = p.base.params_key();
                if p.has_bias() {
                    k.enable_bias_per_feature();
                } else {
                    k.enable_non_bias();
                }
                k
            }
        }
    }

    /// Stable fingerprint of the request, used as the tuning-cache key.
    ///
    /// The layer id is excluded so identical layers share a tuning result.
    pub fn fingerprint(&self) -> Result<String, SelectorError> {
        let bytes = bincode::serialize(self)?;
        Ok(format!("{:016x}", fnv1a_hash(&bytes)))
    }
}

/// Caller-side switches that widen what a request accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionalParams {
    /// The caller can insert a weights reorder, so the weights layout in the
    /// request is not binding.
    pub allow_weights_reorder: bool,
    /// Extra requirements merged into every request key.
    pub required: ParamsKey,
}

impl OptionalParams {
    pub fn supported_key(&self) -> ParamsKey {
        self.required
    }

    /// Request key for `params` under these options.
    pub fn request_key(&self, params: &Params) -> ParamsKey {
        let mut key = params.params_key().merge(&self.supported_key());
        if self.allow_weights_reorder {
            key.clear_input_weights_layout();
        }
        key
    }
}
