//! Primitive descriptors: the closed set of operations a topology is built from.

use std::sync::Arc;

use half::f16;
use serde::{Deserialize, Serialize};

pub use dnnc_kernel_selector::params::{
    ActivationFunction, ConcatAxis, EltwiseMode, FusedActivation, SoftmaxDim,
};

use crate::layout::{DataType, Format, Layout, Padding, Shape};

pub type PrimitiveId = String;

/// Literal buffer contents of a [`PrimitiveKind::Data`] node.
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    F32(Arc<[f32]>),
    F16(Arc<[f16]>),
    I8(Arc<[i8]>),
    U8(Arc<[u8]>),
}

impl HostData {
    pub fn data_type(&self) -> DataType {
        match self {
            HostData::F32(_) => DataType::F32,
            HostData::F16(_) => DataType::F16,
            HostData::I8(_) => DataType::I8,
            HostData::U8(_) => DataType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostData::F32(v) => v.len(),
            HostData::F16(v) => v.len(),
            HostData::I8(v) => v.len(),
            HostData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            HostData::F32(v) => v.to_vec(),
            HostData::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            HostData::I8(v) => v.iter().map(|&x| f32::from(x)).collect(),
            HostData::U8(v) => v.iter().map(|&x| f32::from(x)).collect(),
        }
    }

    /// Converts `values` to `data_type`, saturating integer types.
    pub fn from_f32(data_type: DataType, values: &[f32]) -> Self {
        match data_type {
            DataType::F32 => HostData::F32(values.into()),
            DataType::F16 => HostData::F16(values.iter().map(|&x| f16::from_f32(x)).collect()),
            DataType::I8 => HostData::I8(
                values
                    .iter()
                    .map(|&x| x.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8)
                    .collect(),
            ),
            DataType::U8 => HostData::U8(
                values
                    .iter()
                    .map(|&x| x.round().clamp(0.0, u8::MAX as f32) as u8)
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spatial {
    pub x: usize,
    pub y: usize,
}

impl Spatial {
    pub const ONE: Spatial = Spatial { x: 1, y: 1 };

    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Position of the first window relative to the input origin. Negative
/// values read into implicit zero padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputOffset {
    pub x: i32,
    pub y: i32,
}

impl InputOffset {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Implicit padding on the low edge of each spatial axis.
    pub fn padding(&self) -> Spatial {
        Spatial::new(
            self.x.min(0).unsigned_abs() as usize,
            self.y.min(0).unsigned_abs() as usize,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionDesc {
    pub input: PrimitiveId,
    /// One weights primitive per split group.
    pub weights: Vec<PrimitiveId>,
    /// Empty, or one bias primitive per split group.
    pub bias: Vec<PrimitiveId>,
    pub stride: Spatial,
    pub dilation: Spatial,
    pub input_offset: InputOffset,
    /// Requested output extent; `None` derives it from the window.
    pub output_size: Option<Shape>,
    pub activation: FusedActivation,
}

impl ConvolutionDesc {
    pub fn new(
        input: impl Into<PrimitiveId>,
        weights: impl Into<PrimitiveId>,
        bias: Option<PrimitiveId>,
    ) -> Self {
        Self {
            input: input.into(),
            weights: vec![weights.into()],
            bias: bias.into_iter().collect(),
            stride: Spatial::ONE,
            dilation: Spatial::ONE,
            input_offset: InputOffset::default(),
            output_size: None,
            activation: FusedActivation::default(),
        }
    }

    pub fn split(&self) -> usize {
        self.weights.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnectedDesc {
    pub input: PrimitiveId,
    pub weights: PrimitiveId,
    pub bias: Option<PrimitiveId>,
    pub activation: FusedActivation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolingMode {
    Max,
    Average,
    /// Average over the in-bounds part of the window only.
    AverageNoPadding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolingDesc {
    pub input: PrimitiveId,
    pub mode: PoolingMode,
    pub size: Spatial,
    pub stride: Spatial,
    pub input_offset: InputOffset,
    pub output_size: Option<Shape>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivationDesc {
    pub input: PrimitiveId,
    pub activation: FusedActivation,
    /// Per-feature slope read at run time instead of `activation.m`.
    pub slope: Option<PrimitiveId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseDesc {
    pub inputs: Vec<PrimitiveId>,
    pub mode: EltwiseMode,
    /// Empty, or one multiplier per input.
    pub coefficients: Vec<f32>,
    pub activation: FusedActivation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReorderDesc {
    pub input: PrimitiveId,
    pub output_format: Format,
    pub output_data_type: DataType,
    pub subtract_per_feature: Vec<f32>,
}

impl ReorderDesc {
    pub fn to_layout(input: impl Into<PrimitiveId>, layout: &Layout) -> Self {
        Self {
            input: input.into(),
            output_format: layout.format,
            output_data_type: layout.data_type,
            subtract_per_feature: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxDesc {
    pub input: PrimitiveId,
    pub dimension: SoftmaxDim,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenationDesc {
    pub inputs: Vec<PrimitiveId>,
    pub axis: ConcatAxis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormDesc {
    pub input: PrimitiveId,
    pub mean: PrimitiveId,
    pub variance: PrimitiveId,
    pub epsilon: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDesc {
    pub input: PrimitiveId,
    pub scale: PrimitiveId,
    pub bias: Option<PrimitiveId>,
}

/// A convolution whose output is batch-normalized and then scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedConvBnScaleDesc {
    pub conv: ConvolutionDesc,
    pub mean: PrimitiveId,
    pub variance: PrimitiveId,
    pub epsilon: f32,
    pub scale: PrimitiveId,
    pub scale_bias: Option<PrimitiveId>,
}

/// Operation tag, used to key the per-kind registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    InputLayout,
    Data,
    Convolution,
    FullyConnected,
    Pooling,
    Activation,
    Eltwise,
    Reorder,
    Softmax,
    Concatenation,
    BatchNorm,
    Scale,
    FusedConvBnScale,
}

impl PrimitiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveType::InputLayout => "input_layout",
            PrimitiveType::Data => "data",
            PrimitiveType::Convolution => "convolution",
            PrimitiveType::FullyConnected => "fully_connected",
            PrimitiveType::Pooling => "pooling",
            PrimitiveType::Activation => "activation",
            PrimitiveType::Eltwise => "eltwise",
            PrimitiveType::Reorder => "reorder",
            PrimitiveType::Softmax => "softmax",
            PrimitiveType::Concatenation => "concatenation",
            PrimitiveType::BatchNorm => "batch_norm",
            PrimitiveType::Scale => "scale",
            PrimitiveType::FusedConvBnScale => "fused_conv_bn_scale",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveKind {
    /// Externally populated input with a fixed layout.
    InputLayout(Layout),
    /// Literal buffer in the given layout.
    Data { layout: Layout, values: HostData },
    Convolution(ConvolutionDesc),
    FullyConnected(FullyConnectedDesc),
    Pooling(PoolingDesc),
    Activation(ActivationDesc),
    Eltwise(EltwiseDesc),
    Reorder(ReorderDesc),
    Softmax(SoftmaxDesc),
    Concatenation(ConcatenationDesc),
    BatchNorm(BatchNormDesc),
    Scale(ScaleDesc),
    FusedConvBnScale(FusedConvBnScaleDesc),
}

fn conv_dependencies(conv: &ConvolutionDesc) -> impl Iterator<Item = &PrimitiveId> {
    std::iter::once(&conv.input)
        .chain(&conv.weights)
        .chain(&conv.bias)
}

fn conv_dependencies_mut(conv: &mut ConvolutionDesc) -> impl Iterator<Item = &mut PrimitiveId> {
    std::iter::once(&mut conv.input)
        .chain(conv.weights.iter_mut())
        .chain(conv.bias.iter_mut())
}

impl PrimitiveKind {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            PrimitiveKind::InputLayout(_) => PrimitiveType::InputLayout,
            PrimitiveKind::Data { .. } => PrimitiveType::Data,
            PrimitiveKind::Convolution(_) => PrimitiveType::Convolution,
            PrimitiveKind::FullyConnected(_) => PrimitiveType::FullyConnected,
            PrimitiveKind::Pooling(_) => PrimitiveType::Pooling,
            PrimitiveKind::Activation(_) => PrimitiveType::Activation,
            PrimitiveKind::Eltwise(_) => PrimitiveType::Eltwise,
            PrimitiveKind::Reorder(_) => PrimitiveType::Reorder,
            PrimitiveKind::Softmax(_) => PrimitiveType::Softmax,
            PrimitiveKind::Concatenation(_) => PrimitiveType::Concatenation,
            PrimitiveKind::BatchNorm(_) => PrimitiveType::BatchNorm,
            PrimitiveKind::Scale(_) => PrimitiveType::Scale,
            PrimitiveKind::FusedConvBnScale(_) => PrimitiveType::FusedConvBnScale,
        }
    }

    /// Dependency ids in argument order.
    pub fn dependencies(&self) -> Vec<&PrimitiveId> {
        match self {
            PrimitiveKind::InputLayout(_) | PrimitiveKind::Data { .. } => Vec::new(),
            PrimitiveKind::Convolution(p) => conv_dependencies(p).collect(),
            PrimitiveKind::FullyConnected(p) => std::iter::once(&p.input)
                .chain(std::iter::once(&p.weights))
                .chain(&p.bias)
                .collect(),
            PrimitiveKind::Pooling(p) => vec![&p.input],
            PrimitiveKind::Activation(p) => std::iter::once(&p.input).chain(&p.slope).collect(),
            PrimitiveKind::Eltwise(p) => p.inputs.iter().collect(),
            PrimitiveKind::Reorder(p) => vec![&p.input],
            PrimitiveKind::Softmax(p) => vec![&p.input],
            PrimitiveKind::Concatenation(p) => p.inputs.iter().collect(),
            PrimitiveKind::BatchNorm(p) => vec![&p.input, &p.mean, &p.variance],
            PrimitiveKind::Scale(p) => vec![&p.input, &p.scale].into_iter().chain(&p.bias).collect(),
            PrimitiveKind::FusedConvBnScale(p) => conv_dependencies(&p.conv)
                .chain([&p.mean, &p.variance, &p.scale])
                .chain(&p.scale_bias)
                .collect(),
        }
    }

    /// Same slots as [`dependencies`](Self::dependencies), writable.
    pub fn dependencies_mut(&mut self) -> Vec<&mut PrimitiveId> {
        match self {
            PrimitiveKind::InputLayout(_) | PrimitiveKind::Data { .. } => Vec::new(),
            PrimitiveKind::Convolution(p) => conv_dependencies_mut(p).collect(),
            PrimitiveKind::FullyConnected(p) => std::iter::once(&mut p.input)
                .chain(std::iter::once(&mut p.weights))
                .chain(p.bias.iter_mut())
                .collect(),
            PrimitiveKind::Pooling(p) => vec![&mut p.input],
            PrimitiveKind::Activation(p) => std::iter::once(&mut p.input)
                .chain(p.slope.iter_mut())
                .collect(),
            PrimitiveKind::Eltwise(p) => p.inputs.iter_mut().collect(),
            PrimitiveKind::Reorder(p) => vec![&mut p.input],
            PrimitiveKind::Softmax(p) => vec![&mut p.input],
            PrimitiveKind::Concatenation(p) => p.inputs.iter_mut().collect(),
            PrimitiveKind::BatchNorm(p) => vec![&mut p.input, &mut p.mean, &mut p.variance],
            PrimitiveKind::Scale(p) => vec![&mut p.input, &mut p.scale]
                .into_iter()
                .chain(p.bias.iter_mut())
                .collect(),
            PrimitiveKind::FusedConvBnScale(p) => conv_dependencies_mut(&mut p.conv)
                .chain([&mut p.mean, &mut p.variance, &mut p.scale])
                .chain(p.scale_bias.iter_mut())
                .collect(),
        }
    }

    /// Activation the primitive applies to its own result.
    pub fn activation(&self) -> FusedActivation {
        match self {
            PrimitiveKind::Convolution(p) => p.activation,
            PrimitiveKind::FullyConnected(p) => p.activation,
            PrimitiveKind::Eltwise(p) => p.activation,
            PrimitiveKind::FusedConvBnScale(p) => p.conv.activation,
            _ => FusedActivation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveDesc {
    pub id: PrimitiveId,
    pub output_padding: Padding,
    pub kind: PrimitiveKind,
}

impl PrimitiveDesc {
    pub fn new(id: impl Into<PrimitiveId>, kind: PrimitiveKind) -> Self {
        Self {
            id: id.into(),
            output_padding: Padding::none(),
            kind,
        }
    }

    pub fn with_output_padding(mut self, padding: Padding) -> Self {
        self.output_padding = padding;
        self
    }

    pub fn input_layout(id: impl Into<PrimitiveId>, layout: Layout) -> Self {
        Self::new(id, PrimitiveKind::InputLayout(layout))
    }

    pub fn data(id: impl Into<PrimitiveId>, layout: Layout, values: HostData) -> Self {
        Self::new(id, PrimitiveKind::Data { layout, values })
    }

    pub fn reorder(id: impl Into<PrimitiveId>, input: impl Into<PrimitiveId>, layout: &Layout) -> Self {
        Self::new(id, PrimitiveKind::Reorder(ReorderDesc::to_layout(input, layout)))
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.kind.primitive_type()
    }

    pub fn dependencies(&self) -> Vec<&PrimitiveId> {
        self.kind.dependencies()
    }
}
