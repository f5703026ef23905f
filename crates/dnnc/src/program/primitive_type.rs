//! Per-kind behaviour of graph nodes.
//!
//! Each [`PrimitiveType`] has one [`PrimitiveTypeOps`] entry in a
//! [`PrimitiveTypeRegistry`]: how the node's output layout follows from its
//! inputs, which checks it must pass before binding, and how it is described
//! to the kernel selector.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dnnc_kernel_selector::params::{
    ActivationParams, BaseParams, BatchNormParams, ConcatenationParams, ConvolutionParams,
    EltwiseParams, FullyConnectedParams, FusedConvBnScaleParams, KernelDividerMode, PoolRemainder,
    PoolType, PoolingParams, ReorderParams, ScaleParams, Size2, SoftmaxParams, WeightBiasParams,
    WeightsReorderParams,
};
use dnnc_kernel_selector::{KernelData, KernelSelector, OptionalParams, Params};

use crate::error::CompileError;
use crate::kernel_params::{
    bias_tensor, data_tensor, fc_input_tensor, fc_output_tensor, weights_tensor,
};
use crate::layout::{Format, Layout, Shape};
use crate::primitives::{
    ConcatAxis, ConvolutionDesc, PoolingMode, PrimitiveKind, PrimitiveType, Spatial,
};

use super::node::ProgramNode;

pub trait PrimitiveTypeOps: Send + Sync {
    fn primitive_type(&self) -> PrimitiveType;

    /// Output layout from the layouts of the node's dependencies, in argument order.
    fn calc_output_layout(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
    ) -> Result<Layout, CompileError>;

    /// Structural checks run right before a kernel is bound.
    fn validate(&self, _node: &ProgramNode, _inputs: &[Layout]) -> Result<(), CompileError> {
        Ok(())
    }

    /// Kernel request for the node, `None` for kinds that run no kernel.
    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError>;

    fn optional_params(&self) -> OptionalParams {
        OptionalParams::default()
    }

    fn choose_impl(
        &self,
        selector: &KernelSelector,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<KernelData>, CompileError> {
        let Some(params) = self.kernel_params(node, inputs, output)? else {
            return Ok(None);
        };
        selector
            .select(&params, &self.optional_params())
            .map(Some)
            .map_err(|source| CompileError::NoImplementation {
                id: node.id().to_string(),
                source,
            })
    }
}

/// Kind to behaviour table. New kinds are added with [`register`](Self::register).
#[derive(Clone, Default)]
pub struct PrimitiveTypeRegistry {
    by_type: HashMap<PrimitiveType, Arc<dyn PrimitiveTypeOps>>,
}

impl PrimitiveTypeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let builtin: [Arc<dyn PrimitiveTypeOps>; 13] = [
            Arc::new(InputLayoutOps),
            Arc::new(DataOps),
            Arc::new(ConvolutionOps),
            Arc::new(FullyConnectedOps),
            Arc::new(PoolingOps),
            Arc::new(ActivationOps),
            Arc::new(EltwiseOps),
            Arc::new(ReorderOps),
            Arc::new(SoftmaxOps),
            Arc::new(ConcatenationOps),
            Arc::new(BatchNormOps),
            Arc::new(ScaleOps),
            Arc::new(FusedConvBnScaleOps),
        ];
        for ops in builtin {
            registry.register(ops);
        }
        registry
    }

    /// Adds `ops`, replacing any earlier entry for the same kind.
    pub fn register(&mut self, ops: Arc<dyn PrimitiveTypeOps>) {
        self.by_type.insert(ops.primitive_type(), ops);
    }

    pub fn get(&self, ty: PrimitiveType) -> Result<&dyn PrimitiveTypeOps, CompileError> {
        self.by_type
            .get(&ty)
            .map(|ops| ops.as_ref())
            .ok_or_else(|| {
                CompileError::invalid_graph(format!("no behaviour registered for {}", ty.as_str()))
            })
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for PrimitiveTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.by_type.keys().map(|ty| ty.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("PrimitiveTypeRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

/// Unwraps the descriptor a kind's ops expect or fails with the node id.
macro_rules! expect_kind {
    ($node:expr, $variant:ident) => {
        match $node.kind() {
            PrimitiveKind::$variant(desc) => desc,
            other => {
                return Err(CompileError::invalid_primitive(
                    $node.id(),
                    format!(
                        "{} behaviour applied to a {} node",
                        stringify!($variant),
                        other.primitive_type().as_str()
                    ),
                ))
            }
        }
    };
}

fn expect_inputs<'a>(
    node: &ProgramNode,
    inputs: &'a [Layout],
    at_least: usize,
) -> Result<&'a [Layout], CompileError> {
    if inputs.len() < at_least {
        return Err(CompileError::invalid_primitive(
            node.id(),
            format!("expects {at_least} inputs, has {}", inputs.len()),
        ));
    }
    Ok(inputs)
}

/// Data formats keep the input format, anything else produces `bfyx`.
fn data_format(format: Format) -> Format {
    if format.is_weights() || format == Format::BsXsXsv8Bsv8 {
        Format::Bfyx
    } else {
        format
    }
}

fn finish(node: &ProgramNode, layout: Layout) -> Layout {
    layout.with_padding(node.output_padding())
}

fn base_params(node: &ProgramNode, inputs: &[Layout], output: &Layout) -> Result<BaseParams, CompileError> {
    let id = node.id();
    let tensors = inputs
        .iter()
        .map(|layout| data_tensor(id, layout))
        .collect::<Result<Vec<_>, _>>()?;
    let mut base = BaseParams::new(id, tensors, data_tensor(id, output)?);
    base.activation = node.activation();
    Ok(base)
}

fn size2(spatial: Spatial) -> Size2 {
    Size2::new(spatial.x, spatial.y)
}

/// Output extent of a sliding window along one axis, `None` when the window
/// does not fit or a step is zero. Pooling rounds the last partial window
/// up, convolution drops it.
pub(crate) fn sliding_window_extent(
    input: usize,
    window: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
    ceil: bool,
) -> Option<usize> {
    if stride == 0 || dilation == 0 || window == 0 {
        return None;
    }
    let extent = (window - 1) * dilation + 1;
    let span = (input + 2 * pad).checked_sub(extent)?;
    let steps = if ceil { span.div_ceil(stride) } else { span / stride };
    Some(steps + 1)
}

fn window_output(
    node: &ProgramNode,
    input: usize,
    window: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
    ceil: bool,
) -> Result<usize, CompileError> {
    sliding_window_extent(input, window, stride, dilation, pad, ceil).ok_or_else(|| {
        CompileError::invalid_primitive(
            node.id(),
            format!(
                "window {window} (stride {stride}, dilation {dilation}) does not fit an input of {input} padded by {pad}"
            ),
        )
    })
}

fn convolution_layout(
    node: &ProgramNode,
    conv: &ConvolutionDesc,
    inputs: &[Layout],
) -> Result<Layout, CompileError> {
    let split = conv.split();
    let inputs = expect_inputs(node, inputs, 1 + split + conv.bias.len())?;
    let input = inputs[0];
    let weights = inputs[1];
    let pad = conv.input_offset.padding();
    let size = match conv.output_size {
        Some(requested) => Shape::new(input.size.batch, weights.size.batch * split, requested.x, requested.y),
        None => Shape::new(
            input.size.batch,
            weights.size.batch * split,
            window_output(node, input.size.x, weights.size.x, conv.stride.x, conv.dilation.x, pad.x, false)?,
            window_output(node, input.size.y, weights.size.y, conv.stride.y, conv.dilation.y, pad.y, false)?,
        ),
    };
    Ok(finish(
        node,
        Layout::new(input.data_type, data_format(input.format), size),
    ))
}

fn validate_convolution(
    node: &ProgramNode,
    conv: &ConvolutionDesc,
    inputs: &[Layout],
) -> Result<(), CompileError> {
    let id = node.id();
    let split = conv.split();
    if split == 0 {
        return Err(CompileError::invalid_primitive(id, "convolution needs weights"));
    }
    if !conv.bias.is_empty() && conv.bias.len() != split {
        return Err(CompileError::invalid_primitive(
            id,
            format!("{split} weights groups but {} biases", conv.bias.len()),
        ));
    }
    let inputs = expect_inputs(node, inputs, 1 + split + conv.bias.len())?;
    let input = inputs[0];
    let ofm = inputs[1].size.batch;
    if inputs[1..=split].iter().any(|w| w.size != inputs[1].size) {
        return Err(CompileError::invalid_primitive(id, "split groups differ in weights shape"));
    }
    for bias in &inputs[1 + split..] {
        if bias.count() != ofm {
            return Err(CompileError::invalid_primitive(
                id,
                format!("bias has {} elements for {ofm} output features per group", bias.count()),
            ));
        }
    }
    for (what, value) in [("stride", conv.stride), ("dilation", conv.dilation)] {
        if value.x == 0 || value.y == 0 {
            return Err(CompileError::invalid_primitive(id, format!("{what} must be positive")));
        }
    }
    if conv.dilation != Spatial::ONE && input.size.batch > 1 {
        return Err(CompileError::invalid_primitive(
            id,
            "dilated convolution supports a batch of one only",
        ));
    }
    Ok(())
}

fn convolution_params(
    node: &ProgramNode,
    conv: &ConvolutionDesc,
    data_inputs: &[Layout],
    inputs: &[Layout],
    output: &Layout,
) -> Result<ConvolutionParams, CompileError> {
    let split = conv.split();
    let inputs = expect_inputs(node, inputs, 1 + split + conv.bias.len())?;
    let weights = weights_tensor(node.id(), &inputs[1])?;
    let bias = bias_tensor(&inputs[1 + split..1 + split + conv.bias.len()]);
    Ok(ConvolutionParams {
        base: base_params(node, data_inputs, output)?,
        filter_size: Size2::new(weights.x, weights.y),
        weight_bias: WeightBiasParams {
            weights,
            bias: bias.into_iter().collect(),
        },
        stride: size2(conv.stride),
        dilation: size2(conv.dilation),
        padding: size2(conv.input_offset.padding()),
        split,
    })
}

fn weights_optional_params() -> OptionalParams {
    OptionalParams {
        allow_weights_reorder: true,
        ..OptionalParams::default()
    }
}

pub struct InputLayoutOps;

impl PrimitiveTypeOps for InputLayoutOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::InputLayout
    }

    fn calc_output_layout(&self, node: &ProgramNode, _inputs: &[Layout]) -> Result<Layout, CompileError> {
        let layout = expect_kind!(node, InputLayout);
        Ok(layout.with_padding(layout.padding.max(&node.output_padding())))
    }

    fn kernel_params(&self, _: &ProgramNode, _: &[Layout], _: &Layout) -> Result<Option<Params>, CompileError> {
        Ok(None)
    }
}

pub struct DataOps;

impl PrimitiveTypeOps for DataOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Data
    }

    fn calc_output_layout(&self, node: &ProgramNode, _inputs: &[Layout]) -> Result<Layout, CompileError> {
        match node.kind() {
            PrimitiveKind::Data { layout, values } => {
                if values.len() != layout.buffer_size() {
                    return Err(CompileError::invalid_primitive(
                        node.id(),
                        format!("{} values for a buffer of {}", values.len(), layout.buffer_size()),
                    ));
                }
                Ok(*layout)
            }
            other => Err(CompileError::invalid_primitive(
                node.id(),
                format!("Data behaviour applied to a {} node", other.primitive_type().as_str()),
            )),
        }
    }

    fn kernel_params(&self, _: &ProgramNode, _: &[Layout], _: &Layout) -> Result<Option<Params>, CompileError> {
        Ok(None)
    }
}

pub struct ConvolutionOps;

impl PrimitiveTypeOps for ConvolutionOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Convolution
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let conv = expect_kind!(node, Convolution);
        convolution_layout(node, conv, inputs)
    }

    fn validate(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<(), CompileError> {
        let conv = expect_kind!(node, Convolution);
        validate_convolution(node, conv, inputs)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let conv = expect_kind!(node, Convolution);
        let params = convolution_params(node, conv, &inputs[..1], inputs, output)?;
        Ok(Some(Params::Convolution(params)))
    }

    fn optional_params(&self) -> OptionalParams {
        weights_optional_params()
    }
}

pub struct FullyConnectedOps;

impl PrimitiveTypeOps for FullyConnectedOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::FullyConnected
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, FullyConnected);
        let inputs = expect_inputs(node, inputs, 2)?;
        let (input, weights) = (inputs[0], inputs[1]);
        let format = if input.format == Format::Yxfb {
            Format::Yxfb
        } else {
            Format::Bfyx
        };
        Ok(finish(
            node,
            Layout::new(
                input.data_type,
                format,
                Shape::new(input.size.batch, weights.size.batch, 1, 1),
            ),
        ))
    }

    fn validate(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<(), CompileError> {
        let fc = expect_kind!(node, FullyConnected);
        let inputs = expect_inputs(node, inputs, 2)?;
        let (input, weights) = (inputs[0], inputs[1]);
        let per_batch = input.size.feature * input.size.x * input.size.y;
        let consumed = weights.size.feature * weights.size.x * weights.size.y;
        if per_batch != consumed {
            return Err(CompileError::invalid_primitive(
                node.id(),
                format!("weights consume {consumed} inputs per batch, input provides {per_batch}"),
            ));
        }
        if fc.bias.is_some() {
            let bias = expect_inputs(node, inputs, 3)?[2];
            if bias.count() != weights.size.batch {
                return Err(CompileError::invalid_primitive(
                    node.id(),
                    format!("bias has {} elements for {} outputs", bias.count(), weights.size.batch),
                ));
            }
        }
        Ok(())
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let _ = expect_kind!(node, FullyConnected);
        let id = node.id();
        let inputs = expect_inputs(node, inputs, 2)?;
        let mut base = BaseParams::new(
            id,
            vec![fc_input_tensor(id, &inputs[0])?],
            fc_output_tensor(id, output)?,
        );
        base.activation = node.activation();
        Ok(Some(Params::FullyConnected(FullyConnectedParams {
            base,
            weight_bias: WeightBiasParams {
                weights: weights_tensor(id, &inputs[1])?,
                bias: bias_tensor(&inputs[2..]).into_iter().collect(),
            },
        })))
    }

    fn optional_params(&self) -> OptionalParams {
        weights_optional_params()
    }
}

pub struct PoolingOps;

impl PrimitiveTypeOps for PoolingOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Pooling
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let pool = expect_kind!(node, Pooling);
        let input = expect_inputs(node, inputs, 1)?[0];
        let pad = pool.input_offset.padding();
        let (x, y) = match pool.output_size {
            Some(requested) => (requested.x, requested.y),
            None => (
                window_output(node, input.size.x, pool.size.x, pool.stride.x, 1, pad.x, true)?,
                window_output(node, input.size.y, pool.size.y, pool.stride.y, 1, pad.y, true)?,
            ),
        };
        Ok(finish(
            node,
            Layout::new(
                input.data_type,
                data_format(input.format),
                Shape::new(input.size.batch, input.size.feature, x, y),
            ),
        ))
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let pool = expect_kind!(node, Pooling);
        let (pool_type, divider) = match pool.mode {
            PoolingMode::Max => (PoolType::Max, KernelDividerMode::Fixed),
            PoolingMode::Average => (PoolType::Average, KernelDividerMode::Fixed),
            PoolingMode::AverageNoPadding => (PoolType::Average, KernelDividerMode::DynamicWithPadding),
        };
        Ok(Some(Params::Pooling(PoolingParams {
            base: base_params(node, &inputs[..1], output)?,
            pool_type,
            remainder: PoolRemainder::Ceil,
            divider,
            pool_size: size2(pool.size),
            pool_stride: size2(pool.stride),
            pool_pad: size2(pool.input_offset.padding()),
        })))
    }
}

/// Output is the first input's layout, unpadded unless padding was requested.
fn same_as_input(node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
    let input = expect_inputs(node, inputs, 1)?[0];
    Ok(finish(
        node,
        Layout::new(input.data_type, data_format(input.format), input.size),
    ))
}

pub struct ActivationOps;

impl PrimitiveTypeOps for ActivationOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Activation
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, Activation);
        same_as_input(node, inputs)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let activation = expect_kind!(node, Activation);
        let mut base = base_params(node, inputs, output)?;
        base.activation = activation.activation;
        Ok(Some(Params::Activation(ActivationParams { base })))
    }
}

pub struct EltwiseOps;

impl PrimitiveTypeOps for EltwiseOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Eltwise
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, Eltwise);
        let first = expect_inputs(node, inputs, 1)?[0];
        if let Some(other) = inputs.iter().find(|layout| layout.size != first.size) {
            return Err(CompileError::invalid_primitive(
                node.id(),
                format!("inputs differ in size: {:?} and {:?}", first.size, other.size),
            ));
        }
        same_as_input(node, inputs)
    }

    fn validate(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<(), CompileError> {
        let eltwise = expect_kind!(node, Eltwise);
        if !eltwise.coefficients.is_empty() && eltwise.coefficients.len() != inputs.len() {
            return Err(CompileError::invalid_primitive(
                node.id(),
                format!("{} coefficients for {} inputs", eltwise.coefficients.len(), inputs.len()),
            ));
        }
        Ok(())
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let eltwise = expect_kind!(node, Eltwise);
        Ok(Some(Params::Eltwise(EltwiseParams {
            base: base_params(node, inputs, output)?,
            mode: eltwise.mode,
            coefficients: eltwise.coefficients.clone(),
        })))
    }
}

pub struct ReorderOps;

impl PrimitiveTypeOps for ReorderOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Reorder
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let reorder = expect_kind!(node, Reorder);
        let input = expect_inputs(node, inputs, 1)?[0];
        Ok(finish(
            node,
            Layout::new(reorder.output_data_type, reorder.output_format, input.size),
        ))
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let reorder = expect_kind!(node, Reorder);
        let id = node.id();
        if reorder.output_format.is_weights() {
            let input = expect_inputs(node, inputs, 1)?[0];
            return Ok(Some(Params::WeightsReorder(WeightsReorderParams {
                layer_id: id.to_string(),
                input: weights_tensor(id, &input)?,
                output: weights_tensor(id, output)?,
            })));
        }
        Ok(Some(Params::Reorder(ReorderParams {
            base: base_params(node, inputs, output)?,
            subtract_per_feature: reorder.subtract_per_feature.clone(),
        })))
    }
}

pub struct SoftmaxOps;

impl PrimitiveTypeOps for SoftmaxOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Softmax
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, Softmax);
        same_as_input(node, inputs)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let softmax = expect_kind!(node, Softmax);
        Ok(Some(Params::Softmax(SoftmaxParams {
            base: base_params(node, inputs, output)?,
            dim: softmax.dimension,
        })))
    }
}

pub struct ConcatenationOps;

impl PrimitiveTypeOps for ConcatenationOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Concatenation
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let concat = expect_kind!(node, Concatenation);
        let first = expect_inputs(node, inputs, 1)?[0];
        let along = |shape: &Shape| match concat.axis {
            ConcatAxis::Batch => shape.batch,
            ConcatAxis::Feature => shape.feature,
            ConcatAxis::X => shape.x,
            ConcatAxis::Y => shape.y,
        };
        let without_axis = |shape: &Shape| {
            let mut shape = *shape;
            match concat.axis {
                ConcatAxis::Batch => shape.batch = 0,
                ConcatAxis::Feature => shape.feature = 0,
                ConcatAxis::X => shape.x = 0,
                ConcatAxis::Y => shape.y = 0,
            }
            shape
        };
        if inputs
            .iter()
            .any(|layout| without_axis(&layout.size) != without_axis(&first.size))
        {
            return Err(CompileError::invalid_primitive(
                node.id(),
                "inputs differ outside the concatenation axis",
            ));
        }
        let total: usize = inputs.iter().map(|layout| along(&layout.size)).sum();
        let mut size = first.size;
        match concat.axis {
            ConcatAxis::Batch => size.batch = total,
            ConcatAxis::Feature => size.feature = total,
            ConcatAxis::X => size.x = total,
            ConcatAxis::Y => size.y = total,
        }
        Ok(finish(
            node,
            Layout::new(first.data_type, data_format(first.format), size),
        ))
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let concat = expect_kind!(node, Concatenation);
        Ok(Some(Params::Concatenation(ConcatenationParams {
            base: base_params(node, inputs, output)?,
            axis: concat.axis,
        })))
    }
}

pub struct BatchNormOps;

impl PrimitiveTypeOps for BatchNormOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::BatchNorm
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, BatchNorm);
        same_as_input(node, expect_inputs(node, inputs, 3)?)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let bn = expect_kind!(node, BatchNorm);
        Ok(Some(Params::BatchNorm(BatchNormParams {
            base: base_params(node, inputs, output)?,
            epsilon: bn.epsilon,
        })))
    }
}

pub struct ScaleOps;

impl PrimitiveTypeOps for ScaleOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Scale
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let _ = expect_kind!(node, Scale);
        same_as_input(node, expect_inputs(node, inputs, 2)?)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let _ = expect_kind!(node, Scale);
        Ok(Some(Params::Scale(ScaleParams {
            base: base_params(node, inputs, output)?,
        })))
    }
}

pub struct FusedConvBnScaleOps;

impl PrimitiveTypeOps for FusedConvBnScaleOps {
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::FusedConvBnScale
    }

    fn calc_output_layout(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<Layout, CompileError> {
        let fused = expect_kind!(node, FusedConvBnScale);
        convolution_layout(node, &fused.conv, inputs)
    }

    fn validate(&self, node: &ProgramNode, inputs: &[Layout]) -> Result<(), CompileError> {
        let fused = expect_kind!(node, FusedConvBnScale);
        validate_convolution(node, &fused.conv, inputs)
    }

    fn kernel_params(
        &self,
        node: &ProgramNode,
        inputs: &[Layout],
        output: &Layout,
    ) -> Result<Option<Params>, CompileError> {
        let fused = expect_kind!(node, FusedConvBnScale);
        let conv_args = 1 + fused.conv.split() + fused.conv.bias.len();
        let inputs = expect_inputs(node, inputs, conv_args + 3)?;
        let data_inputs: Vec<Layout> = std::iter::once(inputs[0])
            .chain(inputs[conv_args..].iter().copied())
            .collect();
        let conv = convolution_params(node, &fused.conv, &data_inputs, inputs, output)?;
        Ok(Some(Params::FusedConvBnScale(FusedConvBnScaleParams {
            conv,
            epsilon: fused.epsilon,
        })))
    }

    fn optional_params(&self) -> OptionalParams {
        weights_optional_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DataType;
    use crate::primitives::{InputOffset, PrimitiveDesc};

    fn conv_node(conv: ConvolutionDesc) -> ProgramNode {
        ProgramNode::new(PrimitiveDesc::new("conv", PrimitiveKind::Convolution(conv)))
    }

    #[test]
    fn convolution_output_follows_the_window() {
        let conv = ConvolutionDesc {
            stride: Spatial::new(2, 2),
            input_offset: InputOffset::new(-1, -1),
            ..ConvolutionDesc::new("in", "w", None)
        };
        let inputs = [
            Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 3, 8, 8)),
            Layout::new(DataType::F32, Format::Oiyx, Shape::new(16, 3, 3, 3)),
        ];
        let layout = ConvolutionOps
            .calc_output_layout(&conv_node(conv), &inputs)
            .unwrap();
        assert_eq!(layout.size, Shape::new(1, 16, 4, 4));
        assert_eq!(layout.format, Format::Bfyx);
    }

    #[test]
    fn pooling_rounds_partial_windows_up() {
        let node = ProgramNode::new(PrimitiveDesc::new(
            "pool",
            PrimitiveKind::Pooling(crate::primitives::PoolingDesc {
                input: "in".into(),
                mode: PoolingMode::Max,
                size: Spatial::new(2, 2),
                stride: Spatial::new(2, 2),
                input_offset: InputOffset::default(),
                output_size: None,
            }),
        ));
        let input = [Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 4, 5, 5))];
        let layout = PoolingOps.calc_output_layout(&node, &input).unwrap();
        assert_eq!((layout.size.x, layout.size.y), (3, 3));
    }

    #[test]
    fn grouped_convolution_needs_matching_bias_count() {
        let conv = ConvolutionDesc {
            weights: vec!["w0".into(), "w1".into()],
            bias: vec!["b0".into()],
            ..ConvolutionDesc::new("in", "unused", None)
        };
        let inputs = [
            Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 4, 4, 4)),
            Layout::new(DataType::F32, Format::Oiyx, Shape::new(2, 2, 1, 1)),
            Layout::new(DataType::F32, Format::Oiyx, Shape::new(2, 2, 1, 1)),
            Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 1, 2, 1)),
        ];
        let err = ConvolutionOps
            .validate(&conv_node(conv), &inputs)
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPrimitive { .. }));
    }

    #[test]
    fn registry_covers_every_kind() {
        let registry = PrimitiveTypeRegistry::builtin();
        assert_eq!(registry.len(), 13);
        assert!(registry.get(PrimitiveType::FusedConvBnScale).is_ok());
    }
}
