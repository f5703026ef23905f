use anyhow::{anyhow, bail, ensure, Result};
use dnnc::constant::{ConstantEvaluator, ConstantValue};
use dnnc::layout::{Layout, Shape};
use dnnc::primitives::{
    ActivationDesc, ActivationFunction, ConcatAxis, ConcatenationDesc, EltwiseDesc, EltwiseMode,
    FusedActivation, HostData, PoolingDesc, PoolingMode, PrimitiveKind, ReorderDesc, SoftmaxDim,
};
use dnnc::program::ProgramNode;

/// Logical tensor on the host, dense in `b, f, y, x` order without padding.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub size: Shape,
    pub values: Vec<f32>,
}

impl HostTensor {
    pub fn zeros(size: Shape) -> Self {
        Self {
            size,
            values: vec![0.0; size.count()],
        }
    }

    fn index(&self, b: usize, f: usize, x: usize, y: usize) -> usize {
        ((b * self.size.feature + f) * self.size.y + y) * self.size.x + x
    }

    pub fn at(&self, b: usize, f: usize, x: usize, y: usize) -> f32 {
        self.values[self.index(b, f, x, y)]
    }

    /// Value at `(b, f, x, y)` of an output of this tensor's rank, repeating
    /// any dimension of extent one.
    pub fn broadcast_at(&self, b: usize, f: usize, x: usize, y: usize) -> f32 {
        let pick = |i: usize, n: usize| if n == 1 { 0 } else { i };
        self.at(
            pick(b, self.size.batch),
            pick(f, self.size.feature),
            pick(x, self.size.x),
            pick(y, self.size.y),
        )
    }

    pub fn set(&mut self, b: usize, f: usize, x: usize, y: usize, value: f32) {
        let idx = self.index(b, f, x, y);
        self.values[idx] = value;
    }

    fn for_each_coord(size: Shape, mut visit: impl FnMut(usize, usize, usize, usize)) {
        for b in 0..size.batch {
            for f in 0..size.feature {
                for y in 0..size.y {
                    for x in 0..size.x {
                        visit(b, f, x, y);
                    }
                }
            }
        }
    }

    fn map(&self, op: impl Fn(f32) -> f32) -> HostTensor {
        HostTensor {
            size: self.size,
            values: self.values.iter().map(|&v| op(v)).collect(),
        }
    }
}

/// Whether every logical element of `layout` has a known buffer position.
pub fn is_addressable(layout: &Layout) -> bool {
    layout.count() == 0 || layout.element_offset(0, 0, 0, 0).is_some()
}

/// Reads the logical elements of a buffer laid out as `layout`.
pub fn unpack(layout: &Layout, values: &HostData) -> Result<HostTensor> {
    ensure!(
        values.len() == layout.buffer_size(),
        "buffer holds {} elements, layout {:?} needs {}",
        values.len(),
        layout.format,
        layout.buffer_size()
    );
    let raw = values.to_f32_vec();
    let mut tensor = HostTensor::zeros(layout.size);
    let mut missing = None;
    HostTensor::for_each_coord(layout.size, |b, f, x, y| match layout.element_offset(b, f, x, y) {
        Some(offset) => tensor.set(b, f, x, y, raw[offset]),
        None => missing = Some((b, f, x, y)),
    });
    if let Some(coord) = missing {
        bail!("{:?} does not place element {coord:?} on the host", layout.format);
    }
    Ok(tensor)
}

/// Writes `tensor` into a zero-initialized buffer laid out as `layout`.
pub fn pack(tensor: &HostTensor, layout: &Layout) -> Result<HostData> {
    ensure!(
        tensor.size == layout.size,
        "tensor of {:?} cannot fill layout of {:?}",
        tensor.size,
        layout.size
    );
    let mut raw = vec![0.0f32; layout.buffer_size()];
    let mut missing = None;
    HostTensor::for_each_coord(layout.size, |b, f, x, y| match layout.element_offset(b, f, x, y) {
        Some(offset) => raw[offset] = tensor.at(b, f, x, y),
        None => missing = Some((b, f, x, y)),
    });
    if let Some(coord) = missing {
        bail!("{:?} does not place element {coord:?} on the host", layout.format);
    }
    Ok(HostData::from_f32(layout.data_type, &raw))
}

pub fn apply_activation(activation: &FusedActivation, x: f32) -> f32 {
    let (m, n) = (activation.m, activation.n);
    match activation.function {
        ActivationFunction::None => x,
        ActivationFunction::Logistic => 1.0 / (1.0 + (-x).exp()),
        ActivationFunction::Hyperbolic => x.tanh(),
        ActivationFunction::Relu => x.max(0.0),
        ActivationFunction::ReluNegativeSlope => {
            if x > 0.0 {
                x
            } else {
                x * m
            }
        }
        ActivationFunction::Clamp => x.clamp(m, n),
        ActivationFunction::Linear => m * x + n,
        ActivationFunction::Abs => x.abs(),
        ActivationFunction::Sqrt => x.sqrt(),
        ActivationFunction::Square => x * x,
        ActivationFunction::Elu => {
            if x > 0.0 {
                x
            } else {
                m * (x.exp() - 1.0)
            }
        }
    }
}

/// Host evaluator for the primitives constant folding meets in practice:
/// reorders of weights and bias, element-wise arithmetic, normalization and
/// small reductions. Convolutions and fully connected layers are left to
/// their kernels.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefCpuEvaluator;

impl RefCpuEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates `node` on dense logical tensors, before the output layout
    /// is applied.
    pub fn evaluate_logical(
        &self,
        node: &ProgramNode,
        inputs: &[HostTensor],
        output: Shape,
    ) -> Result<HostTensor> {
        let result = match node.kind() {
            PrimitiveKind::Reorder(reorder) => reorder_values(reorder, inputs)?,
            PrimitiveKind::Eltwise(eltwise) => eltwise_values(eltwise, inputs, output)?,
            PrimitiveKind::Activation(activation) => activation_values(activation, inputs)?,
            PrimitiveKind::Scale(_) => {
                let [input, scale, rest @ ..] = inputs else {
                    bail!("scale expects an input and a scale");
                };
                let mut out = HostTensor::zeros(output);
                HostTensor::for_each_coord(output, |b, f, x, y| {
                    let bias = rest.first().map_or(0.0, |bias| bias.broadcast_at(b, f, x, y));
                    let value = input.at(b, f, x, y) * scale.broadcast_at(b, f, x, y) + bias;
                    out.set(b, f, x, y, value);
                });
                out
            }
            PrimitiveKind::BatchNorm(bn) => {
                let [input, mean, variance] = inputs else {
                    bail!("batch norm expects an input, a mean and a variance");
                };
                let mut out = HostTensor::zeros(output);
                HostTensor::for_each_coord(output, |b, f, x, y| {
                    let denom = (variance.broadcast_at(b, f, x, y) + bn.epsilon).sqrt();
                    out.set(b, f, x, y, (input.at(b, f, x, y) - mean.broadcast_at(b, f, x, y)) / denom);
                });
                out
            }
            PrimitiveKind::Concatenation(concat) => concat_values(concat, inputs, output)?,
            PrimitiveKind::Softmax(softmax) => {
                let [input] = inputs else {
                    bail!("softmax expects one input");
                };
                softmax_values(softmax.dimension, input)
            }
            PrimitiveKind::Pooling(pool) => {
                let [input] = inputs else {
                    bail!("pooling expects one input");
                };
                pooling_values(pool, input, output)
            }
            other => bail!("{} is not evaluated on the host", other.primitive_type().as_str()),
        };
        ensure!(
            result.size == output,
            "{} produced {:?}, expected {:?}",
            node.id(),
            result.size,
            output
        );

        let fused = node.activation();
        if fused.is_none() {
            return Ok(result);
        }
        Ok(result.map(|v| apply_activation(&fused, v)))
    }
}

impl ConstantEvaluator for RefCpuEvaluator {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn can_evaluate(&self, node: &ProgramNode, inputs: &[Layout], output: &Layout) -> bool {
        let supported = matches!(
            node.kind(),
            PrimitiveKind::Reorder(_)
                | PrimitiveKind::Eltwise(_)
                | PrimitiveKind::Activation(_)
                | PrimitiveKind::Scale(_)
                | PrimitiveKind::BatchNorm(_)
                | PrimitiveKind::Concatenation(_)
                | PrimitiveKind::Softmax(_)
                | PrimitiveKind::Pooling(_)
        );
        supported && is_addressable(output) && inputs.iter().all(is_addressable)
    }

    fn evaluate(
        &self,
        node: &ProgramNode,
        inputs: &[ConstantValue],
        output: &Layout,
    ) -> Result<HostData> {
        let tensors = inputs
            .iter()
            .map(|value| unpack(&value.layout, &value.values))
            .collect::<Result<Vec<_>>>()?;
        let result = self.evaluate_logical(node, &tensors, output.size)?;
        tracing::trace!(node = node.id(), elements = output.count(), "constant evaluated");
        pack(&result, output)
    }
}

fn reorder_values(reorder: &ReorderDesc, inputs: &[HostTensor]) -> Result<HostTensor> {
    let [input] = inputs else {
        bail!("reorder expects one input");
    };
    let subtract = &reorder.subtract_per_feature;
    if subtract.is_empty() {
        return Ok(input.clone());
    }
    ensure!(
        subtract.len() == input.size.feature,
        "{} subtract values for {} features",
        subtract.len(),
        input.size.feature
    );
    let mut out = input.clone();
    HostTensor::for_each_coord(input.size, |b, f, x, y| {
        out.set(b, f, x, y, input.at(b, f, x, y) - subtract[f]);
    });
    Ok(out)
}

fn eltwise_values(eltwise: &EltwiseDesc, inputs: &[HostTensor], output: Shape) -> Result<HostTensor> {
    ensure!(!inputs.is_empty(), "eltwise needs at least one input");
    let coefficient = |idx: usize| eltwise.coefficients.get(idx).copied().unwrap_or(1.0);
    let mut out = HostTensor::zeros(output);
    HostTensor::for_each_coord(output, |b, f, x, y| {
        let mut operands = inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| input.broadcast_at(b, f, x, y) * coefficient(idx));
        let first = operands.next().unwrap_or(0.0);
        let value = operands.fold(first, |acc, v| match eltwise.mode {
            EltwiseMode::Sum => acc + v,
            EltwiseMode::Sub => acc - v,
            EltwiseMode::Prod => acc * v,
            EltwiseMode::Max => acc.max(v),
            EltwiseMode::Min => acc.min(v),
        });
        out.set(b, f, x, y, value);
    });
    Ok(out)
}

fn activation_values(activation: &ActivationDesc, inputs: &[HostTensor]) -> Result<HostTensor> {
    match inputs {
        [input] => Ok(input.map(|v| apply_activation(&activation.activation, v))),
        [input, slope] => {
            ensure!(
                slope.values.len() == input.size.feature,
                "{} slopes for {} features",
                slope.values.len(),
                input.size.feature
            );
            let mut out = input.clone();
            HostTensor::for_each_coord(input.size, |b, f, x, y| {
                let per_feature = FusedActivation {
                    m: slope.values[f],
                    ..activation.activation
                };
                out.set(b, f, x, y, apply_activation(&per_feature, input.at(b, f, x, y)));
            });
            Ok(out)
        }
        _ => bail!("activation expects an input and an optional slope"),
    }
}

fn concat_values(concat: &ConcatenationDesc, inputs: &[HostTensor], output: Shape) -> Result<HostTensor> {
    let mut out = HostTensor::zeros(output);
    let mut offset = 0usize;
    for input in inputs {
        HostTensor::for_each_coord(input.size, |b, f, x, y| {
            let (ob, of, ox, oy) = match concat.axis {
                ConcatAxis::Batch => (b + offset, f, x, y),
                ConcatAxis::Feature => (b, f + offset, x, y),
                ConcatAxis::X => (b, f, x + offset, y),
                ConcatAxis::Y => (b, f, x, y + offset),
            };
            out.set(ob, of, ox, oy, input.at(b, f, x, y));
        });
        offset += match concat.axis {
            ConcatAxis::Batch => input.size.batch,
            ConcatAxis::Feature => input.size.feature,
            ConcatAxis::X => input.size.x,
            ConcatAxis::Y => input.size.y,
        };
    }
    let expected = match concat.axis {
        ConcatAxis::Batch => output.batch,
        ConcatAxis::Feature => output.feature,
        ConcatAxis::X => output.x,
        ConcatAxis::Y => output.y,
    };
    if offset != expected {
        return Err(anyhow!("inputs cover {offset} of {expected} along {:?}", concat.axis));
    }
    Ok(out)
}

fn softmax_values(dimension: SoftmaxDim, input: &HostTensor) -> HostTensor {
    let size = input.size;
    let extent = match dimension {
        SoftmaxDim::X => size.x,
        SoftmaxDim::Y => size.y,
        SoftmaxDim::Feature => size.feature,
    };
    let coord = |b: usize, f: usize, x: usize, y: usize, i: usize| match dimension {
        SoftmaxDim::X => (b, f, i, y),
        SoftmaxDim::Y => (b, f, x, i),
        SoftmaxDim::Feature => (b, i, x, y),
    };
    let mut out = input.clone();
    HostTensor::for_each_coord(size, |b, f, x, y| {
        // Visit each reduced line once, from its first element.
        let first = match dimension {
            SoftmaxDim::X => x == 0,
            SoftmaxDim::Y => y == 0,
            SoftmaxDim::Feature => f == 0,
        };
        if !first {
            return;
        }
        let line: Vec<(usize, usize, usize, usize)> = (0..extent).map(|i| coord(b, f, x, y, i)).collect();
        let max = line
            .iter()
            .map(|&(b, f, x, y)| input.at(b, f, x, y))
            .fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = line.iter().map(|&(b, f, x, y)| (input.at(b, f, x, y) - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        for (&(b, f, x, y), e) in line.iter().zip(exps) {
            out.set(b, f, x, y, e / sum);
        }
    });
    out
}

fn pooling_values(pool: &PoolingDesc, input: &HostTensor, output: Shape) -> HostTensor {
    let mut out = HostTensor::zeros(output);
    let area = (pool.size.x * pool.size.y) as f32;
    HostTensor::for_each_coord(output, |b, f, ox, oy| {
        let start_x = pool.input_offset.x as i64 + (ox * pool.stride.x) as i64;
        let start_y = pool.input_offset.y as i64 + (oy * pool.stride.y) as i64;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f32;
        let mut in_bounds = 0usize;
        for wy in 0..pool.size.y as i64 {
            for wx in 0..pool.size.x as i64 {
                let (ix, iy) = (start_x + wx, start_y + wy);
                if ix < 0 || iy < 0 || ix >= input.size.x as i64 || iy >= input.size.y as i64 {
                    continue;
                }
                let v = input.at(b, f, ix as usize, iy as usize);
                max = max.max(v);
                sum += v;
                in_bounds += 1;
            }
        }
        let value = match pool.mode {
            PoolingMode::Max if in_bounds == 0 => 0.0,
            PoolingMode::Max => max,
            PoolingMode::Average => sum / area,
            PoolingMode::AverageNoPadding => sum / in_bounds.max(1) as f32,
        };
        out.set(b, f, ox, oy, value);
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_negative_slope_scales_negatives() {
        let act = FusedActivation {
            function: ActivationFunction::ReluNegativeSlope,
            m: 0.5,
            n: 0.0,
        };
        assert_eq!(apply_activation(&act, -2.0), -1.0);
        assert_eq!(apply_activation(&act, 3.0), 3.0);
    }

    #[test]
    fn broadcast_repeats_unit_dimensions() {
        let per_feature = HostTensor {
            size: Shape::new(1, 2, 1, 1),
            values: vec![10.0, 20.0],
        };
        assert_eq!(per_feature.broadcast_at(3, 1, 4, 5), 20.0);
        assert_eq!(per_feature.broadcast_at(0, 0, 7, 0), 10.0);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let input = HostTensor {
            size: Shape::new(1, 1, 3, 2),
            values: vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0],
        };
        let out = softmax_values(SoftmaxDim::X, &input);
        for y in 0..2 {
            let sum: f32 = (0..3).map(|x| out.at(0, 0, x, y)).sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert!((out.at(0, 0, 0, 1) - 1.0 / 3.0).abs() < 1e-6);
    }
}
