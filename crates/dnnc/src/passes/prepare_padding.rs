use crate::error::CompileError;
use crate::layout::{Format, Layout, Padding};
use crate::primitives::{InputOffset, PrimitiveDesc, PrimitiveKind, PrimitiveType, Spatial};
use crate::program::primitive_type::sliding_window_extent;
use crate::program::Program;

use super::{PassContext, PassResult, ProgramPass};

/// Moves the zero padding sliding-window nodes read into the output padding
/// of their producers, so kernels never bounds-check the input.
///
/// Input layouts and literals cannot change their buffers; they get a
/// padded reorder in front of the consumer instead.
#[derive(Default)]
pub struct PreparePaddingPass;

impl PreparePaddingPass {
    const NAME: &'static str = "prepare-padding";
}

impl ProgramPass for PreparePaddingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program, _cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let before = program.len();
        let mut rewrites = 0usize;

        if output_size_handling_needed(program)? {
            for id in program.processing_order().ids() {
                // Pooling kernels bounds-check their input, so only
                // convolutions with an explicit output size need padding here.
                let PrimitiveKind::Convolution(conv) = program.node(&id)?.kind().clone() else {
                    continue;
                };
                let Some(size) = conv.output_size else {
                    continue;
                };
                let window = Window::of_convolution(program, &id, conv.input_offset, conv.stride, conv.dilation)?;
                let needed = window.needed_padding(Spatial::new(size.x, size.y));
                if apply_needed_padding(program, &id, needed)? {
                    rewrites += 1;
                }
            }
        }

        for id in program.processing_order().ids() {
            let PrimitiveKind::Convolution(conv) = program.node(&id)?.kind() else {
                continue;
            };
            let (offset, stride, dilation) = (conv.input_offset, conv.stride, conv.dilation);
            let output = program.get_output_layout(&id)?;
            if !matches!(output.format, Format::Bfyx | Format::Bf8Xy16) {
                continue;
            }
            let window = Window::of_convolution(program, &id, offset, stride, dilation)?;
            let needed = window.needed_padding(Spatial::new(output.size.x, output.size.y));
            if apply_needed_padding(program, &id, needed)? {
                rewrites += 1;
            }
        }

        Ok(PassResult::from_counts(rewrites, before.saturating_sub(program.len())))
    }
}

fn input_of(program: &Program, id: &str) -> Result<String, CompileError> {
    program
        .node(id)?
        .dependency(0)
        .map(str::to_string)
        .ok_or_else(|| CompileError::invalid_primitive(id, "has no input"))
}

/// Geometry of one convolution's sliding window over its input.
struct Window {
    input: Layout,
    size: Spatial,
    offset: InputOffset,
    stride: Spatial,
    dilation: Spatial,
}

impl Window {
    fn of_convolution(
        program: &mut Program,
        id: &str,
        offset: InputOffset,
        stride: Spatial,
        dilation: Spatial,
    ) -> Result<Window, CompileError> {
        let layouts = program.input_layouts(id)?;
        let [input, weights, ..] = layouts.as_slice() else {
            return Err(CompileError::invalid_primitive(id, "convolution needs an input and weights"));
        };
        Ok(Window {
            input: *input,
            size: Spatial::new(weights.size.x, weights.size.y),
            offset,
            stride,
            dilation,
        })
    }

    /// Padding around the input that `output` positions of the window read,
    /// merged with the padding the input already has.
    fn needed_padding(&self, output: Spatial) -> Padding {
        let axis = |offset: i32, out: usize, stride: usize, window: usize, dilation: usize, input: usize| {
            let offset = i64::from(offset);
            let limit = offset
                + (out as i64 - 1) * stride as i64
                + (window as i64 - 1) * dilation as i64
                + 1;
            let before = (-offset).max(0) as usize;
            let after = (limit - input as i64).max(0) as usize;
            (before, after)
        };
        let (left, right) = axis(
            self.offset.x,
            output.x,
            self.stride.x,
            self.size.x,
            self.dilation.x,
            self.input.size.x,
        );
        let (top, bottom) = axis(
            self.offset.y,
            output.y,
            self.stride.y,
            self.size.y,
            self.dilation.y,
            self.input.size.y,
        );
        Padding::spatial(left, top, right, bottom).max(&self.input.padding)
    }
}

/// True when some convolution or pooling asks for an output size other
/// than the one its window produces.
fn output_size_handling_needed(program: &mut Program) -> Result<bool, CompileError> {
    for id in program.processing_order().ids() {
        let (requested, natural) = match program.node(&id)?.kind().clone() {
            PrimitiveKind::Convolution(conv) => {
                let Some(requested) = conv.output_size else {
                    continue;
                };
                let layouts = program.input_layouts(&id)?;
                let [input, weights, ..] = layouts.as_slice() else {
                    continue;
                };
                let pad = conv.input_offset.padding();
                let natural = (
                    sliding_window_extent(input.size.x, weights.size.x, conv.stride.x, conv.dilation.x, pad.x, false),
                    sliding_window_extent(input.size.y, weights.size.y, conv.stride.y, conv.dilation.y, pad.y, false),
                );
                (requested, natural)
            }
            PrimitiveKind::Pooling(pool) => {
                let Some(requested) = pool.output_size else {
                    continue;
                };
                let input_id = input_of(program, &id)?;
                let input = program.get_output_layout(&input_id)?;
                let pad = pool.input_offset.padding();
                let natural = (
                    sliding_window_extent(input.size.x, pool.size.x, pool.stride.x, 1, pad.x, true),
                    sliding_window_extent(input.size.y, pool.size.y, pool.stride.y, 1, pad.y, true),
                );
                (requested, natural)
            }
            _ => continue,
        };
        if natural != (Some(requested.x), Some(requested.y)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Gives the input of `id` the padding `needed`. Returns whether anything changed.
fn apply_needed_padding(program: &mut Program, id: &str, needed: Padding) -> Result<bool, CompileError> {
    let input = input_of(program, id)?;
    let current = program.get_output_layout(&input)?;
    if current.padding == needed {
        return Ok(false);
    }
    let producer = program.node(&input)?;
    if producer.is_type(PrimitiveType::InputLayout) || producer.is_type(PrimitiveType::Data) {
        let reorder_id = program.unused_id(&format!("reorder_input_{id}"));
        let desc = PrimitiveDesc::reorder(reorder_id, input, &current).with_output_padding(needed);
        program.add_intermediate(desc, id, 0)?;
        return Ok(true);
    }
    let merged = producer.output_padding().max(&needed);
    program.set_output_padding(&input, merged)?;
    tracing::trace!(node = %input, consumer = id, "output padding widened");
    Ok(true)
}
