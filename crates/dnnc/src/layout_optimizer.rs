//! Preferred layouts for the data, weights and bias a node consumes, and the
//! reorder nodes that produce them.

use std::collections::HashMap;

use crate::error::CompileError;
use crate::layout::{DataType, Format, Layout};
use crate::primitives::{PrimitiveDesc, PrimitiveId, PrimitiveType};

/// Role of a buffer for the consuming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Input,
    Weights,
    Bias,
}

/// Outcome of [`LayoutOptimizer::create_reorder_if_needed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReorderDecision {
    /// The buffer already has the expected layout.
    NotNeeded,
    /// A reorder for this source and layout was created earlier; its node
    /// may already be in the program.
    Cached(PrimitiveDesc),
    /// A fresh reorder the caller must insert.
    New(PrimitiveDesc),
}

impl ReorderDecision {
    pub fn desc(&self) -> Option<&PrimitiveDesc> {
        match self {
            ReorderDecision::NotNeeded => None,
            ReorderDecision::Cached(desc) | ReorderDecision::New(desc) => Some(desc),
        }
    }

    pub fn into_desc(self) -> Option<PrimitiveDesc> {
        match self {
            ReorderDecision::NotNeeded => None,
            ReorderDecision::Cached(desc) | ReorderDecision::New(desc) => Some(desc),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ReorderDecision::Cached(_))
    }
}

/// Lives for one compilation. At most one reorder exists per source buffer
/// and target layout.
#[derive(Debug, Default)]
pub struct LayoutOptimizer {
    splitted_convolution: bool,
    cache: HashMap<(PrimitiveId, Layout), PrimitiveDesc>,
}

impl LayoutOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grouped convolutions are present; enables the `yxfb` family for
    /// large half-precision batches.
    pub fn set_splitted_convolution(&mut self, value: bool) {
        self.splitted_convolution = value;
    }

    pub fn splitted_convolution(&self) -> bool {
        self.splitted_convolution
    }

    pub fn cached_reorders(&self) -> usize {
        self.cache.len()
    }

    /// Layout a `consumer` of kind `consumer_type` wants for a buffer
    /// currently in `current`. `consumer_output` supplies the batch and
    /// element type the rules key on; it is required for weights and bias.
    pub fn expected_layout(
        &self,
        current: &Layout,
        kind: DataKind,
        consumer_type: PrimitiveType,
        consumer_output: Option<&Layout>,
    ) -> Result<Layout, CompileError> {
        let (data_type, batch) = match consumer_output {
            Some(output) => (output.data_type, output.size.batch),
            None if kind == DataKind::Input => (current.data_type, current.size.batch),
            None => {
                return Err(CompileError::invalid_graph(format!(
                    "{kind:?} layout of a {} needs the consumer's output layout",
                    consumer_type.as_str()
                )))
            }
        };
        let large_half_batch = data_type == DataType::F16 && batch >= 32 && self.splitted_convolution;

        let format = match (consumer_type, kind) {
            (_, DataKind::Bias) => Format::Bfyx,
            (PrimitiveType::Convolution | PrimitiveType::FusedConvBnScale, DataKind::Input) => {
                if large_half_batch {
                    Format::Yxfb
                } else {
                    Format::Bfyx
                }
            }
            (PrimitiveType::Convolution | PrimitiveType::FusedConvBnScale, DataKind::Weights) => {
                if large_half_batch {
                    Format::Yxio
                } else {
                    Format::OsIyxOsv16
                }
            }
            (PrimitiveType::FullyConnected, DataKind::Weights) => {
                if batch > 1 && data_type != DataType::F16 && batch % 8 == 0 {
                    Format::OsIsv8Osv8
                } else if batch == 1 {
                    Format::OsIOsv16
                } else {
                    Format::Yxio
                }
            }
            (PrimitiveType::FullyConnected, DataKind::Input) => return Ok(*current),
            (other, kind) => {
                return Err(CompileError::invalid_graph(format!(
                    "no {kind:?} layout rule for {}",
                    other.as_str()
                )))
            }
        };
        Ok(Layout::new(data_type, format, current.size))
    }

    /// Reorder turning buffer `source` from `current` into `expected`.
    pub fn create_reorder_if_needed(
        &mut self,
        source: &str,
        current: &Layout,
        expected: &Layout,
    ) -> ReorderDecision {
        if current == expected {
            return ReorderDecision::NotNeeded;
        }
        let key = (source.to_string(), *expected);
        if let Some(desc) = self.cache.get(&key) {
            return ReorderDecision::Cached(desc.clone());
        }
        let id = format!("reorder_{}_{source}", self.cache.len());
        let desc = PrimitiveDesc::reorder(id, source, expected).with_output_padding(expected.padding);
        self.cache.insert(key, desc.clone());
        ReorderDecision::New(desc)
    }

    /// Gives the cached reorder `from` the id `to`, for when `from` is already
    /// taken in the program it is inserted into.
    pub fn rename_reorder(&mut self, from: &str, to: &str) {
        if let Some(desc) = self.cache.values_mut().find(|desc| desc.id == from) {
            desc.id = to.to_string();
        }
    }

    /// [`expected_layout`](Self::expected_layout) followed by
    /// [`create_reorder_if_needed`](Self::create_reorder_if_needed).
    pub fn get_reorder(
        &mut self,
        source: &str,
        current: &Layout,
        kind: DataKind,
        consumer_type: PrimitiveType,
        consumer_output: Option<&Layout>,
    ) -> Result<ReorderDecision, CompileError> {
        let expected = self.expected_layout(current, kind, consumer_type, consumer_output)?;
        Ok(self.create_reorder_if_needed(source, current, &expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Shape;

    fn f32_layout(format: Format, size: Shape) -> Layout {
        Layout::new(DataType::F32, format, size)
    }

    #[test]
    fn second_request_for_same_target_is_cached() {
        let mut lo = LayoutOptimizer::new();
        let current = f32_layout(Format::Oiyx, Shape::new(16, 3, 3, 3));
        let output = f32_layout(Format::Bfyx, Shape::new(1, 16, 8, 8));

        let first = lo
            .get_reorder("w", &current, DataKind::Weights, PrimitiveType::Convolution, Some(&output))
            .unwrap();
        let second = lo
            .get_reorder("w", &current, DataKind::Weights, PrimitiveType::Convolution, Some(&output))
            .unwrap();

        assert!(matches!(first, ReorderDecision::New(_)));
        assert!(second.is_cached());
        assert_eq!(first.desc().unwrap().id, "reorder_0_w");
        assert_eq!(second.desc().unwrap().id, "reorder_0_w");
        assert_eq!(lo.cached_reorders(), 1);
    }

    #[test]
    fn renamed_reorder_is_served_from_the_cache() {
        let mut lo = LayoutOptimizer::new();
        let current = f32_layout(Format::Oiyx, Shape::new(16, 3, 3, 3));
        let expected = f32_layout(Format::OsIyxOsv16, current.size);

        let first = lo.create_reorder_if_needed("w", &current, &expected);
        assert_eq!(first.desc().unwrap().id, "reorder_0_w");
        lo.rename_reorder("reorder_0_w", "reorder_0_w_1");

        let second = lo.create_reorder_if_needed("w", &current, &expected);
        assert!(second.is_cached());
        assert_eq!(second.desc().unwrap().id, "reorder_0_w_1");
    }

    #[test]
    fn matching_layout_needs_no_reorder() {
        let mut lo = LayoutOptimizer::new();
        let current = f32_layout(Format::Bfyx, Shape::new(1, 3, 8, 8));
        let decision = lo
            .get_reorder("in", &current, DataKind::Input, PrimitiveType::Convolution, None)
            .unwrap();
        assert_eq!(decision, ReorderDecision::NotNeeded);
        assert_eq!(lo.cached_reorders(), 0);
    }

    #[test]
    fn fully_connected_weights_follow_the_batch() {
        let lo = LayoutOptimizer::new();
        let weights = f32_layout(Format::Oiyx, Shape::new(10, 64, 1, 1));
        let rule = |batch| {
            let output = f32_layout(Format::Bfyx, Shape::new(batch, 10, 1, 1));
            lo.expected_layout(&weights, DataKind::Weights, PrimitiveType::FullyConnected, Some(&output))
                .unwrap()
                .format
        };
        assert_eq!(rule(1), Format::OsIOsv16);
        assert_eq!(rule(16), Format::OsIsv8Osv8);
        assert_eq!(rule(3), Format::Yxio);
    }

    #[test]
    fn weights_rule_needs_the_consumer_output() {
        let lo = LayoutOptimizer::new();
        let weights = f32_layout(Format::Oiyx, Shape::new(16, 3, 3, 3));
        assert!(lo
            .expected_layout(&weights, DataKind::Weights, PrimitiveType::Convolution, None)
            .is_err());
    }
}
