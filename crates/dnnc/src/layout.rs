//! Memory layouts of node outputs.
//!
//! A [`Layout`] is an element type, a memory [`Format`], the logical
//! `(batch, feature, x, y)` extent and the zero padding around it. Weights use
//! the same shape with `batch` as output features and `feature` as input
//! features.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F16,
    F32,
    I8,
    U8,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::I8 | DataType::U8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Batch,
    Feature,
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Bfyx,
    Yxfb,
    Byxf,
    Fyxb,
    /// Batch blocked by 16 over a flattened `f*y*x` axis.
    BsXBsv16,
    /// Batch and flattened `f*y*x` both blocked by 8.
    BsXsXsv8Bsv8,
    /// Features blocked by 8, spatial plane by 16.
    Bf8Xy16,
    Oiyx,
    Oyxi,
    Iyxo,
    Yxio,
    OsIyxOsv16,
    /// Output features blocked by 16 over a flattened `i*y*x` axis.
    OsIOsv16,
    /// Output features and flattened `i*y*x` both blocked by 8.
    OsIsv8Osv8,
    IyXsOsXsv2Osv16Ao32,
    IyXsOsXsv2Osv8Ao32,
}

impl Format {
    pub fn is_weights(self) -> bool {
        matches!(
            self,
            Format::Oiyx
                | Format::Oyxi
                | Format::Iyxo
                | Format::Yxio
                | Format::OsIyxOsv16
                | Format::OsIOsv16
                | Format::OsIsv8Osv8
                | Format::IyXsOsXsv2Osv16Ao32
                | Format::IyXsOsXsv2Osv8Ao32
        )
    }

    /// Outermost to innermost order for non-blocked formats.
    pub fn order(self) -> Option<[Dim; 4]> {
        use Dim::*;
        match self {
            Format::Bfyx | Format::Oiyx => Some([Batch, Feature, Y, X]),
            Format::Yxfb | Format::Yxio => Some([Y, X, Feature, Batch]),
            Format::Byxf | Format::Oyxi => Some([Batch, Y, X, Feature]),
            Format::Fyxb | Format::Iyxo => Some([Feature, Y, X, Batch]),
            _ => None,
        }
    }

    pub fn is_blocked(self) -> bool {
        self.order().is_none()
    }
}

/// Logical extent along each dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub batch: usize,
    pub feature: usize,
    pub x: usize,
    pub y: usize,
}

impl Shape {
    pub const fn new(batch: usize, feature: usize, x: usize, y: usize) -> Self {
        Self {
            batch,
            feature,
            x,
            y,
        }
    }

    pub fn get(&self, dim: Dim) -> usize {
        match dim {
            Dim::Batch => self.batch,
            Dim::Feature => self.feature,
            Dim::X => self.x,
            Dim::Y => self.y,
        }
    }

    pub fn count(&self) -> usize {
        self.batch * self.feature * self.x * self.y
    }

    pub fn add(&self, other: &Shape) -> Shape {
        Shape::new(
            self.batch + other.batch,
            self.feature + other.feature,
            self.x + other.x,
            self.y + other.y,
        )
    }

    pub fn max(&self, other: &Shape) -> Shape {
        Shape::new(
            self.batch.max(other.batch),
            self.feature.max(other.feature),
            self.x.max(other.x),
            self.y.max(other.y),
        )
    }

    pub fn is_zero(&self) -> bool {
        *self == Shape::default()
    }
}

/// Zero padding before (`lower`) and after (`upper`) the logical data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Padding {
    pub lower: Shape,
    pub upper: Shape,
}

impl Padding {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(lower: Shape, upper: Shape) -> Self {
        Self { lower, upper }
    }

    pub fn spatial(lower_x: usize, lower_y: usize, upper_x: usize, upper_y: usize) -> Self {
        Self {
            lower: Shape::new(0, 0, lower_x, lower_y),
            upper: Shape::new(0, 0, upper_x, upper_y),
        }
    }

    /// Element-wise maximum of two requirements.
    pub fn max(&self, other: &Padding) -> Padding {
        Padding {
            lower: self.lower.max(&other.lower),
            upper: self.upper.max(&other.upper),
        }
    }

    pub fn is_none(&self) -> bool {
        self.lower.is_zero() && self.upper.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub data_type: DataType,
    pub format: Format,
    pub size: Shape,
    pub padding: Padding,
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

impl Layout {
    pub fn new(data_type: DataType, format: Format, size: Shape) -> Self {
        Self {
            data_type,
            format,
            size,
            padding: Padding::none(),
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Number of logical elements.
    pub fn count(&self) -> usize {
        self.size.count()
    }

    pub fn padded_size(&self) -> Shape {
        self.size.add(&self.padding.lower).add(&self.padding.upper)
    }

    /// Same element type, format and extent, ignoring padding.
    pub fn same_data(&self, other: &Layout) -> bool {
        self.data_type == other.data_type && self.format == other.format && self.size == other.size
    }

    /// Elements the backing buffer holds, padding and block tails included.
    pub fn buffer_size(&self) -> usize {
        let s = self.size;
        match self.format {
            Format::OsIyxOsv16 | Format::BsXBsv16 | Format::OsIOsv16 => {
                round_up(s.batch, 16) * s.feature * s.x * s.y
            }
            Format::BsXsXsv8Bsv8 | Format::OsIsv8Osv8 => {
                round_up(s.batch, 8) * round_up(s.feature * s.x * s.y, 8)
            }
            Format::Bf8Xy16 => s.batch * round_up(s.feature, 8) * round_up(s.x * s.y, 16),
            Format::IyXsOsXsv2Osv16Ao32 | Format::IyXsOsXsv2Osv8Ao32 => {
                round_up(s.batch, 32) * s.feature * round_up(s.x, 2) * s.y
            }
            _ => self.padded_size().count(),
        }
    }

    /// Buffer index of logical element `(b, f, x, y)`, or `None` for formats
    /// whose element placement is not modelled on the host.
    pub fn element_offset(&self, b: usize, f: usize, x: usize, y: usize) -> Option<usize> {
        let s = self.size;
        if b >= s.batch || f >= s.feature || x >= s.x || y >= s.y {
            return None;
        }
        if let Some(order) = self.format.order() {
            let padded = self.padded_size();
            let lower = self.padding.lower;
            let index = |dim: Dim| match dim {
                Dim::Batch => b + lower.batch,
                Dim::Feature => f + lower.feature,
                Dim::X => x + lower.x,
                Dim::Y => y + lower.y,
            };
            let mut offset = 0;
            for dim in order {
                offset = offset * padded.get(dim) + index(dim);
            }
            return Some(offset);
        }
        if !self.padding.is_none() {
            return None;
        }
        let flat = (f * s.y + y) * s.x + x;
        let flat_size = s.feature * s.y * s.x;
        match self.format {
            Format::OsIyxOsv16 | Format::BsXBsv16 | Format::OsIOsv16 => {
                Some(((b / 16) * flat_size + flat) * 16 + b % 16)
            }
            Format::BsXsXsv8Bsv8 | Format::OsIsv8Osv8 => {
                let flat_blocks = round_up(flat_size, 8) / 8;
                Some((((b / 8) * flat_blocks + flat / 8) * 8 + flat % 8) * 8 + b % 8)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_bfyx_offsets_skip_the_border() {
        let layout = Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 1, 2, 2))
            .with_padding(Padding::spatial(1, 1, 1, 1));
        assert_eq!(layout.buffer_size(), 16);
        assert_eq!(layout.element_offset(0, 0, 0, 0), Some(5));
        assert_eq!(layout.element_offset(0, 0, 1, 1), Some(10));
    }

    #[test]
    fn osv16_blocks_output_features() {
        let layout = Layout::new(DataType::F32, Format::OsIyxOsv16, Shape::new(20, 2, 1, 1));
        assert_eq!(layout.buffer_size(), 64);
        assert_eq!(layout.element_offset(1, 0, 0, 0), Some(1));
        assert_eq!(layout.element_offset(0, 1, 0, 0), Some(16));
        assert_eq!(layout.element_offset(17, 1, 0, 0), Some(32 + 16 + 1));
    }

    #[test]
    fn padding_max_is_per_edge() {
        let a = Padding::spatial(1, 0, 0, 2);
        let b = Padding::spatial(0, 3, 1, 0);
        assert_eq!(a.max(&b), Padding::spatial(1, 3, 1, 2));
    }
}
