//! Tensor descriptors consumed by kernel implementations.
//!
//! These are deliberately independent of the graph model: the compiler converts
//! its layouts into [`DataTensor`] / [`WeightsTensor`] before asking the
//! selector for a dispatch plan.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    F16,
    F32,
    Int8,
    Uint8,
}

impl Datatype {
    pub fn size_in_bytes(self) -> usize {
        match self {
            Datatype::F16 => 2,
            Datatype::F32 => 4,
            Datatype::Int8 | Datatype::Uint8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightsType {
    F16,
    F32,
    Int8,
}

impl WeightsType {
    /// Weights type holding the same element type as a data tensor, if any.
    pub fn from_datatype(dtype: Datatype) -> Option<WeightsType> {
        match dtype {
            Datatype::F16 => Some(WeightsType::F16),
            Datatype::F32 => Some(WeightsType::F32),
            Datatype::Int8 => Some(WeightsType::Int8),
            Datatype::Uint8 => None,
        }
    }
}

/// Logical dimension of a data tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    X,
    Y,
    Feature,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    Bf,
    Fb,
    Bfyx,
    Yxfb,
    Byxf,
    Fyxb,
    BsFBsv16,
    Bf8Xy16,
}

impl DataLayout {
    pub const ALL: [DataLayout; 8] = [
        DataLayout::Bf,
        DataLayout::Fb,
        DataLayout::Bfyx,
        DataLayout::Yxfb,
        DataLayout::Byxf,
        DataLayout::Fyxb,
        DataLayout::BsFBsv16,
        DataLayout::Bf8Xy16,
    ];

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Channels ordered from innermost (unit stride) to outermost.
    pub fn order(self) -> [Channel; 4] {
        use Channel::*;
        match self {
            DataLayout::Bf | DataLayout::Bfyx | DataLayout::Bf8Xy16 => [X, Y, Feature, Batch],
            DataLayout::Fb | DataLayout::Yxfb | DataLayout::BsFBsv16 => [Batch, Feature, X, Y],
            DataLayout::Byxf => [Feature, X, Y, Batch],
            DataLayout::Fyxb => [Batch, X, Y, Feature],
        }
    }

    /// Layouts without spatial dimensions.
    pub fn is_flat(self) -> bool {
        matches!(self, DataLayout::Bf | DataLayout::Fb | DataLayout::BsFBsv16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightsLayout {
    Oi,
    Io,
    Oiyx,
    Oyxi,
    Iyxo,
    Yxio,
    OsIyxOsv16,
    OsIOsv16,
    OsIsv8Osv8,
    IyXsOsXsv2Osv16Ao32,
    IyXsOsXsv2Osv8Ao32,
}

impl WeightsLayout {
    pub const ALL: [WeightsLayout; 11] = [
        WeightsLayout::Oi,
        WeightsLayout::Io,
        WeightsLayout::Oiyx,
        WeightsLayout::Oyxi,
        WeightsLayout::Iyxo,
        WeightsLayout::Yxio,
        WeightsLayout::OsIyxOsv16,
        WeightsLayout::OsIOsv16,
        WeightsLayout::OsIsv8Osv8,
        WeightsLayout::IyXsOsXsv2Osv16Ao32,
        WeightsLayout::IyXsOsXsv2Osv8Ao32,
    ];

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pad {
    pub before: usize,
    pub after: usize,
}

impl Pad {
    pub fn total(self) -> usize {
        self.before + self.after
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
    pub v: usize,
    pub pitch: usize,
    pub pad: Pad,
}

/// Activation tensor: logical sizes, physical padding and memory order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTensor {
    pub dtype: Datatype,
    pub layout: DataLayout,
    /// Logical sizes indexed by [`Channel`]: x, y, feature, batch.
    sizes: [usize; 4],
    pads: [Pad; 4],
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::X => 0,
        Channel::Y => 1,
        Channel::Feature => 2,
        Channel::Batch => 3,
    }
}

impl DataTensor {
    pub fn new(
        dtype: Datatype,
        layout: DataLayout,
        batch: usize,
        feature: usize,
        x: usize,
        y: usize,
    ) -> Self {
        Self {
            dtype,
            layout,
            sizes: [x, y, feature, batch],
            pads: [Pad::default(); 4],
        }
    }

    pub fn with_pad(mut self, channel: Channel, pad: Pad) -> Self {
        self.pads[channel_index(channel)] = pad;
        self
    }

    pub fn dim(&self, channel: Channel) -> Dim {
        let idx = channel_index(channel);
        let mut pitch = 1usize;
        for ch in self.layout.order() {
            if ch == channel {
                break;
            }
            let i = channel_index(ch);
            pitch *= self.sizes[i] + self.pads[i].total();
        }
        Dim {
            v: self.sizes[idx],
            pitch,
            pad: self.pads[idx],
        }
    }

    pub fn x(&self) -> Dim {
        self.dim(Channel::X)
    }

    pub fn y(&self) -> Dim {
        self.dim(Channel::Y)
    }

    pub fn feature(&self) -> Dim {
        self.dim(Channel::Feature)
    }

    pub fn batch(&self) -> Dim {
        self.dim(Channel::Batch)
    }

    pub fn logical_size(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn physical_size(&self) -> usize {
        self.sizes
            .iter()
            .zip(self.pads.iter())
            .map(|(size, pad)| size + pad.total())
            .product()
    }

    /// Element offset of the first logical element inside the padded buffer.
    pub fn offset(&self) -> usize {
        [Channel::X, Channel::Y, Channel::Feature, Channel::Batch]
            .into_iter()
            .map(|ch| {
                let dim = self.dim(ch);
                dim.pad.before * dim.pitch
            })
            .sum()
    }

    pub fn is_padded(&self) -> bool {
        self.pads.iter().any(|pad| pad.total() > 0)
    }

    /// True when the spatial extent is a single element.
    pub fn is_spatial_flat(&self) -> bool {
        self.sizes[0] == 1 && self.sizes[1] == 1
    }
}

/// Weights tensor of a convolution or fully-connected layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightsTensor {
    pub wtype: WeightsType,
    pub layout: WeightsLayout,
    pub ofm: usize,
    pub ifm: usize,
    pub x: usize,
    pub y: usize,
}

impl WeightsTensor {
    pub fn logical_size(&self) -> usize {
        self.ofm * self.ifm * self.x * self.y
    }

    pub fn with_layout(&self, layout: WeightsLayout) -> Self {
        Self {
            layout,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfyx_pitches_account_for_padding() {
        let tensor = DataTensor::new(Datatype::F32, DataLayout::Bfyx, 2, 3, 4, 5)
            .with_pad(Channel::X, Pad { before: 1, after: 1 });
        assert_eq!(tensor.x().pitch, 1);
        assert_eq!(tensor.y().pitch, 6);
        assert_eq!(tensor.feature().pitch, 30);
        assert_eq!(tensor.batch().pitch, 90);
        assert_eq!(tensor.offset(), 1);
        assert!(tensor.is_padded());
    }

    #[test]
    fn yxfb_keeps_batch_innermost() {
        let tensor = DataTensor::new(Datatype::F16, DataLayout::Yxfb, 8, 16, 3, 3);
        assert_eq!(tensor.batch().pitch, 1);
        assert_eq!(tensor.feature().pitch, 8);
        assert_eq!(tensor.x().pitch, 128);
        assert_eq!(tensor.offset(), 0);
    }
}
