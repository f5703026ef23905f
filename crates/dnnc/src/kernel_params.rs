//! Conversion of graph layouts into the selector's tensor descriptors.

use dnnc_kernel_selector::{Channel, DataLayout, DataTensor, Datatype, Pad, WeightsLayout, WeightsTensor, WeightsType};

use crate::error::CompileError;
use crate::layout::{DataType, Format, Layout};

pub fn datatype(data_type: DataType) -> Datatype {
    match data_type {
        DataType::F16 => Datatype::F16,
        DataType::F32 => Datatype::F32,
        DataType::I8 => Datatype::Int8,
        DataType::U8 => Datatype::Uint8,
    }
}

pub fn weights_type(id: &str, data_type: DataType) -> Result<WeightsType, CompileError> {
    WeightsType::from_datatype(datatype(data_type)).ok_or_else(|| {
        CompileError::invalid_primitive(id, format!("{data_type:?} cannot hold weights"))
    })
}

pub fn data_type_of_weights(wtype: WeightsType) -> DataType {
    match wtype {
        WeightsType::F16 => DataType::F16,
        WeightsType::F32 => DataType::F32,
        WeightsType::Int8 => DataType::I8,
    }
}

fn data_layout(id: &str, format: Format) -> Result<DataLayout, CompileError> {
    match format {
        Format::Bfyx => Ok(DataLayout::Bfyx),
        Format::Yxfb => Ok(DataLayout::Yxfb),
        Format::Byxf => Ok(DataLayout::Byxf),
        Format::Fyxb => Ok(DataLayout::Fyxb),
        Format::BsXBsv16 => Ok(DataLayout::BsFBsv16),
        Format::Bf8Xy16 => Ok(DataLayout::Bf8Xy16),
        other => Err(CompileError::invalid_primitive(
            id,
            format!("{other:?} is not a data format kernels accept"),
        )),
    }
}

/// Weights layout a buffer in `format` is read as. Plain data formats are
/// reinterpreted with batch as output and feature as input channels.
pub fn weights_layout(id: &str, format: Format) -> Result<WeightsLayout, CompileError> {
    match format {
        Format::Oiyx | Format::Bfyx => Ok(WeightsLayout::Oiyx),
        Format::Yxio | Format::Yxfb => Ok(WeightsLayout::Yxio),
        Format::Oyxi | Format::Byxf => Ok(WeightsLayout::Oyxi),
        Format::Iyxo | Format::Fyxb => Ok(WeightsLayout::Iyxo),
        Format::OsIyxOsv16 => Ok(WeightsLayout::OsIyxOsv16),
        Format::OsIOsv16 => Ok(WeightsLayout::OsIOsv16),
        Format::OsIsv8Osv8 => Ok(WeightsLayout::OsIsv8Osv8),
        Format::IyXsOsXsv2Osv16Ao32 => Ok(WeightsLayout::IyXsOsXsv2Osv16Ao32),
        Format::IyXsOsXsv2Osv8Ao32 => Ok(WeightsLayout::IyXsOsXsv2Osv8Ao32),
        other => Err(CompileError::invalid_primitive(
            id,
            format!("{other:?} cannot be read as weights"),
        )),
    }
}

/// Graph format holding weights in `layout`. `Oi`/`Io` have no spatial
/// extent and map onto their four-dimensional counterparts.
pub fn format_of_weights(layout: WeightsLayout) -> Format {
    match layout {
        WeightsLayout::Oi | WeightsLayout::Oiyx => Format::Oiyx,
        WeightsLayout::Io | WeightsLayout::Iyxo => Format::Iyxo,
        WeightsLayout::Oyxi => Format::Oyxi,
        WeightsLayout::Yxio => Format::Yxio,
        WeightsLayout::OsIyxOsv16 => Format::OsIyxOsv16,
        WeightsLayout::OsIOsv16 => Format::OsIOsv16,
        WeightsLayout::OsIsv8Osv8 => Format::OsIsv8Osv8,
        WeightsLayout::IyXsOsXsv2Osv16Ao32 => Format::IyXsOsXsv2Osv16Ao32,
        WeightsLayout::IyXsOsXsv2Osv8Ao32 => Format::IyXsOsXsv2Osv8Ao32,
    }
}

fn pads(tensor: DataTensor, layout: &Layout) -> DataTensor {
    let lower = layout.padding.lower;
    let upper = layout.padding.upper;
    tensor
        .with_pad(Channel::Batch, Pad { before: lower.batch, after: upper.batch })
        .with_pad(Channel::Feature, Pad { before: lower.feature, after: upper.feature })
        .with_pad(Channel::X, Pad { before: lower.x, after: upper.x })
        .with_pad(Channel::Y, Pad { before: lower.y, after: upper.y })
}

pub fn data_tensor(id: &str, layout: &Layout) -> Result<DataTensor, CompileError> {
    let size = layout.size;
    let tensor = DataTensor::new(
        datatype(layout.data_type),
        data_layout(id, layout.format)?,
        size.batch,
        size.feature,
        size.x,
        size.y,
    );
    Ok(pads(tensor, layout))
}

pub fn weights_tensor(id: &str, layout: &Layout) -> Result<WeightsTensor, CompileError> {
    if !layout.padding.is_none() {
        return Err(CompileError::invalid_primitive(id, "weights cannot be padded"));
    }
    Ok(WeightsTensor {
        wtype: weights_type(id, layout.data_type)?,
        layout: weights_layout(id, layout.format)?,
        ofm: layout.size.batch,
        ifm: layout.size.feature,
        x: layout.size.x,
        y: layout.size.y,
    })
}

/// Fully-connected input, flattened to two dimensions when it is dense.
pub fn fc_input_tensor(id: &str, layout: &Layout) -> Result<DataTensor, CompileError> {
    let size = layout.size;
    let dtype = datatype(layout.data_type);
    let flat = size.feature * size.x * size.y;
    match layout.format {
        Format::Bfyx if layout.padding.is_none() => {
            Ok(DataTensor::new(dtype, DataLayout::Bf, size.batch, flat, 1, 1))
        }
        Format::Yxfb if layout.padding.is_none() => {
            Ok(DataTensor::new(dtype, DataLayout::Fb, size.batch, flat, 1, 1))
        }
        _ => data_tensor(id, layout),
    }
}

pub fn fc_output_tensor(id: &str, layout: &Layout) -> Result<DataTensor, CompileError> {
    let size = layout.size;
    let dtype = datatype(layout.data_type);
    match layout.format {
        Format::Bfyx if layout.padding.is_none() => {
            Ok(DataTensor::new(dtype, DataLayout::Bf, size.batch, size.feature, 1, 1))
        }
        Format::Yxfb if layout.padding.is_none() => {
            Ok(DataTensor::new(dtype, DataLayout::Fb, size.batch, size.feature, 1, 1))
        }
        _ => data_tensor(id, layout),
    }
}

/// Bias of every split group viewed as one per-feature vector.
pub fn bias_tensor(layouts: &[Layout]) -> Option<DataTensor> {
    let first = layouts.first()?;
    let features: usize = layouts.iter().map(Layout::count).sum();
    Some(DataTensor::new(
        datatype(first.data_type),
        DataLayout::Bf,
        1,
        features,
        1,
        1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Padding, Shape};

    #[test]
    fn padding_lands_on_the_matching_channel() {
        let layout = Layout::new(DataType::F32, Format::Bfyx, Shape::new(1, 2, 4, 4))
            .with_padding(Padding::spatial(1, 2, 1, 2));
        let tensor = data_tensor("conv", &layout).unwrap();
        assert_eq!(tensor.x().pad, Pad { before: 1, after: 1 });
        assert_eq!(tensor.y().pad, Pad { before: 2, after: 2 });
        assert_eq!(tensor.feature().pad, Pad::default());
    }

    #[test]
    fn dense_fc_input_is_flattened() {
        let layout = Layout::new(DataType::F16, Format::Bfyx, Shape::new(2, 3, 4, 5));
        let tensor = fc_input_tensor("fc", &layout).unwrap();
        assert_eq!(tensor.layout, DataLayout::Bf);
        assert_eq!(tensor.feature().v, 60);
        assert_eq!(tensor.batch().v, 2);
    }

    #[test]
    fn weight_formats_are_not_data() {
        let layout = Layout::new(DataType::F32, Format::OsIyxOsv16, Shape::new(16, 3, 3, 3));
        assert!(data_tensor("w", &layout).is_err());
        let weights = weights_tensor("w", &layout).unwrap();
        assert_eq!(weights.layout, WeightsLayout::OsIyxOsv16);
        assert_eq!(weights.ofm, 16);
    }
}
