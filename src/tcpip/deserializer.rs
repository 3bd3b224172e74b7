//! Forward-only decoder, the mirror of [`Serializer`](super::serializer::Serializer).
//!
//! Each primitive pulls exactly the bytes its encoder wrote from a [`ByteSource`], so
//! the same decoder reads from a live socket or from an in-memory [`SocketString`].

use super::serializer::{
    ARRAY_TAG, AXIS_TAG, AXIS_TYPE_NAME, DTE_TYPE_NAME, DWA_TAG, SCALAR_TAG, STRING_TAG,
};
use super::serializer::Value;
use super::socket::{ByteSource, SocketString};
use crate::data::{
    Axis, DType, DataDim, DataDistribution, DataSource, DataToExport, DataWithAxes, DwaKind,
    NdArray, Scalar,
};
use crate::error::{AppResult, ModaqError};

#[derive(Debug)]
pub struct DeSerializer<S> {
    source: S,
}

impl DeSerializer<SocketString> {
    /// Decoder over an in-memory message.
    pub fn from_bytes(bytes: impl Into<bytes::Bytes>) -> Self {
        Self::new(SocketString::new(bytes))
    }
}

impl<S: ByteSource> DeSerializer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Interpret 4 big-endian bytes as an unsigned length.
    pub fn bytes_to_int(raw: &[u8]) -> AppResult<usize> {
        let raw: [u8; 4] = raw.try_into().map_err(|_| {
            ModaqError::Value(format!("a length field needs 4 bytes, got {}", raw.len()))
        })?;
        Ok(u32::from_be_bytes(raw) as usize)
    }

    fn int_deserialization(&mut self) -> AppResult<usize> {
        let raw = self.source.get_first_nbytes(4)?;
        Self::bytes_to_int(&raw)
    }

    pub fn bytes_deserialization(&mut self) -> AppResult<Vec<u8>> {
        let length = self.int_deserialization()?;
        self.source.get_first_nbytes(length)
    }

    pub fn string_deserialization(&mut self) -> AppResult<String> {
        Ok(String::from_utf8(self.bytes_deserialization()?)?)
    }

    pub fn scalar_deserialization(&mut self) -> AppResult<Scalar> {
        let typestr = self.string_deserialization()?;
        let (dtype, big_endian) = DType::parse(&typestr)?;
        let mut raw = self.bytes_deserialization()?;
        if big_endian {
            raw = NdArray::from_raw(dtype, vec![1], raw)?
                .swap_byte_order()
                .into_bytes();
        }
        Scalar::from_raw(dtype, raw)
    }

    pub fn boolean_deserialization(&mut self) -> AppResult<bool> {
        Ok(self.scalar_deserialization()?.as_bool())
    }

    /// Decoded arrays always have at least one dimension.
    pub fn ndarray_deserialization(&mut self) -> AppResult<NdArray> {
        let typestr = self.string_deserialization()?;
        let (dtype, big_endian) = DType::parse(&typestr)?;
        let nbytes = self.int_deserialization()?;
        let rank = self.int_deserialization()?;
        let shape = (0..rank)
            .map(|_| self.int_deserialization())
            .collect::<AppResult<Vec<usize>>>()?;
        let raw = self.source.get_first_nbytes(nbytes)?;
        let mut array = NdArray::from_raw(dtype, shape, raw)?;
        if big_endian {
            array = array.swap_byte_order();
        }
        Ok(array.at_least_1d())
    }

    /// One list element: kind tag, then the element itself.
    pub fn type_and_object_deserialization(&mut self) -> AppResult<Value> {
        let tag = self.string_deserialization()?;
        match tag.as_str() {
            SCALAR_TAG => Ok(Value::Scalar(self.scalar_deserialization()?)),
            STRING_TAG => Ok(Value::Str(self.string_deserialization()?)),
            ARRAY_TAG => Ok(Value::Array(self.ndarray_deserialization()?)),
            AXIS_TAG => Ok(Value::Axis(self.axis_deserialization()?)),
            DWA_TAG => Ok(Value::Dwa(self.dwa_deserialization()?)),
            other => Err(ModaqError::Type(format!(
                "invalid list element type '{other}'"
            ))),
        }
    }

    pub fn list_deserialization(&mut self) -> AppResult<Vec<Value>> {
        let count = self.int_deserialization()?;
        (0..count)
            .map(|_| self.type_and_object_deserialization())
            .collect()
    }

    pub fn axis_deserialization(&mut self) -> AppResult<Axis> {
        let class_name = self.string_deserialization()?;
        if class_name != AXIS_TYPE_NAME {
            return Err(ModaqError::Type(format!(
                "attempting to deserialize an Axis but got the bytes for a {class_name}"
            )));
        }
        let label = self.string_deserialization()?;
        let units = self.string_deserialization()?;
        let values = self.ndarray_deserialization()?;
        let index = self.scalar_deserialization()?.as_usize()?;
        let spread_order = self.scalar_deserialization()?.as_usize()?;
        Ok(Axis::from_array(label, units, &values)?
            .with_index(index)
            .with_spread_order(spread_order))
    }

    pub fn dwa_deserialization(&mut self) -> AppResult<DataWithAxes> {
        let class_name = self.string_deserialization()?;
        let kind: DwaKind = class_name.parse().map_err(|_| {
            ModaqError::Type(format!(
                "attempting to deserialize a DataWithAxes flavor but got the bytes for a {class_name}"
            ))
        })?;
        let timestamp = self.scalar_deserialization()?.as_f64();
        let name = self.string_deserialization()?;
        let source: DataSource = self.string_deserialization()?.parse()?;
        // dimensionality is re-derived from the arrays
        let _dim: DataDim = self.string_deserialization()?.parse()?;
        let distribution: DataDistribution = self.string_deserialization()?.parse()?;

        let data = self
            .list_deserialization()?
            .into_iter()
            .map(|value| match value {
                Value::Array(array) => Ok(array),
                other => Err(unexpected("array", &other)),
            })
            .collect::<AppResult<Vec<_>>>()?;
        let labels = self
            .list_deserialization()?
            .into_iter()
            .map(|value| match value {
                Value::Str(label) => Ok(label),
                other => Err(unexpected("string", &other)),
            })
            .collect::<AppResult<Vec<_>>>()?;
        let origin = self.string_deserialization()?;
        let nav_indexes = self
            .list_deserialization()?
            .into_iter()
            .map(|value| match value {
                Value::Scalar(scalar) => scalar.as_usize(),
                other => Err(unexpected("scalar", &other)),
            })
            .collect::<AppResult<Vec<_>>>()?;
        let axes = self
            .list_deserialization()?
            .into_iter()
            .map(|value| match value {
                Value::Axis(axis) => Ok(axis),
                other => Err(unexpected("axis", &other)),
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(DataWithAxes::new(kind, name, data)?
            .with_source(source)
            .with_distribution(distribution)
            .with_labels(labels)
            .with_origin(origin)
            .with_axes(axes)?
            .with_nav_indexes(nav_indexes)?
            .with_timestamp(timestamp))
    }

    pub fn dte_deserialization(&mut self) -> AppResult<DataToExport> {
        let class_name = self.string_deserialization()?;
        if class_name != DTE_TYPE_NAME {
            return Err(ModaqError::Type(format!(
                "attempting to deserialize a DataToExport but got the bytes for a {class_name}"
            )));
        }
        let timestamp = self.scalar_deserialization()?.as_f64();
        let name = self.string_deserialization()?;
        let data = self
            .list_deserialization()?
            .into_iter()
            .map(|value| match value {
                Value::Dwa(dwa) => Ok(dwa),
                other => Err(unexpected("dwa", &other)),
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(DataToExport::new(name, data).with_timestamp(timestamp))
    }
}

fn unexpected(expected: &str, got: &Value) -> ModaqError {
    ModaqError::Type(format!(
        "expected a list of {expected} elements, found a {}",
        got.kind_name()
    ))
}
