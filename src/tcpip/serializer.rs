//! Length-prefixed, type-tagged binary encoding of the data model.
//!
//! ## Wire format
//!
//! Every length or count is a 4-byte big-endian unsigned integer.
//!
//! | value        | encoding                                                             |
//! |--------------|----------------------------------------------------------------------|
//! | bytes        | `[len][raw]`                                                         |
//! | string       | `[len][utf8]`                                                        |
//! | scalar       | `[dtype string][len][raw little-endian element]`                     |
//! | ndarray      | `[dtype string][byte len][rank][dim]*rank[raw row-major elements]`   |
//! | Axis         | `"Axis"`, label, units, ndarray, scalar index, scalar spread_order   |
//! | list         | `[count]` then per element `[kind tag string][element]`              |
//! | DataWithAxes | flavour name, scalar timestamp, name, source, dim, distribution,     |
//! |              | list of arrays, list of labels, origin, list of nav indexes, axes    |
//! | DataToExport | `"DataToExport"`, scalar timestamp, name, list of DataWithAxes       |
//!
//! List element kind tags are `scalar`, `string`, `array`, `axis` and `dwa`.

use crate::data::{Axis, DataToExport, DataWithAxes, NdArray, Scalar};
use crate::error::{AppResult, ModaqError};
use bytes::{BufMut, BytesMut};

pub const SCALAR_TAG: &str = "scalar";
pub const STRING_TAG: &str = "string";
pub const ARRAY_TAG: &str = "array";
pub const AXIS_TAG: &str = "axis";
pub const DWA_TAG: &str = "dwa";

pub const AXIS_TYPE_NAME: &str = "Axis";
pub const DTE_TYPE_NAME: &str = "DataToExport";

/// Every value the codec knows how to encode.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Scalar(Scalar),
    Str(String),
    Array(NdArray),
    Axis(Axis),
    Dwa(DataWithAxes),
    Dte(DataToExport),
    List(Vec<Value>),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Scalar(_) => SCALAR_TAG,
            Value::Str(_) => STRING_TAG,
            Value::Array(_) => ARRAY_TAG,
            Value::Axis(_) => AXIS_TAG,
            Value::Dwa(_) => DWA_TAG,
            Value::Dte(_) => "dte",
            Value::List(_) => "list",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        })*
    };
}

value_from!(
    Scalar => Scalar,
    String => Str,
    NdArray => Array,
    Axis => Axis,
    DataWithAxes => Dwa,
    DataToExport => Dte,
    Vec<Value> => List,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Scalar(Scalar::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(Scalar::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(Scalar::from(value))
    }
}

/// Accumulating encoder; each `*_serialization` call appends to the same buffer.
#[derive(Debug, Default)]
pub struct Serializer {
    buffer: BytesMut,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a single value and return its bytes.
    pub fn to_bytes(value: &Value) -> AppResult<Vec<u8>> {
        let mut serializer = Self::new();
        serializer.serialize(value)?;
        Ok(serializer.into_bytes())
    }

    /// Everything appended so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// A length as 4 big-endian bytes; lengths above `u32::MAX` are rejected.
    pub fn int_to_bytes(value: usize) -> AppResult<[u8; 4]> {
        let value = u32::try_from(value).map_err(|_| {
            ModaqError::Value(format!(
                "{value} does not fit the 4-byte unsigned length field"
            ))
        })?;
        Ok(value.to_be_bytes())
    }

    /// Dispatch on the value kind.
    pub fn serialize(&mut self, value: &Value) -> AppResult<()> {
        match value {
            Value::Bytes(raw) => self.bytes_serialization(raw),
            Value::Scalar(scalar) => self.scalar_serialization(scalar),
            Value::Str(string) => self.string_serialization(string),
            Value::Array(array) => self.ndarray_serialization(array),
            Value::Axis(axis) => self.axis_serialization(axis),
            Value::Dwa(dwa) => self.dwa_serialization(dwa),
            Value::Dte(dte) => self.dte_serialization(dte),
            Value::List(values) => self.list_serialization(values),
        }
    }

    fn int_serialization(&mut self, value: usize) -> AppResult<()> {
        let raw = Self::int_to_bytes(value)?;
        self.buffer.put_slice(&raw);
        Ok(())
    }

    pub fn bytes_serialization(&mut self, raw: &[u8]) -> AppResult<()> {
        self.int_serialization(raw.len())?;
        self.buffer.put_slice(raw);
        Ok(())
    }

    pub fn string_serialization(&mut self, string: &str) -> AppResult<()> {
        self.bytes_serialization(string.as_bytes())
    }

    pub fn scalar_serialization(&mut self, scalar: &Scalar) -> AppResult<()> {
        self.string_serialization(scalar.dtype().typestr())?;
        self.bytes_serialization(scalar.as_bytes())
    }

    pub fn ndarray_serialization(&mut self, array: &NdArray) -> AppResult<()> {
        self.string_serialization(array.dtype().typestr())?;
        self.int_serialization(array.nbytes())?;
        self.int_serialization(array.ndim())?;
        for extent in array.shape() {
            self.int_serialization(*extent)?;
        }
        self.buffer.put_slice(array.as_bytes());
        Ok(())
    }

    pub fn axis_serialization(&mut self, axis: &Axis) -> AppResult<()> {
        self.string_serialization(AXIS_TYPE_NAME)?;
        self.string_serialization(axis.label())?;
        self.string_serialization(axis.units())?;
        self.ndarray_serialization(&axis.to_array())?;
        self.scalar_serialization(&index_scalar(axis.index())?)?;
        self.scalar_serialization(&index_scalar(axis.spread_order())?)
    }

    /// `[count]` followed by each element with its kind tag.
    pub fn list_serialization(&mut self, values: &[Value]) -> AppResult<()> {
        self.int_serialization(values.len())?;
        for value in values {
            self.type_and_object_serialization(value)?;
        }
        Ok(())
    }

    /// Kind tag followed by the element; only list-element kinds are accepted.
    pub fn type_and_object_serialization(&mut self, value: &Value) -> AppResult<()> {
        match value {
            Value::Scalar(scalar) => {
                self.string_serialization(SCALAR_TAG)?;
                self.scalar_serialization(scalar)
            }
            Value::Str(string) => {
                self.string_serialization(STRING_TAG)?;
                self.string_serialization(string)
            }
            Value::Array(array) => {
                self.string_serialization(ARRAY_TAG)?;
                self.ndarray_serialization(array)
            }
            Value::Axis(axis) => {
                self.string_serialization(AXIS_TAG)?;
                self.axis_serialization(axis)
            }
            Value::Dwa(dwa) => {
                self.string_serialization(DWA_TAG)?;
                self.dwa_serialization(dwa)
            }
            other => Err(ModaqError::Type(format!(
                "a {} cannot be a list element, only scalars, strings, arrays, axes or DataWithAxes",
                other.kind_name()
            ))),
        }
    }

    pub fn dwa_serialization(&mut self, dwa: &DataWithAxes) -> AppResult<()> {
        self.string_serialization(dwa.kind().name())?;
        self.scalar_serialization(&Scalar::from(dwa.timestamp()))?;
        self.string_serialization(dwa.name())?;
        self.string_serialization(dwa.source().name())?;
        self.string_serialization(dwa.dim().name())?;
        self.string_serialization(dwa.distribution().name())?;

        self.int_serialization(dwa.length())?;
        for array in dwa.data() {
            self.string_serialization(ARRAY_TAG)?;
            self.ndarray_serialization(array)?;
        }

        self.int_serialization(dwa.labels().len())?;
        for label in dwa.labels() {
            self.string_serialization(STRING_TAG)?;
            self.string_serialization(label)?;
        }

        self.string_serialization(dwa.origin())?;

        self.int_serialization(dwa.nav_indexes().len())?;
        for index in dwa.nav_indexes() {
            self.string_serialization(SCALAR_TAG)?;
            self.scalar_serialization(&index_scalar(*index)?)?;
        }

        self.int_serialization(dwa.axes().len())?;
        for axis in dwa.axes() {
            self.string_serialization(AXIS_TAG)?;
            self.axis_serialization(axis)?;
        }
        Ok(())
    }

    pub fn dte_serialization(&mut self, dte: &DataToExport) -> AppResult<()> {
        self.string_serialization(DTE_TYPE_NAME)?;
        self.scalar_serialization(&Scalar::from(dte.timestamp()))?;
        self.string_serialization(dte.name())?;
        self.int_serialization(dte.len())?;
        for dwa in dte {
            self.string_serialization(DWA_TAG)?;
            self.dwa_serialization(dwa)?;
        }
        Ok(())
    }
}

/// Indexes travel as `<i8` scalars.
fn index_scalar(index: usize) -> AppResult<Scalar> {
    let value = i64::try_from(index)
        .map_err(|_| ModaqError::Value(format!("index {index} does not fit an int64")))?;
    Ok(Scalar::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DType;

    #[test]
    fn test_int_to_bytes() {
        assert_eq!(Serializer::int_to_bytes(258).unwrap(), [0, 0, 1, 2]);
        if let Ok(too_big) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert!(matches!(
                Serializer::int_to_bytes(too_big),
                Err(ModaqError::Value(_))
            ));
        }
    }

    #[test]
    fn test_string_layout() {
        let bytes = Serializer::to_bytes(&Value::from("héllo")).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 6]);
        assert_eq!(&bytes[4..], "héllo".as_bytes());
    }

    #[test]
    fn test_scalar_layout() {
        let bytes = Serializer::to_bytes(&Value::from(1.5f64)).unwrap();
        let mut expected = vec![0, 0, 0, 3];
        expected.extend_from_slice(b"<f8");
        expected.extend_from_slice(&[0, 0, 0, 8]);
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_bool_is_b1_scalar() {
        let bytes = Serializer::to_bytes(&Value::from(true)).unwrap();
        assert_eq!(&bytes[4..7], b"|b1");
        assert_eq!(&bytes[7..], &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_ndarray_layout() {
        let array = NdArray::from_shape_vec(&[2, 1], vec![7i32, 8]).unwrap();
        let bytes = Serializer::to_bytes(&Value::Array(array)).unwrap();
        let mut expected = vec![0, 0, 0, 3];
        expected.extend_from_slice(b"<i4");
        expected.extend_from_slice(&[0, 0, 0, 8, 0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 1]);
        expected.extend_from_slice(&[7, 0, 0, 0, 8, 0, 0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_accumulating_buffer() {
        let mut serializer = Serializer::new();
        serializer.string_serialization("a").unwrap();
        serializer.bytes_serialization(&[9, 9]).unwrap();
        assert_eq!(serializer.as_bytes(), &[0, 0, 0, 1, b'a', 0, 0, 0, 2, 9, 9]);
    }

    #[test]
    fn test_list_rejects_unsupported_elements() {
        let list = Value::List(vec![Value::from(1i64), Value::Bytes(vec![1])]);
        assert!(matches!(Serializer::to_bytes(&list), Err(ModaqError::Type(_))));
        let nested = Value::List(vec![Value::List(Vec::new())]);
        assert!(matches!(Serializer::to_bytes(&nested), Err(ModaqError::Type(_))));
    }

    #[test]
    fn test_mixed_list_tags() {
        let list = Value::List(vec![
            Value::from("x"),
            Value::Array(NdArray::zeros(DType::UInt8, &[1])),
        ]);
        let bytes = Serializer::to_bytes(&list).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..14], b"string");
    }
}
