//! Dtype-tagged n-dimensional arrays and scalars.
//!
//! `NdArray` stores its elements as a flat little-endian byte buffer together with a
//! NumPy-compatible dtype and a shape. Keeping the payload untyped lets the wire codec and
//! the storage engines move arrays around without monomorphizing over element types,
//! while `Element` gives typed access at the edges.

use crate::error::{AppResult, ModaqError};
use bytes::{Bytes, BytesMut};
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of element types, named after NumPy typestrs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    pub const ALL: [DType; 13] = [
        DType::Bool,
        DType::Int8,
        DType::UInt8,
        DType::Int16,
        DType::UInt16,
        DType::Int32,
        DType::UInt32,
        DType::Int64,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
        DType::Complex64,
        DType::Complex128,
    ];

    /// Size in bytes of one element.
    pub fn item_size(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    /// NumPy typestr in little-endian form, e.g. `<f8`.
    pub fn typestr(self) -> &'static str {
        match self {
            DType::Bool => "|b1",
            DType::Int8 => "|i1",
            DType::UInt8 => "|u1",
            DType::Int16 => "<i2",
            DType::UInt16 => "<u2",
            DType::Int32 => "<i4",
            DType::UInt32 => "<u4",
            DType::Int64 => "<i8",
            DType::UInt64 => "<u8",
            DType::Float32 => "<f4",
            DType::Float64 => "<f8",
            DType::Complex64 => "<c8",
            DType::Complex128 => "<c16",
        }
    }

    /// NumPy dtype name, used for the `dtype` attribute of stored arrays.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::UInt16 => "uint16",
            DType::Int32 => "int32",
            DType::UInt32 => "uint32",
            DType::Int64 => "int64",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }

    /// Parse a dtype name (`float64`) back into a `DType`.
    pub fn from_name(name: &str) -> AppResult<Self> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.name() == name)
            .ok_or_else(|| ModaqError::Value(format!("unknown dtype name '{name}'")))
    }

    /// Parse a NumPy typestr. Returns the dtype and whether the payload is big-endian.
    pub fn parse(typestr: &str) -> AppResult<(Self, bool)> {
        let unsupported = || ModaqError::Type(format!("unsupported dtype string '{typestr}'"));
        let mut chars = typestr.chars();
        let order = chars.next().ok_or_else(unsupported)?;
        let code = &typestr[order.len_utf8()..];
        let big_endian = match order {
            '<' | '|' | '=' => false,
            '>' => true,
            _ => return Err(unsupported()),
        };
        let dtype = match code {
            "b1" => DType::Bool,
            "i1" => DType::Int8,
            "u1" => DType::UInt8,
            "i2" => DType::Int16,
            "u2" => DType::UInt16,
            "i4" => DType::Int32,
            "u4" => DType::UInt32,
            "i8" => DType::Int64,
            "u8" => DType::UInt64,
            "f4" => DType::Float32,
            "f8" => DType::Float64,
            "c8" => DType::Complex64,
            "c16" => DType::Complex128,
            _ => return Err(unsupported()),
        };
        Ok((dtype, big_endian && dtype.item_size() > 1))
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// Width of the byte-swap unit (complex values swap each component separately).
    fn swap_unit(self) -> usize {
        match self {
            DType::Complex64 => 4,
            DType::Complex128 => 8,
            other => other.item_size(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.typestr())
    }
}

/// A Rust type that maps one-to-one onto a `DType`.
pub trait Element: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(&self, out: &mut BytesMut);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(&self, out: &mut BytesMut) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(i8, DType::Int8);
impl_element!(u8, DType::UInt8);
impl_element!(i16, DType::Int16);
impl_element!(u16, DType::UInt16);
impl_element!(i32, DType::Int32);
impl_element!(u32, DType::UInt32);
impl_element!(i64, DType::Int64);
impl_element!(u64, DType::UInt64);
impl_element!(f32, DType::Float32);
impl_element!(f64, DType::Float64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[u8::from(*self)]);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl Element for Complex32 {
    const DTYPE: DType = DType::Complex64;

    fn write_le(&self, out: &mut BytesMut) {
        out.extend_from_slice(&self.re.to_le_bytes());
        out.extend_from_slice(&self.im.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        Complex32::new(f32::read_le(&bytes[..4]), f32::read_le(&bytes[4..8]))
    }
}

impl Element for Complex64 {
    const DTYPE: DType = DType::Complex128;

    fn write_le(&self, out: &mut BytesMut) {
        out.extend_from_slice(&self.re.to_le_bytes());
        out.extend_from_slice(&self.im.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        Complex64::new(f64::read_le(&bytes[..8]), f64::read_le(&bytes[8..16]))
    }
}

fn encode<T: Element>(values: &[T]) -> Bytes {
    let mut out = BytesMut::with_capacity(values.len() * T::DTYPE.item_size());
    for value in values {
        value.write_le(&mut out);
    }
    out.freeze()
}

/// Read element `index` of a little-endian buffer of dtype `dtype` as a complex number.
fn element_as_complex(dtype: DType, raw: &[u8]) -> Complex64 {
    let real = |v: f64| Complex64::new(v, 0.0);
    match dtype {
        DType::Bool => real(if raw[0] != 0 { 1.0 } else { 0.0 }),
        DType::Int8 => real(f64::from(i8::read_le(raw))),
        DType::UInt8 => real(f64::from(u8::read_le(raw))),
        DType::Int16 => real(f64::from(i16::read_le(raw))),
        DType::UInt16 => real(f64::from(u16::read_le(raw))),
        DType::Int32 => real(f64::from(i32::read_le(raw))),
        DType::UInt32 => real(f64::from(u32::read_le(raw))),
        DType::Int64 => real(i64::read_le(raw) as f64),
        DType::UInt64 => real(u64::read_le(raw) as f64),
        DType::Float32 => real(f64::from(f32::read_le(raw))),
        DType::Float64 => real(f64::read_le(raw)),
        DType::Complex64 => {
            let c = Complex32::read_le(raw);
            Complex64::new(f64::from(c.re), f64::from(c.im))
        }
        DType::Complex128 => Complex64::read_le(raw),
    }
}

/// N-dimensional array with a flat little-endian payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("dtype", &self.dtype.typestr())
            .field("shape", &self.shape)
            .field("nbytes", &self.data.len())
            .finish()
    }
}

/// Byte length of a `dtype` array of `shape`, failing instead of overflowing.
fn checked_nbytes(dtype: DType, shape: &[usize]) -> AppResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .and_then(|size| size.checked_mul(dtype.item_size()))
        .ok_or_else(|| {
            ModaqError::Shape(format!("shape {shape:?} of dtype {dtype} overflows the address space"))
        })
}

impl NdArray {
    /// Build an array from raw little-endian bytes, checking the byte count.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: impl Into<Vec<u8>>) -> AppResult<Self> {
        let data = data.into();
        let expected = checked_nbytes(dtype, &shape)?;
        if data.len() != expected {
            return Err(ModaqError::Shape(format!(
                "{} bytes cannot fill a {} array of shape {:?} ({} bytes expected)",
                data.len(),
                dtype,
                shape,
                expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// 1D array from a vector of elements.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        Self {
            dtype: T::DTYPE,
            shape,
            data: encode(&values).to_vec(),
        }
    }

    /// Array of the given shape from row-major elements.
    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> AppResult<Self> {
        Self::from_raw(T::DTYPE, shape.to_vec(), encode(&values).to_vec())
    }

    /// Rank-0 array holding a single element.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            data: encode(&[value]).to_vec(),
        }
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let size: usize = shape.iter().product();
        Self {
            dtype,
            shape: shape.to_vec(),
            data: vec![0u8; size * dtype.item_size()],
        }
    }

    /// Array of `shape` where every element is NaN (floating dtypes) or zero.
    pub fn filled_missing(dtype: DType, shape: &[usize]) -> Self {
        let size: usize = shape.iter().product();
        match dtype {
            DType::Float32 => Self::from_raw(dtype, shape.to_vec(), encode(&vec![f32::NAN; size]).to_vec()),
            DType::Float64 => Self::from_raw(dtype, shape.to_vec(), encode(&vec![f64::NAN; size]).to_vec()),
            _ => Ok(Self::zeros(dtype, shape)),
        }
        .unwrap_or_else(|_| Self::zeros(dtype, shape))
    }

    /// `num` evenly spaced float64 samples from `start` to `stop` inclusive.
    pub fn linspace(start: f64, stop: f64, num: usize) -> Self {
        let values = match num {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let step = (stop - start) / (num - 1) as f64;
                (0..num).map(|i| start + step * i as f64).collect()
            }
        };
        Self::from_vec(values)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Flat little-endian payload in row-major order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Same data viewed with another shape of identical element count.
    pub fn reshape(mut self, shape: &[usize]) -> AppResult<Self> {
        let size: usize = shape.iter().product();
        if size != self.size() {
            return Err(ModaqError::Shape(format!(
                "cannot reshape array of shape {:?} into {:?}",
                self.shape, shape
            )));
        }
        self.shape = shape.to_vec();
        Ok(self)
    }

    /// Promote a rank-0 array to shape `[1]`; other ranks are untouched.
    pub fn at_least_1d(mut self) -> Self {
        if self.shape.is_empty() {
            self.shape = vec![1];
        }
        self
    }

    /// Typed copy of the elements; fails if `T` does not match the dtype.
    pub fn to_vec<T: Element>(&self) -> AppResult<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(ModaqError::Type(format!(
                "array holds {} elements, not {}",
                self.dtype,
                T::DTYPE
            )));
        }
        let width = self.dtype.item_size();
        Ok(self.data.chunks_exact(width).map(T::read_le).collect())
    }

    /// Elements converted to complex numbers, whatever the dtype.
    pub fn to_complex_vec(&self) -> Vec<Complex64> {
        let width = self.dtype.item_size();
        self.data
            .chunks_exact(width)
            .map(|raw| element_as_complex(self.dtype, raw))
            .collect()
    }

    /// Real part of the elements as float64, whatever the dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.to_complex_vec().into_iter().map(|c| c.re).collect()
    }

    /// Reorder a big-endian payload into the canonical little-endian layout.
    pub(crate) fn swap_byte_order(mut self) -> Self {
        let unit = self.dtype.swap_unit();
        if unit > 1 {
            for chunk in self.data.chunks_exact_mut(unit) {
                chunk.reverse();
            }
        }
        self
    }

    /// Sub-array at position `index` along the leading dimension.
    pub fn row(&self, index: usize) -> AppResult<NdArray> {
        let leading = *self.shape.first().ok_or_else(|| {
            ModaqError::Shape("cannot take a row of a rank-0 array".to_string())
        })?;
        if index >= leading {
            return Err(ModaqError::Shape(format!(
                "row {index} out of bounds for leading extent {leading}"
            )));
        }
        let row_shape = self.shape[1..].to_vec();
        let row_bytes: usize = row_shape.iter().product::<usize>() * self.dtype.item_size();
        let start = index * row_bytes;
        Self::from_raw(
            self.dtype,
            row_shape,
            self.data[start..start + row_bytes].to_vec(),
        )
    }

    /// Stack same-shape arrays along a new leading dimension.
    pub fn stack(arrays: &[NdArray]) -> AppResult<NdArray> {
        let first = arrays
            .first()
            .ok_or_else(|| ModaqError::Shape("cannot stack an empty list of arrays".to_string()))?;
        let mut data = Vec::with_capacity(first.nbytes() * arrays.len());
        for array in arrays {
            if array.dtype != first.dtype || array.shape != first.shape {
                return Err(ModaqError::Shape(format!(
                    "cannot stack {} {:?} with {} {:?}",
                    array.dtype, array.shape, first.dtype, first.shape
                )));
            }
            data.extend_from_slice(&array.data);
        }
        let mut shape = vec![arrays.len()];
        shape.extend_from_slice(&first.shape);
        Self::from_raw(first.dtype, shape, data)
    }

    /// Concatenate along the existing leading dimension.
    pub fn concat_rows(&self, other: &NdArray) -> AppResult<NdArray> {
        if self.dtype != other.dtype || self.shape.get(1..) != other.shape.get(1..) {
            return Err(ModaqError::Shape(format!(
                "cannot concatenate {} {:?} with {} {:?}",
                self.dtype, self.shape, other.dtype, other.shape
            )));
        }
        let (Some(&rows), Some(&more)) = (self.shape.first(), other.shape.first()) else {
            return Err(ModaqError::Shape(
                "cannot concatenate rows of a rank-0 array".to_string(),
            ));
        };
        let mut shape = self.shape.clone();
        shape[0] = rows + more;
        let mut data = self.data.clone();
        data.extend_from_slice(&other.data);
        Self::from_raw(self.dtype, shape, data)
    }

    /// Element-wise closeness, NumPy `allclose` semantics, shapes must match.
    pub fn allclose(&self, other: &NdArray, rtol: f64, atol: f64) -> bool {
        if self.shape != other.shape {
            return false;
        }
        self.to_complex_vec()
            .iter()
            .zip(other.to_complex_vec())
            .all(|(a, b)| (a - b).norm() <= atol + rtol * b.norm())
    }
}

/// A single number tagged with its exact dtype.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scalar {
    dtype: DType,
    raw: Vec<u8>,
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = element_as_complex(self.dtype, &self.raw);
        if self.dtype.is_complex() {
            write!(f, "Scalar({}: {})", self.dtype, value)
        } else {
            write!(f, "Scalar({}: {})", self.dtype, value.re)
        }
    }
}

impl Scalar {
    pub fn new<T: Element>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            raw: encode(&[value]).to_vec(),
        }
    }

    /// Build from the bytes of a one-element array.
    pub fn from_raw(dtype: DType, raw: impl Into<Vec<u8>>) -> AppResult<Self> {
        let raw = raw.into();
        if raw.len() != dtype.item_size() {
            return Err(ModaqError::Shape(format!(
                "scalar of dtype {} needs {} bytes, got {}",
                dtype,
                dtype.item_size(),
                raw.len()
            )));
        }
        Ok(Self { dtype, raw })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn as_complex(&self) -> Complex64 {
        element_as_complex(self.dtype, &self.raw)
    }

    pub fn as_f64(&self) -> f64 {
        self.as_complex().re
    }

    /// Integer value; fails for floating or complex dtypes.
    pub fn as_i64(&self) -> AppResult<i64> {
        match self.dtype {
            DType::Bool => Ok(i64::from(self.raw.first().is_some_and(|b| *b != 0))),
            DType::Int8 => Ok(i64::from(i8::read_le(&self.raw))),
            DType::UInt8 => Ok(i64::from(u8::read_le(&self.raw))),
            DType::Int16 => Ok(i64::from(i16::read_le(&self.raw))),
            DType::UInt16 => Ok(i64::from(u16::read_le(&self.raw))),
            DType::Int32 => Ok(i64::from(i32::read_le(&self.raw))),
            DType::UInt32 => Ok(i64::from(u32::read_le(&self.raw))),
            DType::Int64 => Ok(i64::read_le(&self.raw)),
            DType::UInt64 => i64::try_from(u64::read_le(&self.raw))
                .map_err(|_| ModaqError::Value("uint64 scalar overflows i64".to_string())),
            DType::Float32 | DType::Float64 | DType::Complex64 | DType::Complex128 => Err(
                ModaqError::Type(format!("scalar of dtype {} is not an integer", self.dtype)),
            ),
        }
    }

    /// Non-negative integer, used for indexes.
    pub fn as_usize(&self) -> AppResult<usize> {
        let value = self.as_i64()?;
        usize::try_from(value)
            .map_err(|_| ModaqError::Value(format!("expected a non-negative integer, got {value}")))
    }

    pub fn as_bool(&self) -> bool {
        self.as_complex() != Complex64::new(0.0, 0.0)
    }
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Scalar {
            fn from(value: $ty) -> Self {
                Scalar::new(value)
            }
        })*
    };
}

scalar_from!(bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, Complex32, Complex64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typestr_roundtrip() {
        for dtype in DType::ALL {
            let (parsed, big) = DType::parse(dtype.typestr()).unwrap();
            assert_eq!(parsed, dtype);
            assert!(!big);
            assert_eq!(DType::from_name(dtype.name()).unwrap(), dtype);
        }
        assert!(matches!(DType::parse("<U8"), Err(ModaqError::Type(_))));
        assert_eq!(DType::parse(">f8").unwrap(), (DType::Float64, true));
        assert_eq!(DType::parse(">i1").unwrap(), (DType::Int8, false));
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(NdArray::from_raw(DType::Float64, vec![2, 2], vec![0u8; 32]).is_ok());
        let err = NdArray::from_raw(DType::Float64, vec![2, 2], vec![0u8; 31]).unwrap_err();
        assert!(matches!(err, ModaqError::Shape(_)));
    }

    #[test]
    fn test_typed_readback() {
        let array = NdArray::from_shape_vec(&[2, 3], vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(array.ndim(), 2);
        assert_eq!(array.size(), 6);
        assert_eq!(array.nbytes(), 24);
        assert_eq!(array.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(array.to_vec::<f64>().is_err());
        assert_eq!(array.row(1).unwrap().to_vec::<i32>().unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_byte_swap_complex_components() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1.5f32.to_be_bytes());
        raw.extend_from_slice(&(-2.0f32).to_be_bytes());
        let array = NdArray::from_raw(DType::Complex64, vec![1], raw)
            .unwrap()
            .swap_byte_order();
        assert_eq!(
            array.to_vec::<Complex32>().unwrap(),
            vec![Complex32::new(1.5, -2.0)]
        );
    }

    #[test]
    fn test_stack_and_concat() {
        let a = NdArray::from_vec(vec![1.0f32, 2.0]);
        let b = NdArray::from_vec(vec![3.0f32, 4.0]);
        let stacked = NdArray::stack(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2]);
        let joined = stacked.concat_rows(&stacked).unwrap();
        assert_eq!(joined.shape(), &[4, 2]);
        assert!(NdArray::stack(&[a, NdArray::from_vec(vec![1.0f64, 2.0])]).is_err());
    }

    #[test]
    fn test_at_least_1d() {
        assert_eq!(NdArray::scalar(3u8).at_least_1d().shape(), &[1]);
        assert_eq!(NdArray::zeros(DType::Float64, &[1, 1]).at_least_1d().shape(), &[1, 1]);
    }

    #[test]
    fn test_scalar_accessors() {
        assert_eq!(Scalar::from(7i64).as_usize().unwrap(), 7);
        assert!(matches!(Scalar::from(-1i32).as_usize(), Err(ModaqError::Value(_))));
        assert!(matches!(Scalar::from(1.5f64).as_i64(), Err(ModaqError::Type(_))));
        assert!(Scalar::from(true).as_bool());
        assert_eq!(Scalar::from(2.5f32).as_f64(), 2.5);
    }

    #[test]
    fn test_integer_scalars_stay_exact() {
        let big = 9_007_199_254_740_993i64;
        assert_eq!(Scalar::from(big).as_i64().unwrap(), big);
        assert_eq!(Scalar::from(-big).as_i64().unwrap(), -big);
        assert_eq!(Scalar::from(u32::MAX).as_i64().unwrap(), i64::from(u32::MAX));
        assert_eq!(Scalar::from(i8::MIN).as_i64().unwrap(), -128);
        assert_eq!(Scalar::from(big as u64).as_usize().unwrap(), big as usize);
        assert!(matches!(Scalar::from(u64::MAX).as_i64(), Err(ModaqError::Value(_))));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let huge = u32::MAX as usize;
        let err = NdArray::from_raw(DType::Float64, vec![huge, huge, huge], Vec::new()).unwrap_err();
        assert!(matches!(err, ModaqError::Shape(_)));
        assert!(matches!(
            NdArray::from_raw(DType::Complex128, vec![usize::MAX / 8], Vec::new()),
            Err(ModaqError::Shape(_))
        ));
    }

    #[test]
    fn test_concat_rows_rejects_rank_0() {
        let point = NdArray::scalar(3u8);
        assert!(matches!(point.concat_rows(&point), Err(ModaqError::Shape(_))));
    }

    #[test]
    fn test_allclose() {
        let a = NdArray::linspace(0.0, 1.0, 5);
        let b = NdArray::from_vec(vec![0.0, 0.25, 0.5, 0.75, 1.0 + 1e-12]);
        assert!(a.allclose(&b, 1e-9, 1e-12));
        assert!(!a.allclose(&NdArray::linspace(0.0, 1.0, 4), 1e-9, 1e-12));
    }
}
