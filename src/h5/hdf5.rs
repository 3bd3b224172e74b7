//! HDF5 storage engine (feature `storage_hdf5`).
//!
//! Numeric arrays map onto native datasets, enlargeable arrays onto chunked datasets
//! with a resizable first dimension, and VLARRAYs onto a resizable 1D dataset of
//! variable-length byte rows whose element type is kept in the `dtype` attribute.
//! Only the deflate filter is available; complex dtypes are not supported.

use super::attrs::AttrValue;
use super::backend::{
    ArrayOps, AttrOps, BackendKind, Compression, CompressionLibrary, FileBackend, FileMode,
    GroupOps, StorageEngine,
};
use super::node::{node_name, parent_path, ROOT_PATH};
use crate::data::{DType, NdArray};
use crate::error::{AppResult, ModaqError};
use hdf5::types::{
    FixedAscii, FixedUnicode, FloatSize, IntSize, TypeDescriptor, VarLenArray, VarLenAscii,
    VarLenUnicode,
};
use hdf5::{Dataset, Extent, File, Group, Hyperslab, Location, SimpleExtents, SliceOrIndex};
use ndarray::{s, ArrayD, ArrayView1, IxDyn};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Rows per chunk along the enlargeable dimension.
const CHUNK_ROWS: usize = 64;

/// Longest fixed-size string attribute read back from foreign files.
const FIXED_TEXT_LEN: usize = 1024;

macro_rules! with_element {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::Bool => {
                type $t = bool;
                $body
            }
            DType::Int8 => {
                type $t = i8;
                $body
            }
            DType::UInt8 => {
                type $t = u8;
                $body
            }
            DType::Int16 => {
                type $t = i16;
                $body
            }
            DType::UInt16 => {
                type $t = u16;
                $body
            }
            DType::Int32 => {
                type $t = i32;
                $body
            }
            DType::UInt32 => {
                type $t = u32;
                $body
            }
            DType::Int64 => {
                type $t = i64;
                $body
            }
            DType::UInt64 => {
                type $t = u64;
                $body
            }
            DType::Float32 => {
                type $t = f32;
                $body
            }
            DType::Float64 => {
                type $t = f64;
                $body
            }
            dtype @ (DType::Complex64 | DType::Complex128) => Err(ModaqError::Type(format!(
                "the hdf5 engine cannot store {} arrays",
                dtype
            ))),
        }
    };
}

#[derive(Debug, Default)]
pub struct Hdf5Engine {
    file: Option<File>,
    path: Option<PathBuf>,
    mode: Option<FileMode>,
}

impl Hdf5Engine {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&self) -> AppResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| ModaqError::Value("no file is open".to_string()))
    }

    fn writable(&self) -> AppResult<&File> {
        if self.mode == Some(FileMode::Read) {
            return Err(ModaqError::Value("the file is opened read only".to_string()));
        }
        self.file()
    }

    fn parent_group(&self, path: &str) -> AppResult<(Group, String)> {
        let parent = parent_path(path)
            .ok_or_else(|| ModaqError::Node("the root node already exists".to_string()))?;
        let group = self.writable()?.group(&parent)?;
        let name = node_name(path).to_string();
        if group.link_exists(&name) {
            return Err(ModaqError::Node(format!("{path} already exists")));
        }
        Ok((group, name))
    }

    fn dataset(&self, path: &str) -> AppResult<Dataset> {
        Ok(self.file()?.dataset(path)?)
    }

    fn with_location<R>(
        &self,
        path: &str,
        action: impl FnOnce(&Location) -> AppResult<R>,
    ) -> AppResult<R> {
        let file = self.file()?;
        if let Ok(group) = file.group(path) {
            return action(&group);
        }
        let dataset = file.dataset(path)?;
        action(&dataset)
    }

    fn is_vlarray(dataset: &Dataset) -> AppResult<bool> {
        Ok(matches!(
            dataset.dtype()?.to_descriptor()?,
            TypeDescriptor::VarLenArray(_)
        ))
    }
}

fn to_text(value: &str) -> AppResult<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|err| ModaqError::Value(format!("invalid text attribute: {err}")))
}

fn write_location_attr(location: &Location, key: &str, value: &AttrValue) -> AppResult<()> {
    if location.attr_names()?.iter().any(|name| name == key) {
        location.delete_attr(key)?;
    }
    match value {
        AttrValue::Bool(v) => location.new_attr::<bool>().create(key)?.write_scalar(v)?,
        AttrValue::Int(v) => location.new_attr::<i64>().create(key)?.write_scalar(v)?,
        AttrValue::Float(v) => location.new_attr::<f64>().create(key)?.write_scalar(v)?,
        AttrValue::Str(_) | AttrValue::Json(_) => location
            .new_attr::<VarLenUnicode>()
            .create(key)?
            .write_scalar(&to_text(&value.to_text())?)?,
        AttrValue::Bytes(v) => location
            .new_attr::<u8>()
            .shape(v.len())
            .create(key)?
            .write_raw(v.as_slice())?,
        AttrValue::IntTuple(v) => location
            .new_attr::<i64>()
            .shape(v.len())
            .create(key)?
            .write_raw(v.as_slice())?,
        AttrValue::FloatTuple(v) => location
            .new_attr::<f64>()
            .shape(v.len())
            .create(key)?
            .write_raw(v.as_slice())?,
    }
    Ok(())
}

fn read_location_attr(location: &Location, key: &str) -> AppResult<Option<AttrValue>> {
    if !location.attr_names()?.iter().any(|name| name == key) {
        return Ok(None);
    }
    let attr = location.attr(key)?;
    let scalar = attr.ndim() == 0;
    let value = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::Boolean => AttrValue::Bool(attr.read_scalar::<bool>()?),
        TypeDescriptor::Unsigned(IntSize::U1) if !scalar => {
            AttrValue::Bytes(attr.read_raw::<u8>()?)
        }
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) if scalar => {
            AttrValue::Int(attr.read_scalar::<i64>()?)
        }
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            AttrValue::IntTuple(attr.read_raw::<i64>()?)
        }
        TypeDescriptor::Float(_) if scalar => AttrValue::Float(attr.read_scalar::<f64>()?),
        TypeDescriptor::Float(_) => AttrValue::FloatTuple(attr.read_raw::<f64>()?),
        TypeDescriptor::VarLenUnicode => {
            AttrValue::Str(attr.read_scalar::<VarLenUnicode>()?.as_str().to_string())
        }
        TypeDescriptor::VarLenAscii => {
            AttrValue::Str(attr.read_scalar::<VarLenAscii>()?.as_str().to_string())
        }
        TypeDescriptor::FixedAscii(_) => AttrValue::Bytes(
            attr.read_scalar::<FixedAscii<FIXED_TEXT_LEN>>()?
                .as_bytes()
                .to_vec(),
        ),
        TypeDescriptor::FixedUnicode(_) => AttrValue::Bytes(
            attr.read_scalar::<FixedUnicode<FIXED_TEXT_LEN>>()?
                .as_bytes()
                .to_vec(),
        ),
        other => {
            return Err(ModaqError::Type(format!(
                "attribute '{key}' has an unsupported type {other:?}"
            )))
        }
    };
    Ok(Some(value))
}

fn dtype_of(descriptor: &TypeDescriptor) -> AppResult<DType> {
    Ok(match descriptor {
        TypeDescriptor::Boolean => DType::Bool,
        TypeDescriptor::Integer(IntSize::U1) => DType::Int8,
        TypeDescriptor::Integer(IntSize::U2) => DType::Int16,
        TypeDescriptor::Integer(IntSize::U4) => DType::Int32,
        TypeDescriptor::Integer(IntSize::U8) => DType::Int64,
        TypeDescriptor::Unsigned(IntSize::U1) => DType::UInt8,
        TypeDescriptor::Unsigned(IntSize::U2) => DType::UInt16,
        TypeDescriptor::Unsigned(IntSize::U4) => DType::UInt32,
        TypeDescriptor::Unsigned(IntSize::U8) => DType::UInt64,
        TypeDescriptor::Float(FloatSize::U4) => DType::Float32,
        TypeDescriptor::Float(FloatSize::U8) => DType::Float64,
        other => {
            return Err(ModaqError::Type(format!(
                "dataset element type {other:?} has no dtype"
            )))
        }
    })
}

impl FileBackend for Hdf5Engine {
    fn open(&mut self, path: &Path, mode: FileMode) -> AppResult<()> {
        let file = match mode {
            FileMode::Read if !path.is_file() => {
                return Err(ModaqError::Value(format!(
                    "cannot open {} for reading: no such file",
                    path.display()
                )))
            }
            FileMode::Read => File::open(path)?,
            FileMode::Write => File::create(path)?,
            FileMode::Append => File::append(path)?,
        };
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        self.mode = Some(mode);
        Ok(())
    }

    fn flush(&mut self) -> AppResult<()> {
        if let (Some(file), Some(FileMode::Write | FileMode::Append)) = (&self.file, self.mode) {
            file.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.flush()?;
        self.file = None;
        self.path = None;
        self.mode = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl AttrOps for Hdf5Engine {
    fn read_attr(&self, path: &str, key: &str) -> AppResult<Option<AttrValue>> {
        self.with_location(path, |location| read_location_attr(location, key))
    }

    fn write_attr(&mut self, path: &str, key: &str, value: &AttrValue) -> AppResult<()> {
        self.writable()?;
        self.with_location(path, |location| write_location_attr(location, key, value))
    }

    fn attr_names(&self, path: &str) -> AppResult<Vec<String>> {
        self.with_location(path, |location| Ok(location.attr_names()?))
    }
}

impl GroupOps for Hdf5Engine {
    fn create_group(&mut self, path: &str) -> AppResult<()> {
        let (parent, name) = self.parent_group(path)?;
        parent.create_group(&name)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        match self.file() {
            Ok(_) if path == ROOT_PATH => true,
            Ok(file) => file.link_exists(path),
            Err(_) => false,
        }
    }

    fn is_group(&self, path: &str) -> AppResult<bool> {
        let file = self.file()?;
        if file.group(path).is_ok() {
            return Ok(true);
        }
        file.dataset(path)?;
        Ok(false)
    }

    fn child_names(&self, path: &str) -> AppResult<Vec<String>> {
        Ok(self.file()?.group(path)?.member_names()?)
    }

    fn remove(&mut self, path: &str) -> AppResult<()> {
        let parent = parent_path(path)
            .ok_or_else(|| ModaqError::Node("the root node cannot be removed".to_string()))?;
        self.writable()?.group(&parent)?.unlink(node_name(path))?;
        Ok(())
    }
}

impl ArrayOps for Hdf5Engine {
    fn create_array(
        &mut self,
        path: &str,
        data: &NdArray,
        compression: &Compression,
    ) -> AppResult<()> {
        let (parent, name) = self.parent_group(path)?;
        let shape = data.shape().to_vec();
        let filtered = compression.is_enabled() && !shape.is_empty() && data.size() > 0;
        with_element!(data.dtype(), T => {
            let values = data.to_vec::<T>()?;
            let mut builder = parent.new_dataset::<T>().shape(shape.clone());
            if filtered {
                builder = builder.chunk(shape.clone()).deflate(compression.level());
            }
            builder.create(name.as_str())?.write_raw(values.as_slice())?;
            Ok(())
        })
    }

    fn create_extendable(
        &mut self,
        path: &str,
        dtype: DType,
        row_shape: &[usize],
        compression: &Compression,
    ) -> AppResult<()> {
        let (parent, name) = self.parent_group(path)?;
        let mut extents = vec![Extent::resizable(0)];
        extents.extend(row_shape.iter().map(|&dim| Extent::fixed(dim)));
        let mut chunk = vec![CHUNK_ROWS];
        chunk.extend(row_shape.iter().map(|&dim| dim.max(1)));
        with_element!(dtype, T => {
            let mut builder = parent
                .new_dataset::<T>()
                .shape(SimpleExtents::new(extents))
                .chunk(chunk);
            if compression.is_enabled() {
                builder = builder.deflate(compression.level());
            }
            builder.create(name.as_str())?;
            Ok(())
        })
    }

    fn append_rows(&mut self, path: &str, rows: &NdArray) -> AppResult<usize> {
        self.writable()?;
        let dataset = self.dataset(path)?;
        let mut shape = dataset.shape();
        let start = shape.first().copied().unwrap_or(0);
        let count = rows.shape().first().copied().unwrap_or(0);
        shape[0] = start + count;
        dataset.resize(shape.clone())?;
        let mut slab: Vec<SliceOrIndex> = vec![(start..start + count).into()];
        slab.extend(shape[1..].iter().map(|_| SliceOrIndex::from(..)));
        with_element!(rows.dtype(), T => {
            let block = ArrayD::from_shape_vec(IxDyn(rows.shape()), rows.to_vec::<T>()?)
                .map_err(|err| ModaqError::Shape(err.to_string()))?;
            dataset.write_slice(&block, Hyperslab::from(slab))?;
            Ok(())
        })?;
        Ok(start + count)
    }

    fn create_vlarray(
        &mut self,
        path: &str,
        _dtype: DType,
        compression: &Compression,
    ) -> AppResult<()> {
        let (parent, name) = self.parent_group(path)?;
        let mut builder = parent
            .new_dataset::<VarLenArray<u8>>()
            .shape(SimpleExtents::new(vec![Extent::resizable(0)]))
            .chunk(vec![CHUNK_ROWS]);
        if compression.is_enabled() {
            builder = builder.deflate(compression.level());
        }
        builder.create(name.as_str())?;
        Ok(())
    }

    fn append_vlrow(&mut self, path: &str, row: &NdArray) -> AppResult<usize> {
        self.writable()?;
        let dataset = self.dataset(path)?;
        let start = dataset.shape().first().copied().unwrap_or(0);
        dataset.resize(vec![start + 1])?;
        let rows = [VarLenArray::from_slice(row.as_bytes())];
        dataset.write_slice(ArrayView1::from(&rows[..]), s![start..start + 1])?;
        Ok(start + 1)
    }

    fn read_array(&self, path: &str) -> AppResult<NdArray> {
        let dataset = self.dataset(path)?;
        let shape = dataset.shape();
        with_element!(self.array_dtype(path)?, T => {
            NdArray::from_shape_vec(&shape, dataset.read_raw::<T>()?)
        })
    }

    fn read_vlrows(&self, path: &str) -> AppResult<Vec<NdArray>> {
        let dtype = self.array_dtype(path)?;
        self.dataset(path)?
            .read_raw::<VarLenArray<u8>>()?
            .iter()
            .map(|row| {
                let bytes = row.as_slice().to_vec();
                NdArray::from_raw(dtype, vec![bytes.len() / dtype.item_size()], bytes)
            })
            .collect()
    }

    fn array_shape(&self, path: &str) -> AppResult<Vec<usize>> {
        Ok(self.dataset(path)?.shape())
    }

    fn array_dtype(&self, path: &str) -> AppResult<DType> {
        let dataset = self.dataset(path)?;
        if Self::is_vlarray(&dataset)? {
            return match read_location_attr(&dataset, "dtype")? {
                Some(AttrValue::Str(name)) => DType::from_name(&name),
                _ => Err(ModaqError::Node(format!("{path} has no dtype attribute"))),
            };
        }
        dtype_of(&dataset.dtype()?.to_descriptor()?)
    }
}

impl StorageEngine for Hdf5Engine {
    fn kind(&self) -> BackendKind {
        BackendKind::Hdf5
    }

    fn supports_compression(&self, library: CompressionLibrary) -> bool {
        library.is_deflate() || library == CompressionLibrary::Disabled
    }
}
