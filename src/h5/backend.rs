//! Engine-agnostic storage facade.
//!
//! Storage engines implement small capability traits ([`FileBackend`], [`AttrOps`],
//! [`GroupOps`], [`ArrayOps`]) over absolute node paths and know nothing of the file
//! conventions. [`H5Backend`] layers the conventions on top: the mandatory `CLASS`/
//! `TITLE` attributes, array bookkeeping (`shape`, `dtype`, `EXTDIM`), typed node
//! handles and tree walks. The engine is picked once, through [`open_backend`].

use super::attrs::{canonical_key, normalize_attr, AttrValue, Metadata};
use super::node::{
    check_child_name, join_path, normalize_path, parent_path, CArray, EArray, Group, Node,
    NodeClass, VlArray,
};
use super::tree::TreeEngine;
use crate::data::{DType, NdArray};
use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version tag stamped on the root of new files.
pub const MODAQ_VERSION: &str = env!("CARGO_PKG_VERSION");

named_enum!(
    /// Concrete storage engine.
    BackendKind: Value {
        Tree => "tree",
        Hdf5 => "hdf5",
    }
);

named_enum!(
    /// `r` read only, `w` create or truncate, `a` read/write creating when absent.
    FileMode: Value {
        Read => "r",
        Write => "w",
        Append => "a",
    }
);

named_enum!(
    /// Closed vocabulary of the `type` attribute of structural groups.
    GroupType: Value {
        Detector => "detector",
        Actuator => "actuator",
        Data => "data",
        Ch => "ch",
        Scan => "scan",
        ExternalH5 => "external_h5",
        DataDim => "data_dim",
        DataLogger => "data_logger",
    }
);

named_enum!(
    /// Compression filter library.
    CompressionLibrary: Value {
        Zlib => "zlib",
        Gzip => "gzip",
        Bzip2 => "bzip2",
        Blosc => "blosc",
        Disabled => "none",
    }
);

impl CompressionLibrary {
    /// zlib and gzip name the same deflate filter.
    pub fn is_deflate(self) -> bool {
        matches!(self, CompressionLibrary::Zlib | CompressionLibrary::Gzip)
    }
}

/// Filter applied to arrays created after it is defined.
///
/// Levels are passed through to the engine as-is; they are only comparable
/// between engines for the deflate family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    library: CompressionLibrary,
    level: u8,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            library: CompressionLibrary::Zlib,
            level: 5,
        }
    }
}

impl Compression {
    pub fn new(library: CompressionLibrary, level: u8) -> AppResult<Self> {
        if level > 9 {
            return Err(ModaqError::Value(format!(
                "compression level must be between 0 and 9, got {level}"
            )));
        }
        Ok(Self { library, level })
    }

    pub fn disabled() -> Self {
        Self {
            library: CompressionLibrary::Disabled,
            level: 0,
        }
    }

    pub fn library(&self) -> CompressionLibrary {
        self.library
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_enabled(&self) -> bool {
        self.library != CompressionLibrary::Disabled && self.level > 0
    }
}

/// Opening, flushing and closing the underlying file.
pub trait FileBackend {
    fn open(&mut self, path: &Path, mode: FileMode) -> AppResult<()>;
    fn flush(&mut self) -> AppResult<()>;
    fn close(&mut self) -> AppResult<()>;
    fn is_open(&self) -> bool;
    fn file_path(&self) -> Option<&Path>;
}

/// Raw attribute storage, no normalization.
pub trait AttrOps {
    fn read_attr(&self, path: &str, key: &str) -> AppResult<Option<AttrValue>>;
    fn write_attr(&mut self, path: &str, key: &str, value: &AttrValue) -> AppResult<()>;
    fn attr_names(&self, path: &str) -> AppResult<Vec<String>>;
}

/// Tree structure. Paths are absolute, `/` is the root group.
pub trait GroupOps {
    /// Create a group; the parent must exist and the name must be free.
    fn create_group(&mut self, path: &str) -> AppResult<()>;
    fn exists(&self, path: &str) -> bool;
    fn is_group(&self, path: &str) -> AppResult<bool>;
    fn child_names(&self, path: &str) -> AppResult<Vec<String>>;
    fn remove(&mut self, path: &str) -> AppResult<()>;
}

/// Array payloads.
pub trait ArrayOps {
    fn create_array(&mut self, path: &str, data: &NdArray, compression: &Compression)
        -> AppResult<()>;
    /// Array of shape `(0, *row_shape)` growing along its first dimension.
    fn create_extendable(
        &mut self,
        path: &str,
        dtype: DType,
        row_shape: &[usize],
        compression: &Compression,
    ) -> AppResult<()>;
    /// Append a block of rows; returns the new leading extent.
    fn append_rows(&mut self, path: &str, rows: &NdArray) -> AppResult<usize>;
    fn create_vlarray(&mut self, path: &str, dtype: DType, compression: &Compression)
        -> AppResult<()>;
    /// Append one 1D row; returns the new row count.
    fn append_vlrow(&mut self, path: &str, row: &NdArray) -> AppResult<usize>;
    fn read_array(&self, path: &str) -> AppResult<NdArray>;
    fn read_vlrows(&self, path: &str) -> AppResult<Vec<NdArray>>;
    fn array_shape(&self, path: &str) -> AppResult<Vec<usize>>;
    fn array_dtype(&self, path: &str) -> AppResult<DType>;
}

/// A complete storage engine.
pub trait StorageEngine: FileBackend + AttrOps + GroupOps + ArrayOps + Send {
    fn kind(&self) -> BackendKind;

    fn supports_compression(&self, _library: CompressionLibrary) -> bool {
        true
    }
}

/// Build an unopened engine of the given kind.
pub fn open_backend(kind: BackendKind) -> AppResult<Box<dyn StorageEngine>> {
    debug!("selecting the '{}' storage engine", kind);
    match kind {
        BackendKind::Tree => Ok(Box::new(TreeEngine::new())),
        BackendKind::Hdf5 => hdf5_engine(),
    }
}

#[cfg(feature = "storage_hdf5")]
fn hdf5_engine() -> AppResult<Box<dyn StorageEngine>> {
    Ok(Box::new(super::hdf5::Hdf5Engine::new()))
}

#[cfg(not(feature = "storage_hdf5"))]
fn hdf5_engine() -> AppResult<Box<dyn StorageEngine>> {
    Err(ModaqError::FeatureNotEnabled("storage_hdf5".to_string()))
}

/// First letter upper-cased, the rest untouched (`scan` -> `Scan`, `data_dim` -> `Data_dim`).
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// UTF-8 bytes of a string as a 1D uint8 array.
pub fn string_to_array(text: &str) -> NdArray {
    NdArray::from_vec(text.as_bytes().to_vec())
}

/// Inverse of [`string_to_array`].
pub fn array_to_string(array: &NdArray) -> AppResult<String> {
    let bytes = array.to_vec::<u8>()?;
    Ok(String::from_utf8(bytes)?)
}

/// Uniform API over one open file.
pub struct H5Backend {
    engine: Box<dyn StorageEngine>,
    compression: Compression,
}

impl fmt::Debug for H5Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H5Backend")
            .field("backend", &self.engine.kind())
            .field("file", &self.engine.file_path())
            .field("compression", &self.compression)
            .finish()
    }
}

impl H5Backend {
    pub fn new(kind: BackendKind) -> AppResult<Self> {
        Ok(Self::from_engine(open_backend(kind)?))
    }

    pub fn from_engine(engine: Box<dyn StorageEngine>) -> Self {
        Self {
            engine,
            compression: Compression::default(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.engine.kind()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    // ---- file -------------------------------------------------------------

    /// Open `path`, closing any file already open. New files get the root
    /// `TITLE`, version and date attributes.
    pub fn open_file(&mut self, path: impl AsRef<Path>, mode: FileMode, title: &str) -> AppResult<Group> {
        let path = path.as_ref();
        self.close_file()?;
        self.engine.open(path, mode)?;
        info!("opened {} in mode '{}' with the {} engine", path.display(), mode, self.backend());

        let root = self.root();
        let fresh = mode == FileMode::Write
            || (mode == FileMode::Append && !self.has_attr(&root, "TITLE")?);
        if fresh {
            self.set_attr(&root, "TITLE", title)?;
            self.set_attr(&root, "CLASS", NodeClass::Group.name())?;
            self.set_attr(&root, "pymodaq_version", MODAQ_VERSION)?;
            self.set_attr(
                &root,
                "date",
                chrono::Local::now().date_naive().format("%Y-%m-%d").to_string(),
            )?;
        }
        Ok(root)
    }

    pub fn close_file(&mut self) -> AppResult<()> {
        if self.engine.is_open() {
            self.engine.flush()?;
            self.engine.close()?;
            debug!("storage file closed");
        }
        Ok(())
    }

    pub fn flush(&mut self) -> AppResult<()> {
        self.engine.flush()
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.engine.file_path().map(Path::to_path_buf)
    }

    pub fn root(&self) -> Group {
        Group::root()
    }

    // ---- compression ------------------------------------------------------

    /// Select the filter for arrays created from now on.
    pub fn define_compression(&mut self, library: &str, level: u8) -> AppResult<()> {
        let library: CompressionLibrary = library.parse()?;
        self.set_compression(Compression::new(library, level)?)
    }

    pub fn set_compression(&mut self, compression: Compression) -> AppResult<()> {
        if !self.engine.supports_compression(compression.library()) {
            return Err(ModaqError::Value(format!(
                "the {} engine has no '{}' filter",
                self.backend(),
                compression.library()
            )));
        }
        self.compression = compression;
        Ok(())
    }

    // ---- attributes -------------------------------------------------------

    pub fn has_attr(&self, node: impl AsRef<str>, key: &str) -> AppResult<bool> {
        let path = self.existing_path(node.as_ref())?;
        Ok(self.engine.read_attr(&path, canonical_key(key))?.is_some())
    }

    /// Attribute value; a missing key is a `Node` error.
    pub fn get_attr(&self, node: impl AsRef<str>, key: &str) -> AppResult<AttrValue> {
        let path = node.as_ref();
        self.get_attr_opt(path, key)?
            .ok_or_else(|| ModaqError::Node(format!("{path} has no attribute '{key}'")))
    }

    pub fn get_attr_opt(&self, node: impl AsRef<str>, key: &str) -> AppResult<Option<AttrValue>> {
        let path = self.existing_path(node.as_ref())?;
        let key = canonical_key(key);
        Ok(self
            .engine
            .read_attr(&path, key)?
            .map(|value| normalize_attr(key, value)))
    }

    /// Every attribute of a node, normalized.
    pub fn get_attrs(&self, node: impl AsRef<str>) -> AppResult<Metadata> {
        let path = self.existing_path(node.as_ref())?;
        let mut attrs = Metadata::new();
        for key in self.engine.attr_names(&path)? {
            if let Some(value) = self.engine.read_attr(&path, &key)? {
                let value = normalize_attr(&key, value);
                attrs.insert(key, value);
            }
        }
        Ok(attrs)
    }

    pub fn set_attr(&mut self, node: impl AsRef<str>, key: &str, value: impl Into<AttrValue>) -> AppResult<()> {
        let path = self.existing_path(node.as_ref())?;
        self.engine.write_attr(&path, canonical_key(key), &value.into())
    }

    pub fn set_attrs(&mut self, node: impl AsRef<str>, attrs: &Metadata) -> AppResult<()> {
        let path = self.existing_path(node.as_ref())?;
        for (key, value) in attrs {
            self.engine.write_attr(&path, canonical_key(key), value)?;
        }
        Ok(())
    }

    // ---- navigation -------------------------------------------------------

    /// Resolve a path to a handle.
    pub fn get_node(&self, path: impl AsRef<str>) -> AppResult<Node> {
        let path = self.existing_path(path.as_ref())?;
        let class = match self.engine.read_attr(&path, "CLASS")? {
            Some(value) => match normalize_attr("CLASS", value) {
                AttrValue::Str(text) => text.parse()?,
                other => {
                    return Err(ModaqError::Node(format!(
                        "{path} has a non text CLASS attribute ({})",
                        other.kind_name()
                    )))
                }
            },
            None if self.engine.is_group(&path)? => NodeClass::Group,
            None => NodeClass::CArray,
        };
        let string_rows = class == NodeClass::VlArray
            && self
                .engine
                .read_attr(&path, "subdtype")?
                .is_some_and(|subdtype| subdtype == "string");
        Ok(Node::new(path, class).with_string_rows(string_rows))
    }

    /// Child `name` of `parent`.
    pub fn get_node_from(&self, parent: impl AsRef<str>, name: &str) -> AppResult<Node> {
        self.get_node(join_path(&normalize_path(parent.as_ref()), name))
    }

    pub fn get_group(&self, path: impl AsRef<str>) -> AppResult<Group> {
        Group::try_from(self.get_node(path)?)
    }

    pub fn get_carray(&self, path: impl AsRef<str>) -> AppResult<CArray> {
        CArray::try_from(self.get_node(path)?)
    }

    pub fn get_earray(&self, path: impl AsRef<str>) -> AppResult<EArray> {
        EArray::try_from(self.get_node(path)?)
    }

    pub fn get_vlarray(&self, path: impl AsRef<str>) -> AppResult<VlArray> {
        VlArray::try_from(self.get_node(path)?)
    }

    pub fn get_node_name(&self, node: &Node) -> String {
        node.name().to_string()
    }

    pub fn get_node_path(&self, node: &Node) -> String {
        node.path().to_string()
    }

    /// Parent group, `None` for the root.
    pub fn get_parent_node(&self, node: impl AsRef<str>) -> AppResult<Option<Group>> {
        match parent_path(&normalize_path(node.as_ref())) {
            Some(parent) => Ok(Some(self.get_group(parent)?)),
            None => Ok(None),
        }
    }

    /// Children of a group by name.
    pub fn get_children(&self, group: impl AsRef<str>) -> AppResult<BTreeMap<String, Node>> {
        let path = self.existing_path(group.as_ref())?;
        self.engine
            .child_names(&path)?
            .into_iter()
            .map(|name| {
                let node = self.get_node(join_path(&path, &name))?;
                Ok((name, node))
            })
            .collect()
    }

    /// Sorted child names.
    pub fn children_name(&self, group: impl AsRef<str>) -> AppResult<Vec<String>> {
        let path = self.existing_path(group.as_ref())?;
        let mut names = self.engine.child_names(&path)?;
        names.sort();
        Ok(names)
    }

    pub fn remove_children(&mut self, group: impl AsRef<str>) -> AppResult<()> {
        let path = self.existing_path(group.as_ref())?;
        for name in self.engine.child_names(&path)? {
            self.engine.remove(&join_path(&path, &name))?;
        }
        Ok(())
    }

    /// Case-insensitive child lookup.
    pub fn is_node_in_group(&self, group: impl AsRef<str>, name: &str) -> AppResult<bool> {
        let path = self.existing_path(group.as_ref())?;
        let name = name.to_lowercase();
        Ok(self
            .engine
            .child_names(&path)?
            .iter()
            .any(|child| child.to_lowercase() == name))
    }

    /// First child group whose `TITLE` matches.
    pub fn get_group_by_title(&self, parent: impl AsRef<str>, title: &str) -> AppResult<Option<Group>> {
        for node in self.get_children(parent)?.into_values() {
            if node.is_group() && self.get_attr_opt(&node, "TITLE")?.is_some_and(|t| t == title) {
                return Ok(Some(Group::try_from(node)?));
            }
        }
        Ok(None)
    }

    /// Every group below `start`, `start` first, depth first.
    /// Empty when `start` is not a group.
    pub fn walk_groups(&self, start: impl AsRef<str>) -> AppResult<Vec<Group>> {
        let start = self.get_node(start)?;
        if !start.is_group() {
            return Ok(Vec::new());
        }
        let mut groups = Vec::new();
        let mut stack = vec![Group::try_from(start)?];
        while let Some(group) = stack.pop() {
            let children = self.get_children(&group)?;
            for child in children.into_values().rev() {
                if child.is_group() {
                    stack.push(Group::try_from(child)?);
                }
            }
            groups.push(group);
        }
        Ok(groups)
    }

    /// `start` followed by every node of every group below it.
    pub fn walk_nodes(&self, start: impl AsRef<str>) -> AppResult<Vec<Node>> {
        let start = self.get_node(start)?;
        let mut nodes = vec![start.clone()];
        for group in self.walk_groups(&start)? {
            nodes.extend(self.get_children(&group)?.into_values());
        }
        Ok(nodes)
    }

    // ---- groups -----------------------------------------------------------

    /// Child group `name` of `parent`, created with `TITLE`/`CLASS` when absent.
    pub fn get_set_group(&mut self, parent: impl AsRef<str>, name: &str, title: &str) -> AppResult<Group> {
        let parent = self.existing_path(parent.as_ref())?;
        check_child_name(name)?;
        let path = join_path(&parent, name);
        if self.engine.exists(&path) {
            return self.get_group(path);
        }
        self.engine.create_group(&path)?;
        self.engine.write_attr(&path, "TITLE", &AttrValue::from(title))?;
        self.engine
            .write_attr(&path, "CLASS", &AttrValue::from(NodeClass::Group.name()))?;
        debug!("created group {}", path);
        self.get_group(path)
    }

    /// Typed structural group. An existing child with that exact name is returned
    /// as is; otherwise the capitalized name is got-or-created and stamped with
    /// `type` and `metadata`.
    pub fn add_group(
        &mut self,
        name: &str,
        group_type: GroupType,
        parent: impl AsRef<str>,
        title: &str,
        metadata: &Metadata,
    ) -> AppResult<Group> {
        let parent = self.existing_path(parent.as_ref())?;
        let group = if self.engine.exists(&join_path(&parent, name)) {
            self.get_group(join_path(&parent, name))?
        } else {
            let group = self.get_set_group(&parent, &capitalize(name), title)?;
            self.set_attr(&group, "type", group_type.name())?;
            self.set_attrs(&group, metadata)?;
            group
        };
        self.set_attr(&group, "backend", self.backend().name())?;
        Ok(group)
    }

    // ---- arrays -----------------------------------------------------------

    /// Fixed array written once. The title may not be empty.
    pub fn create_carray(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        data: &NdArray,
        title: &str,
    ) -> AppResult<CArray> {
        if title.is_empty() {
            return Err(ModaqError::Value(format!(
                "the CARRAY '{name}' needs a non empty title"
            )));
        }
        let path = self.new_child_path(parent.as_ref(), name)?;
        self.engine.create_array(&path, data, &self.compression)?;
        self.stamp_array(&path, NodeClass::CArray, data.dtype(), data.shape(), "", title)?;
        self.get_carray(path)
    }

    /// Enlargeable array of rows shaped `data_shape`.
    pub fn create_earray(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        dtype: DType,
        data_shape: &[usize],
        title: &str,
    ) -> AppResult<EArray> {
        let path = self.new_child_path(parent.as_ref(), name)?;
        self.engine
            .create_extendable(&path, dtype, data_shape, &self.compression)?;
        let mut shape = vec![0];
        shape.extend_from_slice(data_shape);
        self.stamp_array(&path, NodeClass::EArray, dtype, &shape, "", title)?;
        self.engine.write_attr(&path, "EXTDIM", &AttrValue::Int(0))?;
        self.get_earray(path)
    }

    /// Append either one row shaped like the rows of `array` or a block of rows.
    pub fn append(&mut self, array: &EArray, data: &NdArray) -> AppResult<()> {
        let path = array.path();
        let dtype = self.engine.array_dtype(path)?;
        if data.dtype() != dtype {
            return Err(ModaqError::Type(format!(
                "cannot append {} data to the {} array {}",
                data.dtype(),
                dtype,
                path
            )));
        }
        let shape = self.engine.array_shape(path)?;
        let row_shape = shape.get(1..).unwrap_or_default();
        let rows = if data.shape() == row_shape {
            let mut block_shape = vec![1];
            block_shape.extend_from_slice(row_shape);
            data.clone().reshape(&block_shape)?
        } else if data.shape().get(1..) == Some(row_shape) {
            data.clone()
        } else {
            return Err(ModaqError::Shape(format!(
                "cannot append data of shape {:?} to {} with rows of shape {:?}",
                data.shape(),
                path,
                row_shape
            )));
        };
        let extent = self.engine.append_rows(path, &rows)?;
        let mut new_shape = vec![extent];
        new_shape.extend_from_slice(row_shape);
        self.engine
            .write_attr(path, "shape", &AttrValue::from(new_shape))
    }

    /// Variable-length array of 1D `dtype` rows.
    pub fn create_vlarray(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        dtype: DType,
        title: &str,
    ) -> AppResult<VlArray> {
        self.new_vlarray(parent.as_ref(), name, dtype, "", title)
    }

    /// Variable-length array of UTF-8 strings, stored as uint8 rows.
    pub fn create_string_array(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        title: &str,
    ) -> AppResult<VlArray> {
        self.new_vlarray(parent.as_ref(), name, DType::UInt8, "string", title)
    }

    fn new_vlarray(
        &mut self,
        parent: &str,
        name: &str,
        dtype: DType,
        subdtype: &str,
        title: &str,
    ) -> AppResult<VlArray> {
        let path = self.new_child_path(parent, name)?;
        self.engine.create_vlarray(&path, dtype, &self.compression)?;
        self.stamp_array(&path, NodeClass::VlArray, dtype, &[0], subdtype, title)?;
        self.engine.write_attr(&path, "EXTDIM", &AttrValue::Int(0))?;
        self.get_vlarray(path)
    }

    pub fn vlarray_append(&mut self, array: &VlArray, row: &NdArray) -> AppResult<()> {
        let path = array.path();
        let dtype = self.engine.array_dtype(path)?;
        if row.dtype() != dtype {
            return Err(ModaqError::Type(format!(
                "cannot append a {} row to the {} array {}",
                row.dtype(),
                dtype,
                path
            )));
        }
        let row = row.clone().at_least_1d();
        if row.ndim() != 1 {
            return Err(ModaqError::Shape(format!(
                "rows of {} must be one dimensional, got shape {:?}",
                path,
                row.shape()
            )));
        }
        let count = self.engine.append_vlrow(path, &row)?;
        self.engine
            .write_attr(path, "shape", &AttrValue::from(vec![count]))
    }

    pub fn vlarray_read(&self, array: &VlArray) -> AppResult<Vec<NdArray>> {
        self.engine.read_vlrows(array.path())
    }

    pub fn append_string(&mut self, array: &VlArray, text: &str) -> AppResult<()> {
        if !array.is_string_array() {
            return Err(ModaqError::Type(format!("{} does not hold strings", array.path())));
        }
        self.vlarray_append(array, &string_to_array(text))
    }

    pub fn read_strings(&self, array: &VlArray) -> AppResult<Vec<String>> {
        self.vlarray_read(array)?
            .iter()
            .map(array_to_string)
            .collect()
    }

    /// Whole content of a CARRAY or EARRAY.
    pub fn read_array(&self, node: impl AsRef<str>) -> AppResult<NdArray> {
        let node = self.get_node(node)?;
        match node.class() {
            NodeClass::CArray | NodeClass::EArray => self.engine.read_array(node.path()),
            NodeClass::VlArray => Err(ModaqError::Type(format!(
                "{} has variable length rows, read it with vlarray_read",
                node.path()
            ))),
            NodeClass::Group => Err(ModaqError::Type(format!("{} is a group", node.path()))),
        }
    }

    /// Leading extent of an array (row count for VLARRAYs).
    pub fn array_len(&self, node: impl AsRef<str>) -> AppResult<usize> {
        let node = self.get_node(node)?;
        if node.is_group() {
            return Err(ModaqError::Type(format!("{} is a group", node.path())));
        }
        Ok(self
            .engine
            .array_shape(node.path())?
            .first()
            .copied()
            .unwrap_or(1))
    }

    // ---- helpers ----------------------------------------------------------

    fn existing_path(&self, path: &str) -> AppResult<String> {
        let path = normalize_path(path);
        if !self.engine.is_open() {
            return Err(ModaqError::Value("no file is open".to_string()));
        }
        if !self.engine.exists(&path) {
            return Err(ModaqError::Node(format!("no node at {path}")));
        }
        Ok(path)
    }

    fn new_child_path(&self, parent: &str, name: &str) -> AppResult<String> {
        let parent = self.existing_path(parent)?;
        check_child_name(name)?;
        if !self.engine.is_group(&parent)? {
            return Err(ModaqError::Node(format!("{parent} is not a group")));
        }
        let path = join_path(&parent, name);
        if self.engine.exists(&path) {
            return Err(ModaqError::Node(format!("{path} already exists")));
        }
        Ok(path)
    }

    fn stamp_array(
        &mut self,
        path: &str,
        class: NodeClass,
        dtype: DType,
        shape: &[usize],
        subdtype: &str,
        title: &str,
    ) -> AppResult<()> {
        let attrs = [
            ("shape", AttrValue::from(shape)),
            ("dtype", AttrValue::from(dtype.name())),
            ("subdtype", AttrValue::from(subdtype)),
            ("backend", AttrValue::from(self.backend().name())),
            ("TITLE", AttrValue::from(title)),
            ("CLASS", AttrValue::from(class.name())),
        ];
        for (key, value) in &attrs {
            self.engine.write_attr(path, key, value)?;
        }
        debug!("created {} {} {:?} {}", class, path, shape, dtype);
        Ok(())
    }
}

impl Drop for H5Backend {
    fn drop(&mut self) {
        if let Err(err) = self.close_file() {
            warn!("closing the storage file on drop failed: {}", err);
        }
    }
}
