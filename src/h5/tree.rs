//! Pure-Rust storage engine.
//!
//! The whole node tree lives in memory and is written to disk as a magic header,
//! a format version and a `bincode` body on `flush` and `close`. Compression
//! settings are recorded per array but payloads are stored raw.

use super::attrs::{AttrValue, StoredAttr};
use super::backend::{
    ArrayOps, AttrOps, BackendKind, Compression, FileBackend, FileMode, GroupOps, StorageEngine,
};
use super::node::{node_name, parent_path, ROOT_PATH};
use crate::data::{DType, NdArray};
use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 8] = b"MODAQTRE";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeNode {
    attrs: BTreeMap<String, StoredAttr>,
    body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Body {
    Group(BTreeMap<String, TreeNode>),
    Array {
        array: NdArray,
        extendable: bool,
        compression: Compression,
    },
    VlArray {
        dtype: DType,
        rows: Vec<NdArray>,
        compression: Compression,
    },
}

impl TreeNode {
    fn group() -> Self {
        Self {
            attrs: BTreeMap::new(),
            body: Body::Group(BTreeMap::new()),
        }
    }

    fn with_body(body: Body) -> Self {
        Self {
            attrs: BTreeMap::new(),
            body,
        }
    }
}

#[derive(Debug)]
pub struct TreeEngine {
    root: TreeNode,
    path: Option<PathBuf>,
    mode: Option<FileMode>,
}

impl Default for TreeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeEngine {
    pub fn new() -> Self {
        Self {
            root: TreeNode::group(),
            path: None,
            mode: None,
        }
    }

    fn load(path: &Path) -> AppResult<TreeNode> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ModaqError::Value(format!(
                "{} is not a tree storage file",
                path.display()
            )));
        }
        let version: u32 = bincode::deserialize_from(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(ModaqError::Value(format!(
                "unsupported tree format version {version} in {}",
                path.display()
            )));
        }
        Ok(bincode::deserialize_from(&mut reader)?)
    }

    fn save(&self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        bincode::serialize_into(&mut writer, &FORMAT_VERSION)?;
        bincode::serialize_into(&mut writer, &self.root)?;
        writer.flush()?;
        debug!("tree written to {}", path.display());
        Ok(())
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.mode.is_none() {
            return Err(ModaqError::Value("no file is open".to_string()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> AppResult<()> {
        match self.mode {
            None => Err(ModaqError::Value("no file is open".to_string())),
            Some(FileMode::Read) => Err(ModaqError::Value(
                "the file is opened read only".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    fn node(&self, path: &str) -> AppResult<&TreeNode> {
        self.ensure_open()?;
        let mut node = &self.root;
        for part in components(path) {
            node = match &node.body {
                Body::Group(children) => children.get(part),
                _ => None,
            }
            .ok_or_else(|| ModaqError::Node(format!("no node at {path}")))?;
        }
        Ok(node)
    }

    fn node_mut(&mut self, path: &str) -> AppResult<&mut TreeNode> {
        self.ensure_writable()?;
        let mut node = &mut self.root;
        for part in components(path) {
            node = match &mut node.body {
                Body::Group(children) => children.get_mut(part),
                _ => None,
            }
            .ok_or_else(|| ModaqError::Node(format!("no node at {path}")))?;
        }
        Ok(node)
    }

    /// Insert a new child at `path` into its existing parent group.
    fn insert(&mut self, path: &str, child: TreeNode) -> AppResult<()> {
        let parent = parent_path(path)
            .ok_or_else(|| ModaqError::Node("the root node already exists".to_string()))?;
        let name = node_name(path).to_string();
        match &mut self.node_mut(&parent)?.body {
            Body::Group(children) => {
                if children.contains_key(&name) {
                    return Err(ModaqError::Node(format!("{path} already exists")));
                }
                children.insert(name, child);
                Ok(())
            }
            _ => Err(ModaqError::Node(format!("{parent} is not a group"))),
        }
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

impl FileBackend for TreeEngine {
    fn open(&mut self, path: &Path, mode: FileMode) -> AppResult<()> {
        self.root = match mode {
            FileMode::Read if !path.is_file() => {
                return Err(ModaqError::Value(format!(
                    "cannot open {} for reading: no such file",
                    path.display()
                )))
            }
            FileMode::Read => Self::load(path)?,
            FileMode::Append if path.is_file() => Self::load(path)?,
            FileMode::Append | FileMode::Write => TreeNode::group(),
        };
        self.path = Some(path.to_path_buf());
        self.mode = Some(mode);
        if mode != FileMode::Read {
            self.save()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> AppResult<()> {
        match self.mode {
            Some(FileMode::Write) | Some(FileMode::Append) => self.save(),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> AppResult<()> {
        self.flush()?;
        self.root = TreeNode::group();
        self.path = None;
        self.mode = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl AttrOps for TreeEngine {
    fn read_attr(&self, path: &str, key: &str) -> AppResult<Option<AttrValue>> {
        Ok(self.node(path)?.attrs.get(key).map(AttrValue::from))
    }

    fn write_attr(&mut self, path: &str, key: &str, value: &AttrValue) -> AppResult<()> {
        self.node_mut(path)?
            .attrs
            .insert(key.to_string(), StoredAttr::from(value));
        Ok(())
    }

    fn attr_names(&self, path: &str) -> AppResult<Vec<String>> {
        Ok(self.node(path)?.attrs.keys().cloned().collect())
    }
}

impl GroupOps for TreeEngine {
    fn create_group(&mut self, path: &str) -> AppResult<()> {
        self.insert(path, TreeNode::group())
    }

    fn exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    fn is_group(&self, path: &str) -> AppResult<bool> {
        Ok(matches!(self.node(path)?.body, Body::Group(_)))
    }

    fn child_names(&self, path: &str) -> AppResult<Vec<String>> {
        match &self.node(path)?.body {
            Body::Group(children) => Ok(children.keys().cloned().collect()),
            _ => Err(ModaqError::Node(format!("{path} is not a group"))),
        }
    }

    fn remove(&mut self, path: &str) -> AppResult<()> {
        let parent = parent_path(path)
            .ok_or_else(|| ModaqError::Node("the root node cannot be removed".to_string()))?;
        let name = node_name(path);
        match &mut self.node_mut(&parent)?.body {
            Body::Group(children) => children
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ModaqError::Node(format!("no node at {path}"))),
            _ => Err(ModaqError::Node(format!("{parent} is not a group"))),
        }
    }
}

impl ArrayOps for TreeEngine {
    fn create_array(
        &mut self,
        path: &str,
        data: &NdArray,
        compression: &Compression,
    ) -> AppResult<()> {
        self.insert(
            path,
            TreeNode::with_body(Body::Array {
                array: data.clone(),
                extendable: false,
                compression: *compression,
            }),
        )
    }

    fn create_extendable(
        &mut self,
        path: &str,
        dtype: DType,
        row_shape: &[usize],
        compression: &Compression,
    ) -> AppResult<()> {
        let mut shape = vec![0];
        shape.extend_from_slice(row_shape);
        self.insert(
            path,
            TreeNode::with_body(Body::Array {
                array: NdArray::zeros(dtype, &shape),
                extendable: true,
                compression: *compression,
            }),
        )
    }

    fn append_rows(&mut self, path: &str, rows: &NdArray) -> AppResult<usize> {
        match &mut self.node_mut(path)?.body {
            Body::Array {
                array,
                extendable: true,
                ..
            } => {
                *array = array.concat_rows(rows)?;
                Ok(array.shape()[0])
            }
            _ => Err(ModaqError::Node(format!("{path} is not an enlargeable array"))),
        }
    }

    fn create_vlarray(
        &mut self,
        path: &str,
        dtype: DType,
        compression: &Compression,
    ) -> AppResult<()> {
        self.insert(
            path,
            TreeNode::with_body(Body::VlArray {
                dtype,
                rows: Vec::new(),
                compression: *compression,
            }),
        )
    }

    fn append_vlrow(&mut self, path: &str, row: &NdArray) -> AppResult<usize> {
        match &mut self.node_mut(path)?.body {
            Body::VlArray { rows, .. } => {
                rows.push(row.clone());
                Ok(rows.len())
            }
            _ => Err(ModaqError::Node(format!("{path} is not a VLARRAY"))),
        }
    }

    fn read_array(&self, path: &str) -> AppResult<NdArray> {
        match &self.node(path)?.body {
            Body::Array { array, .. } => Ok(array.clone()),
            _ => Err(ModaqError::Node(format!("{path} is not a fixed-row array"))),
        }
    }

    fn read_vlrows(&self, path: &str) -> AppResult<Vec<NdArray>> {
        match &self.node(path)?.body {
            Body::VlArray { rows, .. } => Ok(rows.clone()),
            _ => Err(ModaqError::Node(format!("{path} is not a VLARRAY"))),
        }
    }

    fn array_shape(&self, path: &str) -> AppResult<Vec<usize>> {
        match &self.node(path)?.body {
            Body::Array { array, .. } => Ok(array.shape().to_vec()),
            Body::VlArray { rows, .. } => Ok(vec![rows.len()]),
            Body::Group(_) => Err(ModaqError::Node(format!("{path} is a group"))),
        }
    }

    fn array_dtype(&self, path: &str) -> AppResult<DType> {
        match &self.node(path)?.body {
            Body::Array { array, .. } => Ok(array.dtype()),
            Body::VlArray { dtype, .. } => Ok(*dtype),
            Body::Group(_) => Err(ModaqError::Node(format!("{path} is a group"))),
        }
    }
}

impl StorageEngine for TreeEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Tree
    }
}

impl Drop for TreeEngine {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("flushing the tree storage file on drop failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.h5");
        let mut engine = TreeEngine::new();
        engine.open(&path, FileMode::Write).unwrap();
        engine.create_group("/RawData").unwrap();
        engine
            .write_attr("/RawData", "TITLE", &AttrValue::from("raw"))
            .unwrap();
        engine
            .create_extendable("/RawData/Time", DType::Float64, &[], &Compression::default())
            .unwrap();
        engine
            .append_rows("/RawData/Time", &NdArray::from_vec(vec![0.0f64, 0.5]))
            .unwrap();
        engine.close().unwrap();
        assert!(!engine.is_open());

        let mut engine = TreeEngine::new();
        engine.open(&path, FileMode::Read).unwrap();
        assert_eq!(
            engine.read_attr("/RawData", "TITLE").unwrap(),
            Some(AttrValue::from("raw"))
        );
        assert_eq!(engine.array_shape("/RawData/Time").unwrap(), vec![2]);
        assert_eq!(engine.child_names("/").unwrap(), vec!["RawData".to_string()]);
        assert!(matches!(
            engine.create_group("/Other"),
            Err(ModaqError::Value(_))
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let mut engine = TreeEngine::new();
        assert!(matches!(
            engine.open(&dir.path().join("missing.h5"), FileMode::Read),
            Err(ModaqError::Value(_))
        ));
        assert!(!engine.is_open());
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.h5");
        std::fs::write(&path, b"\x89HDF\r\n\x1a\n and more").unwrap();
        let mut engine = TreeEngine::new();
        assert!(matches!(
            engine.open(&path, FileMode::Append),
            Err(ModaqError::Value(_))
        ));
    }

    #[test]
    fn test_duplicate_and_missing_parents() {
        let dir = tempdir().unwrap();
        let mut engine = TreeEngine::new();
        engine.open(&dir.path().join("t.h5"), FileMode::Write).unwrap();
        engine.create_group("/A").unwrap();
        assert!(matches!(engine.create_group("/A"), Err(ModaqError::Node(_))));
        assert!(matches!(engine.create_group("/B/C"), Err(ModaqError::Node(_))));
        engine.remove("/A").unwrap();
        assert!(!engine.exists("/A"));
        assert!(engine.exists(ROOT_PATH));
    }
}
