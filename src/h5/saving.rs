//! Structured saver: the canonical group layout on top of [`H5Backend`].
//!
//! ```text
//! /                              TITLE, pymodaq_version, file, date, time
//! └── RawData                    type = <save type>
//!     ├── Logger                 VLARRAY of log lines (type = log)
//!     └── Scan000                type = scan, description, scan_done
//!         └── Detector000        type = detector, settings
//!             └── Data1D         type = data_dim
//!                 └── Ch000      type = ch
//!                     ├── Data
//!                     └── x_axis
//! ```

use super::attrs::{AttrValue, Metadata};
use super::backend::{capitalize, BackendKind, FileMode, GroupType, H5Backend};
use super::node::{EArray, Group, Node, VlArray};
use crate::config::StorageConfig;
use crate::data::{DType, DataDim, NdArray};
use crate::error::{AppResult, ModaqError};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_RAW_GROUP: &str = "RawData";
pub const DEFAULT_FILE_TITLE: &str = "PyMoDAQ file";
const RAW_GROUP_TITLE: &str = "Data from PyMoDAQ modules";
const LOGGER_NAME: &str = "Logger";

named_enum!(
    /// Kind of application that produced a file, stamped on the raw group.
    SaveType: Value {
        Scan => "scan",
        Detector => "detector",
        Logger => "logger",
        Custom => "custom",
        Actuator => "actuator",
    }
);

named_enum!(
    /// Role of an array node, stored in its `data_type` attribute.
    DataType: Value {
        Data => "data",
        Axis => "axis",
        LiveScan => "live_scan",
        ExternalH5 => "external_h5",
        Strings => "strings",
        Bkg => "bkg",
        DataEnlargeable => "data_enlargeable",
    }
);

impl DataType {
    /// Prefix of node names holding this kind of array.
    pub fn node_stem(self) -> &'static str {
        match self {
            DataType::Data => "Data",
            DataType::Axis => "Axis",
            DataType::LiveScan => "Live",
            DataType::ExternalH5 => "ExtData",
            DataType::Strings => "Strings",
            DataType::Bkg => "Bkg",
            DataType::DataEnlargeable => "EnlData",
        }
    }
}

/// Wrap several serialized settings trees into one `<All_settings>` document.
/// A single source is returned unchanged.
pub fn settings_envelope(sources: &[&str]) -> String {
    match sources {
        [] => String::new(),
        [single] => (*single).to_string(),
        many => format!("<All_settings>{}</All_settings>", many.concat()),
    }
}

/// How [`H5Saver::add_array`] creates its node.
#[derive(Debug, Clone)]
pub struct ArrayOptions {
    /// Values of a fixed array. When absent the array is zero-filled (`add_scan_dim`).
    pub data: Option<NdArray>,
    /// Shape of one row (enlargeable) or of one scan point (`add_scan_dim`).
    pub data_shape: Vec<usize>,
    /// Element type; defaults to the data's dtype, then float64.
    pub dtype: Option<DType>,
    pub data_dimension: DataDim,
    pub scan_shape: Vec<usize>,
    /// Prepend `scan_shape` to `data_shape` and zero-initialise.
    pub add_scan_dim: bool,
    pub enlargeable: bool,
    pub title: String,
    pub metadata: Metadata,
}

impl Default for ArrayOptions {
    fn default() -> Self {
        Self {
            data: None,
            data_shape: Vec::new(),
            dtype: None,
            data_dimension: DataDim::Data0D,
            scan_shape: Vec::new(),
            add_scan_dim: false,
            enlargeable: false,
            title: String::new(),
            metadata: Metadata::new(),
        }
    }
}

impl ArrayOptions {
    /// Fixed array holding `data`.
    pub fn fixed(data: NdArray) -> Self {
        Self {
            data_dimension: DataDim::from_shape(data.shape()),
            data_shape: data.shape().to_vec(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Enlargeable array of `dtype` rows shaped `data_shape`.
    pub fn enlargeable(dtype: DType, data_shape: &[usize]) -> Self {
        Self {
            dtype: Some(dtype),
            data_shape: data_shape.to_vec(),
            enlargeable: true,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_data_dimension(mut self, data_dimension: DataDim) -> Self {
        self.data_dimension = data_dimension;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Saver owning one open file and its raw-data layout.
#[derive(Debug)]
pub struct H5Saver {
    backend: H5Backend,
    save_type: SaveType,
    raw_group_name: String,
    file_title: String,
    raw_group: Option<Group>,
    logger_array: Option<VlArray>,
}

impl Deref for H5Saver {
    type Target = H5Backend;

    fn deref(&self) -> &H5Backend {
        &self.backend
    }
}

impl DerefMut for H5Saver {
    fn deref_mut(&mut self) -> &mut H5Backend {
        &mut self.backend
    }
}

impl H5Saver {
    pub fn new(kind: BackendKind, save_type: SaveType) -> AppResult<Self> {
        Ok(Self {
            backend: H5Backend::new(kind)?,
            save_type,
            raw_group_name: DEFAULT_RAW_GROUP.to_string(),
            file_title: DEFAULT_FILE_TITLE.to_string(),
            raw_group: None,
            logger_array: None,
        })
    }

    /// Saver set up from the `storage` configuration section.
    pub fn from_config(config: &StorageConfig) -> AppResult<Self> {
        let mut saver = Self::new(config.backend()?, config.save_type()?)?;
        saver.set_compression(config.compression()?)?;
        saver.raw_group_name = config.raw_group_name.clone();
        saver.file_title = config.file_title.clone();
        Ok(saver)
    }

    pub fn with_raw_group_name(mut self, name: impl Into<String>) -> Self {
        self.raw_group_name = name.into();
        self
    }

    pub fn with_file_title(mut self, title: impl Into<String>) -> Self {
        self.file_title = title.into();
        self
    }

    pub fn save_type(&self) -> SaveType {
        self.save_type
    }

    pub fn backend_mut(&mut self) -> &mut H5Backend {
        &mut self.backend
    }

    /// Group holding all acquisitions of the file, set by [`init_file`](Self::init_file).
    pub fn raw_group(&self) -> AppResult<&Group> {
        self.raw_group
            .as_ref()
            .ok_or_else(|| ModaqError::Value("init_file has not been called".to_string()))
    }

    pub fn logger_array(&self) -> Option<&VlArray> {
        self.logger_array.as_ref()
    }

    /// Open (or create) `file_name` with the raw group and logger in place.
    ///
    /// The file is always saved with an `.h5` extension next to `file_name`. A file
    /// that does not exist yet is created whatever `new_file` says. Returns whether a
    /// new file was created.
    pub fn init_file(&mut self, file_name: &Path, new_file: bool, metadata: &Metadata) -> AppResult<bool> {
        let now = chrono::Local::now();
        let stem = file_name
            .file_stem()
            .ok_or_else(|| ModaqError::Value(format!("{} has no file name", file_name.display())))?;
        let h5_name = format!("{}.h5", stem.to_string_lossy());
        let path: PathBuf = file_name.with_file_name(&h5_name);
        let new_file = new_file || !path.is_file();

        self.raw_group = None;
        self.logger_array = None;
        let mode = if new_file {
            FileMode::Write
        } else {
            FileMode::Append
        };
        let title = self.file_title.clone();
        let root = self.backend.open_file(&path, mode, &title)?;
        let raw_name = self.raw_group_name.clone();
        let raw = self.backend.get_set_group(&root, &raw_name, RAW_GROUP_TITLE)?;
        self.raw_group = Some(raw.clone());
        self.get_set_logger(None)?;

        if new_file {
            self.backend.set_attr(&raw, "type", self.save_type.name())?;
            self.backend.set_attr(&root, "file", h5_name.as_str())?;
            self.backend
                .set_attr(&root, "date", now.format("%Y-%m-%d").to_string())?;
            self.backend
                .set_attr(&root, "time", now.format("%H:%M:%S%.6f").to_string())?;
            self.backend.set_attrs(&raw, metadata)?;
        }
        info!(
            "{} storage file {}",
            if new_file { "created" } else { "reopened" },
            path.display()
        );
        Ok(new_file)
    }

    /// The `Logger` string array under `parent` (default the raw group), created if absent.
    pub fn get_set_logger(&mut self, parent: Option<&Group>) -> AppResult<VlArray> {
        let parent = match parent {
            Some(group) => group.clone(),
            None => self.raw_group()?.clone(),
        };
        let logger = if self.backend.children_name(&parent)?.iter().any(|n| n == LOGGER_NAME) {
            self.backend.get_vlarray(self.backend.get_node_from(&parent, LOGGER_NAME)?)?
        } else {
            let logger = self.add_string_array(&parent, LOGGER_NAME, "", &Metadata::new())?;
            self.backend.set_attr(&logger, "type", "log")?;
            logger
        };
        self.logger_array = Some(logger.clone());
        Ok(logger)
    }

    /// Append one line to the logger array.
    pub fn add_log(&mut self, msg: &str) -> AppResult<()> {
        let logger = self
            .logger_array
            .clone()
            .ok_or_else(|| ModaqError::Value("no logger array, call init_file first".to_string()))?;
        self.backend.append_string(&logger, msg)
    }

    pub fn add_string_array(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        title: &str,
        metadata: &Metadata,
    ) -> AppResult<VlArray> {
        let array = self.backend.create_string_array(parent, name, title)?;
        self.backend.set_attr(&array, "data_type", DataType::Strings.name())?;
        self.backend.set_attrs(&array, metadata)?;
        Ok(array)
    }

    /// Save an array node with the attributes readers rely on.
    ///
    /// Fixed arrays need either `data` or `add_scan_dim`; an empty title falls back
    /// to the node name.
    pub fn add_array(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        data_type: DataType,
        options: ArrayOptions,
    ) -> AppResult<Node> {
        let name = capitalize(name);
        let dtype = options
            .dtype
            .or_else(|| options.data.as_ref().map(NdArray::dtype))
            .unwrap_or(DType::Float64);
        let title = if options.title.is_empty() {
            name.clone()
        } else {
            options.title.clone()
        };

        let node: Node = if options.enlargeable {
            self.backend
                .create_earray(parent, &name, dtype, &options.data_shape, &title)?
                .into()
        } else {
            let data = match options.data {
                Some(data) => data,
                None if options.add_scan_dim => {
                    let mut shape = options.scan_shape.clone();
                    if options.data_shape != [1] {
                        shape.extend_from_slice(&options.data_shape);
                    }
                    NdArray::zeros(dtype, &shape)
                }
                None => {
                    return Err(ModaqError::Value(format!(
                        "the fixed array '{name}' needs data or add_scan_dim"
                    )))
                }
            };
            self.backend
                .create_carray(parent, &name, &data, &title)?
                .into()
        };
        self.backend.set_attr(&node, "data_type", data_type.name())?;
        self.backend
            .set_attr(&node, "data_dimension", options.data_dimension.name())?;
        self.backend.set_attrs(&node, &options.metadata)?;
        Ok(node)
    }

    /// Enlargeable array handle from a node created by [`add_array`](Self::add_array).
    pub fn add_enlargeable_array(
        &mut self,
        parent: impl AsRef<str>,
        name: &str,
        data_type: DataType,
        options: ArrayOptions,
    ) -> AppResult<EArray> {
        let options = ArrayOptions {
            enlargeable: true,
            ..options
        };
        EArray::try_from(self.add_array(parent, name, data_type, options)?)
    }

    /// Child groups of `parent` whose `type` is `group_type`, by name.
    pub fn get_groups(&self, parent: impl AsRef<str>, group_type: GroupType) -> AppResult<Vec<Group>> {
        let mut groups = Vec::new();
        for node in self.backend.get_children(parent)?.into_values() {
            if node.is_group()
                && self
                    .backend
                    .get_attr_opt(&node, "type")?
                    .is_some_and(|t| t == group_type.name())
            {
                groups.push(Group::try_from(node)?);
            }
        }
        Ok(groups)
    }

    pub fn get_last_group(&self, parent: impl AsRef<str>, group_type: GroupType) -> AppResult<Option<Group>> {
        Ok(self.get_groups(parent, group_type)?.pop())
    }

    /// First node below `start` (included) whose attribute `key` equals `value`.
    pub fn get_node_from_attribute_match(
        &self,
        start: impl AsRef<str>,
        key: &str,
        value: &AttrValue,
    ) -> AppResult<Option<Node>> {
        for node in self.backend.walk_nodes(start)? {
            if self.backend.get_attr_opt(&node, key)?.as_ref() == Some(value) {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    pub fn get_node_from_title(&self, start: impl AsRef<str>, title: &str) -> AppResult<Option<Node>> {
        self.get_node_from_attribute_match(start, "TITLE", &AttrValue::from(title))
    }

    /// `Data0D`/`Data1D`/... group, got-or-created.
    pub fn add_data_group(
        &mut self,
        parent: impl AsRef<str>,
        data_dim: DataDim,
        title: &str,
        settings: &str,
        metadata: &Metadata,
    ) -> AppResult<Group> {
        let mut metadata = metadata.clone();
        metadata.insert("settings".to_string(), AttrValue::from(settings));
        self.backend
            .add_group(data_dim.name(), GroupType::DataDim, parent, title, &metadata)
    }

    /// New `<Type>NNN` group, one past the highest index already present.
    pub fn add_incremental_group(
        &mut self,
        group_type: GroupType,
        parent: impl AsRef<str>,
        title: &str,
        settings: &str,
        metadata: &Metadata,
    ) -> AppResult<Group> {
        let parent = parent.as_ref();
        let stem = capitalize(group_type.name());
        let next = self
            .backend
            .children_name(parent)?
            .iter()
            .filter_map(|name| name.strip_prefix(stem.as_str()))
            .filter(|suffix| suffix.len() == 3)
            .filter_map(|suffix| suffix.parse::<usize>().ok())
            .max()
            .map_or(0, |last| last + 1);
        let name = format!("{stem}{next:03}");
        let group = self.backend.get_set_group(parent, &name, title)?;
        self.backend.set_attr(&group, "settings", settings)?;
        self.backend.set_attr(&group, "type", group_type.name())?;
        self.backend.set_attrs(&group, metadata)?;
        debug!("added incremental group {}", group.path());
        Ok(group)
    }

    pub fn add_act_group(&mut self, parent: impl AsRef<str>, title: &str, settings: &str, metadata: &Metadata) -> AppResult<Group> {
        self.add_incremental_group(GroupType::Actuator, parent, title, settings, metadata)
    }

    pub fn add_det_group(&mut self, parent: impl AsRef<str>, title: &str, settings: &str, metadata: &Metadata) -> AppResult<Group> {
        self.add_incremental_group(GroupType::Detector, parent, title, settings, metadata)
    }

    pub fn add_move_group(&mut self, parent: impl AsRef<str>, title: &str, settings: &str, metadata: &Metadata) -> AppResult<Group> {
        self.add_incremental_group(GroupType::Actuator, parent, title, settings, metadata)
    }

    pub fn add_ch_group(&mut self, parent: impl AsRef<str>, title: &str, settings: &str, metadata: &Metadata) -> AppResult<Group> {
        self.add_incremental_group(GroupType::Ch, parent, title, settings, metadata)
    }

    /// New `ScanNNN` group (under the raw group by default) flagged
    /// `scan_done = false` with an empty description.
    pub fn add_scan_group(
        &mut self,
        parent: Option<&Group>,
        title: &str,
        settings: &str,
        metadata: &Metadata,
    ) -> AppResult<Group> {
        let parent = match parent {
            Some(group) => group.clone(),
            None => self.raw_group()?.clone(),
        };
        let mut metadata = metadata.clone();
        metadata.insert("description".to_string(), AttrValue::from(""));
        metadata.insert("scan_done".to_string(), AttrValue::from(false));
        let group = self.add_incremental_group(GroupType::Scan, &parent, title, settings, &metadata)?;
        info!("new scan group {}", group.path());
        Ok(group)
    }

    pub fn get_scan_groups(&self) -> AppResult<Vec<Group>> {
        self.get_groups(self.raw_group()?, GroupType::Scan)
    }

    pub fn get_last_scan(&self) -> AppResult<Option<Group>> {
        self.get_last_group(self.raw_group()?, GroupType::Scan)
    }

    /// Index of the last `ScanNNN` group, 0 when there is none.
    pub fn get_scan_index(&self) -> AppResult<usize> {
        match self.get_last_scan()? {
            Some(scan) => scan
                .name()
                .get(4..)
                .and_then(|index| index.parse().ok())
                .ok_or_else(|| {
                    ModaqError::Value(format!("{} is not a ScanNNN group", scan.path()))
                }),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn saver_in(dir: &Path) -> H5Saver {
        let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Scan).unwrap();
        saver
            .init_file(&dir.join("session.h5"), true, &Metadata::new())
            .unwrap();
        saver
    }

    #[test]
    fn test_init_file_layout() {
        let dir = tempdir().unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("sample".to_string(), AttrValue::from("GaAs"));
        let mut saver = H5Saver::new(BackendKind::Tree, SaveType::Detector).unwrap();
        let created = saver
            .init_file(&dir.path().join("session.dat"), false, &metadata)
            .unwrap();
        assert!(created);
        assert_eq!(saver.filename().unwrap(), dir.path().join("session.h5"));

        let raw = saver.raw_group().unwrap().clone();
        assert_eq!(raw.path(), "/RawData");
        assert_eq!(saver.get_attr(&raw, "type").unwrap(), "detector");
        assert_eq!(saver.get_attr(&raw, "sample").unwrap(), "GaAs");
        assert_eq!(saver.get_attr(&raw, "TITLE").unwrap(), "Data from PyMoDAQ modules");
        assert_eq!(saver.get_attr("/", "file").unwrap(), "session.h5");
        assert_eq!(saver.get_attr("/", "TITLE").unwrap(), "PyMoDAQ file");
        assert!(saver.has_attr("/", "time").unwrap());

        let logger = saver.logger_array().unwrap().clone();
        assert_eq!(saver.get_attr(&logger, "type").unwrap(), "log");
        assert_eq!(saver.get_attr(&logger, "data_type").unwrap(), "strings");
        saver.add_log("acquisition started").unwrap();
        assert_eq!(
            saver.read_strings(&logger).unwrap(),
            vec!["acquisition started".to_string()]
        );
    }

    #[test]
    fn test_incremental_groups() {
        let dir = tempdir().unwrap();
        let mut saver = saver_in(dir.path());
        let scan = saver.add_scan_group(None, "", "<settings/>", &Metadata::new()).unwrap();
        assert_eq!(scan.name(), "Scan000");
        assert_eq!(saver.get_attr(&scan, "scan_done").unwrap(), AttrValue::Bool(false));
        assert_eq!(saver.get_attr(&scan, "description").unwrap(), "");
        assert_eq!(saver.get_attr(&scan, "settings").unwrap(), "<settings/>");

        let det0 = saver.add_det_group(&scan, "camera", "", &Metadata::new()).unwrap();
        let det1 = saver.add_det_group(&scan, "diode", "", &Metadata::new()).unwrap();
        let act = saver.add_act_group(&scan, "stage", "", &Metadata::new()).unwrap();
        assert_eq!(det0.name(), "Detector000");
        assert_eq!(det1.name(), "Detector001");
        assert_eq!(act.name(), "Actuator000");
        assert_eq!(
            saver.get_groups(&scan, GroupType::Detector).unwrap(),
            vec![det0, det1.clone()]
        );
        assert_eq!(
            saver.get_last_group(&scan, GroupType::Detector).unwrap(),
            Some(det1.clone())
        );
        assert_eq!(
            saver.get_node_from_title(&scan, "diode").unwrap(),
            Some(det1.clone().into_node())
        );

        let data = saver
            .add_data_group(&det1, DataDim::Data1D, "", "", &Metadata::new())
            .unwrap();
        assert_eq!(data.name(), "Data1D");
        assert_eq!(saver.get_attr(&data, "type").unwrap(), "data_dim");
        let ch = saver.add_ch_group(&data, "CH00", "", &Metadata::new()).unwrap();
        assert_eq!(ch.name(), "Ch000");
        assert_eq!(saver.get_attr(&ch, "type").unwrap(), "ch");
    }

    #[test]
    fn test_add_array_variants() {
        let dir = tempdir().unwrap();
        let mut saver = saver_in(dir.path());
        let raw = saver.raw_group().unwrap().clone();

        let fixed = saver
            .add_array(&raw, "data", DataType::Data, ArrayOptions::fixed(NdArray::linspace(0.0, 1.0, 5)))
            .unwrap();
        assert_eq!(fixed.name(), "Data");
        assert_eq!(saver.get_attr(&fixed, "data_type").unwrap(), "data");
        assert_eq!(saver.get_attr(&fixed, "data_dimension").unwrap(), "Data1D");
        assert_eq!(saver.get_attr(&fixed, "TITLE").unwrap(), "Data");

        let zeros = saver
            .add_array(
                &raw,
                "scan_data",
                DataType::Data,
                ArrayOptions {
                    data_shape: vec![4],
                    scan_shape: vec![3, 2],
                    add_scan_dim: true,
                    ..ArrayOptions::default()
                },
            )
            .unwrap();
        assert_eq!(saver.read_array(&zeros).unwrap().shape(), &[3, 2, 4]);

        let enlargeable = saver
            .add_enlargeable_array(&raw, "live", DataType::DataEnlargeable, ArrayOptions::enlargeable(DType::Int16, &[2]))
            .unwrap();
        assert_eq!(saver.get_attr(&enlargeable, "CLASS").unwrap(), "EARRAY");

        assert!(matches!(
            saver.add_array(&raw, "empty", DataType::Data, ArrayOptions::default()),
            Err(ModaqError::Value(_))
        ));
    }

    #[test]
    fn test_settings_envelope() {
        assert_eq!(settings_envelope(&["<a/>"]), "<a/>");
        assert_eq!(
            settings_envelope(&["<a/>", "<b/>"]),
            "<All_settings><a/><b/></All_settings>"
        );
        assert_eq!(DataType::DataEnlargeable.node_stem(), "EnlData");
        assert!("movie".parse::<SaveType>().is_err());
    }
}
