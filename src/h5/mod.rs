//! Hierarchical storage: a path-addressed node tree of groups, arrays and attributes.
//!
//! - [`backend`]: engine traits and the [`H5Backend`] facade enforcing the file
//!   conventions (`CLASS`/`TITLE`, array `shape`/`dtype`/`subdtype`, `EXTDIM`).
//! - [`tree`]: pure-Rust engine persisting the tree with `bincode`.
//! - `hdf5`: HDF5 engine, behind the `storage_hdf5` feature.
//! - [`saving`]: the `RawData`/`ScanNNN`/`DetectorNNN`/`ChNNN` layout.
//! - [`data_saving`]: `Axis` and `DataWithAxes` nodes.
//! - [`logger`]: enlargeable lock-step logging and the tracing log layer.

pub mod attrs;
pub mod backend;
pub mod data_saving;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod logger;
pub mod node;
pub mod saving;
pub mod tree;

pub use attrs::{AttrValue, Metadata};
pub use backend::{
    open_backend, BackendKind, Compression, CompressionLibrary, FileMode, GroupType, H5Backend,
    StorageEngine,
};
pub use data_saving::{AxisSaver, DataSaver};
pub use logger::{ChannelKey, DataLogger, H5LogLayer};
pub use node::{CArray, EArray, Group, Node, NodeClass, VlArray};
pub use saving::{settings_envelope, ArrayOptions, DataType, H5Saver, SaveType};
pub use tree::TreeEngine;
