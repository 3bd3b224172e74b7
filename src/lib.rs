//! I/O core for modular data acquisition.
//!
//! This library moves scientific data between processes and onto disk:
//!
//! - [`data`]: the data model (`NdArray`, `Axis`, `DataWithAxes`, `DataToExport`).
//! - [`tcpip`]: exact-length socket I/O and the type-tagged binary codec.
//! - [`h5`]: hierarchical storage engines and the structured saver layout.
//! - [`config`]: Figment-based configuration.
//! - [`logging`]: tracing subscriber setup.
//!
//! All fallible operations return [`error::AppResult`].

#[macro_use]
mod macros;

pub mod config;
pub mod data;
pub mod error;
pub mod h5;
pub mod logging;
pub mod tcpip;

pub use config::IoConfig;
pub use data::{Axis, DType, DataDim, DataToExport, DataWithAxes, DwaKind, NdArray, Scalar};
pub use error::{AppResult, ModaqError};
pub use h5::{BackendKind, FileMode, H5Backend, H5Saver, SaveType};
pub use tcpip::{DeSerializer, Serializer, Socket, SocketString, Value};
