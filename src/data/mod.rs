//! Scientific data model shared by the wire codec and the storage layer.
//!
//! - [`NdArray`]/[`Scalar`]: dtype-tagged numeric payloads.
//! - [`Axis`]: coordinates of one array dimension.
//! - [`DataWithAxes`]: same-shape channels with axes, provenance and dimensionality.
//! - [`DataToExport`]: ordered collection of `DataWithAxes`.
//!
//! These are plain value types. They are cloned, never shared, across serialization
//! boundaries.

pub mod array;
pub mod axis;
pub mod dte;
pub mod dwa;

pub use array::{DType, Element, NdArray, Scalar};
pub use axis::Axis;
pub use dte::DataToExport;
pub use dwa::{DataDim, DataDistribution, DataSource, DataWithAxes, DwaKind};
