//! `DataWithAxes`: same-shape numeric channels plus the axes describing them.

use super::array::NdArray;
use super::axis::Axis;
use super::dte::DataToExport;
use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DATA_RTOL: f64 = 1e-5;
const DATA_ATOL: f64 = 1e-8;

/// Seconds since the UNIX epoch with microsecond resolution.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

named_enum!(
    /// Dimensionality of the data, always derived from the array shape.
    #[derive(PartialOrd, Ord)]
    DataDim: Type {
        Data0D => "Data0D",
        Data1D => "Data1D",
        Data2D => "Data2D",
        DataND => "DataND",
    }
);

named_enum!(
    /// Whether data came straight from an instrument or was computed.
    DataSource: Type {
        Raw => "raw",
        Calculated => "calculated",
    }
);

named_enum!(
    /// Regular grid or irregular (spread) sampling.
    DataDistribution: Type {
        Uniform => "uniform",
        Spread => "spread",
    }
);

named_enum!(
    /// Flavour of a `DataWithAxes`; its name is the wire type tag.
    DwaKind: Type {
        DataWithAxes => "DataWithAxes",
        DataRaw => "DataRaw",
        DataActuator => "DataActuator",
        DataFromPlugins => "DataFromPlugins",
        DataCalculated => "DataCalculated",
        DataFromRoi => "DataFromRoi",
    }
);

impl DataDim {
    /// Dimensionality implied by one array shape.
    pub fn from_shape(shape: &[usize]) -> Self {
        let size: usize = shape.iter().product();
        match shape.len() {
            1 if size == 1 => DataDim::Data0D,
            1 => DataDim::Data1D,
            2 => DataDim::Data2D,
            _ => DataDim::DataND,
        }
    }

    pub fn dim_index(self) -> usize {
        self as usize
    }
}

impl DwaKind {
    /// Source implied by the flavour.
    pub fn default_source(self) -> DataSource {
        match self {
            DwaKind::DataCalculated | DwaKind::DataFromRoi => DataSource::Calculated,
            _ => DataSource::Raw,
        }
    }
}

/// Named bundle of same-shape arrays with axes and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataWithAxes {
    kind: DwaKind,
    name: String,
    timestamp: f64,
    source: DataSource,
    dim: DataDim,
    distribution: DataDistribution,
    data: Vec<NdArray>,
    labels: Vec<String>,
    origin: String,
    nav_indexes: Vec<usize>,
    axes: Vec<Axis>,
}

impl DataWithAxes {
    /// Build from a non-empty list of same-shape arrays.
    ///
    /// Rank-0 arrays are promoted to shape `[1]`. The source follows the flavour
    /// (`calculated` for `DataCalculated`/`DataFromRoi`, `raw` otherwise).
    pub fn new(kind: DwaKind, name: impl Into<String>, data: Vec<NdArray>) -> AppResult<Self> {
        let mut dwa = Self {
            kind,
            name: name.into(),
            timestamp: now_timestamp(),
            source: kind.default_source(),
            dim: DataDim::Data0D,
            distribution: DataDistribution::Uniform,
            data: Vec::new(),
            labels: Vec::new(),
            origin: String::new(),
            nav_indexes: Vec::new(),
            axes: Vec::new(),
        };
        dwa.set_data(data)?;
        Ok(dwa)
    }

    pub fn with_axes(mut self, axes: Vec<Axis>) -> AppResult<Self> {
        self.set_axes(axes)?;
        Ok(self)
    }

    pub fn with_nav_indexes(mut self, nav_indexes: Vec<usize>) -> AppResult<Self> {
        self.set_nav_indexes(nav_indexes)?;
        Ok(self)
    }

    /// Channel labels; missing ones are filled with `CH00`, `CH01`...
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.set_labels(labels);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_distribution(mut self, distribution: DataDistribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the channels, re-deriving dim and checking the axes still fit.
    pub fn set_data(&mut self, data: Vec<NdArray>) -> AppResult<()> {
        if data.is_empty() {
            return Err(ModaqError::Type(
                "data should be a non-empty list of arrays".to_string(),
            ));
        }
        let data: Vec<NdArray> = data.into_iter().map(NdArray::at_least_1d).collect();
        let shape = data[0].shape().to_vec();
        if let Some(bad) = data.iter().find(|array| array.shape() != shape.as_slice()) {
            return Err(ModaqError::Shape(format!(
                "all arrays must share shape {:?}, got {:?}",
                shape,
                bad.shape()
            )));
        }
        self.data = data;
        let labels = std::mem::take(&mut self.labels);
        self.set_labels(labels);
        let axes = std::mem::take(&mut self.axes);
        self.set_axes(axes)?;
        self.nav_indexes.retain(|index| *index < shape.len());
        self.update_dim();
        Ok(())
    }

    /// Replace the axes after checking each one against the data shape.
    ///
    /// A linear axis declared without a size takes the extent of its dimension. Any other
    /// size mismatch swaps the axis for a unit-step linear one, except for the navigation
    /// axes of spread data, which must match.
    pub fn set_axes(&mut self, axes: Vec<Axis>) -> AppResult<()> {
        let shape = self.shape().to_vec();
        let mut checked = Vec::with_capacity(axes.len());
        for mut axis in axes {
            let extent = *shape.get(axis.index()).ok_or_else(|| {
                ModaqError::Shape(format!(
                    "axis '{}' refers to dimension {} of a {}-dimensional array",
                    axis.label(),
                    axis.index(),
                    shape.len()
                ))
            })?;
            if axis.size() == 0 && axis.is_linear() {
                axis = Axis::linear(
                    axis.label(),
                    axis.units(),
                    axis.offset(),
                    axis.scaling(),
                    extent,
                )
                .with_index(axis.index())
                .with_spread_order(axis.spread_order());
            }
            if axis.size() != extent {
                let spread_nav = self.distribution == DataDistribution::Spread
                    && self.nav_indexes.contains(&axis.index());
                if spread_nav {
                    return Err(ModaqError::Shape(format!(
                        "navigation axis '{}' has {} samples but the spread dimension has {}",
                        axis.label(),
                        axis.size(),
                        extent
                    )));
                }
                warn!(
                    axis = axis.label(),
                    size = axis.size(),
                    extent,
                    "axis size does not match the data, replacing it with 0, 1, 2, ..."
                );
                axis = Axis::linear(axis.label(), axis.units(), 0.0, 1.0, extent)
                    .with_index(axis.index())
                    .with_spread_order(axis.spread_order());
            }
            checked.push(axis);
        }
        self.axes = checked;
        self.update_dim();
        Ok(())
    }

    pub fn set_nav_indexes(&mut self, nav_indexes: Vec<usize>) -> AppResult<()> {
        let ndim = self.shape().len();
        if let Some(bad) = nav_indexes.iter().find(|index| **index >= ndim) {
            return Err(ModaqError::Shape(format!(
                "navigation index {bad} out of range for {ndim}-dimensional data"
            )));
        }
        self.nav_indexes = nav_indexes;
        self.update_dim();
        Ok(())
    }

    pub fn set_labels(&mut self, mut labels: Vec<String>) {
        while labels.len() < self.data.len() {
            labels.push(format!("CH{:02}", labels.len()));
        }
        self.labels = labels;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = origin.into();
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    fn update_dim(&mut self) {
        let shape = self.shape();
        let mut dim = if self.axes.len() == shape.len() {
            match self.axes.len() {
                1 => DataDim::Data1D,
                2 => DataDim::Data2D,
                _ => DataDim::DataND,
            }
        } else {
            DataDim::from_shape(shape)
        };
        if !self.nav_indexes.is_empty() {
            dim = DataDim::DataND;
        }
        self.dim = dim;
    }

    pub fn kind(&self) -> DwaKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn dim(&self) -> DataDim {
        self.dim
    }

    pub fn distribution(&self) -> DataDistribution {
        self.distribution
    }

    pub fn data(&self) -> &[NdArray] {
        &self.data
    }

    pub fn get_data_index(&self, index: usize) -> Option<&NdArray> {
        self.data.get(index)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn nav_indexes(&self) -> &[usize] {
        &self.nav_indexes
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Shape shared by every channel.
    pub fn shape(&self) -> &[usize] {
        self.data.first().map_or(&[], |array| array.shape())
    }

    /// Number of elements per channel.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    /// Number of channels.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn n_axes(&self) -> usize {
        self.axes.len()
    }

    /// Dimensions not used for navigation.
    pub fn sig_indexes(&self) -> Vec<usize> {
        (0..self.shape().len())
            .filter(|index| !self.nav_indexes.contains(index))
            .collect()
    }

    pub fn nav_shape(&self) -> Vec<usize> {
        let shape = self.shape();
        self.nav_indexes.iter().map(|i| shape[*i]).collect()
    }

    pub fn sig_shape(&self) -> Vec<usize> {
        let shape = self.shape();
        self.sig_indexes().iter().map(|i| shape[*i]).collect()
    }

    /// `origin/name`.
    pub fn get_full_name(&self) -> String {
        format!("{}/{}", self.origin, self.name)
    }

    /// Axes attached to dimension `index`. When none is declared and `create` is set,
    /// a unit-step linear axis covering the dimension is returned instead.
    pub fn get_axis_from_index(&self, index: usize, create: bool) -> Vec<Axis> {
        let found: Vec<Axis> = self
            .axes
            .iter()
            .filter(|axis| axis.index() == index)
            .cloned()
            .collect();
        if found.is_empty() && create {
            if let Some(extent) = self.shape().get(index) {
                return vec![Axis::linear("", "", 0.0, 1.0, *extent).with_index(index)];
            }
        }
        found
    }

    /// Spread data only: the navigation axis with the given index and spread order.
    pub fn get_axis_from_index_spread(&self, index: usize, spread_order: usize) -> Option<&Axis> {
        self.axes
            .iter()
            .find(|axis| axis.index() == index && axis.spread_order() == spread_order)
    }

    pub fn get_axis_from_label(&self, label: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.label() == label)
    }

    pub fn get_nav_axes(&self) -> Vec<Axis> {
        self.nav_indexes
            .iter()
            .flat_map(|index| self.get_axis_from_index(*index, true))
            .collect()
    }

    pub fn get_signal_axes(&self) -> Vec<Axis> {
        self.sig_indexes()
            .into_iter()
            .flat_map(|index| self.get_axis_from_index(index, true))
            .filter(|axis| axis.size() > 1)
            .collect()
    }

    /// Wrap into a one-element `DataToExport`.
    pub fn as_dte(self, name: impl Into<String>) -> DataToExport {
        DataToExport::new(name, vec![self])
    }
}

impl PartialEq for DataWithAxes {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.dim == other.dim
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.dtype() == b.dtype() && a.allclose(b, DATA_RTOL, DATA_ATOL))
            && self.axes == other.axes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::array::DType;

    fn zeros(shape: &[usize]) -> NdArray {
        NdArray::zeros(DType::Float64, shape)
    }

    #[test]
    fn test_dim_from_shape() {
        let cases = [
            (vec![1], DataDim::Data0D),
            (vec![5], DataDim::Data1D),
            (vec![3, 4], DataDim::Data2D),
            (vec![2, 3, 4], DataDim::DataND),
        ];
        for (shape, dim) in cases {
            let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&shape)]).unwrap();
            assert_eq!(dwa.dim(), dim, "shape {shape:?}");
        }
    }

    #[test]
    fn test_default_labels_and_source() {
        let dwa = DataWithAxes::new(DwaKind::DataFromRoi, "roi", vec![zeros(&[3]), zeros(&[3])])
            .unwrap()
            .with_labels(vec!["first".to_string()]);
        assert_eq!(dwa.labels(), &["first".to_string(), "CH01".to_string()]);
        assert_eq!(dwa.source(), DataSource::Calculated);
        assert_eq!(dwa.length(), 2);
        assert_eq!(dwa.size(), 3);
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let err = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[3]), zeros(&[4])])
            .unwrap_err();
        assert!(matches!(err, ModaqError::Shape(_)));
        let err = DataWithAxes::new(DwaKind::DataRaw, "d", vec![]).unwrap_err();
        assert!(matches!(err, ModaqError::Type(_)));
    }

    #[test]
    fn test_axis_checks() {
        let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[3, 4])]).unwrap();
        assert!(dwa
            .clone()
            .with_axes(vec![Axis::new("z", "").with_index(2)])
            .is_err());

        let dwa = dwa
            .with_axes(vec![Axis::new("x", "m").with_index(1)])
            .unwrap();
        assert_eq!(dwa.axes()[0].size(), 4);
        assert_eq!(dwa.get_axis_from_index(0, true)[0].size(), 3);
        assert!(dwa.get_axis_from_index(0, false).is_empty());
    }

    #[test]
    fn test_mismatched_axis_is_replaced() {
        let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[3, 4])])
            .unwrap()
            .with_axes(vec![Axis::new("x", "mm")
                .with_data(vec![5.0, 6.5, 9.0])
                .with_index(1)
                .with_spread_order(2)])
            .unwrap();
        let axis = &dwa.axes()[0];
        assert_eq!(axis.label(), "x");
        assert_eq!(axis.units(), "mm");
        assert_eq!(axis.index(), 1);
        assert_eq!(axis.spread_order(), 2);
        assert_eq!(axis.get_data(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_spread_nav_axis_must_match() {
        let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[5, 2])])
            .unwrap()
            .with_distribution(DataDistribution::Spread)
            .with_nav_indexes(vec![0])
            .unwrap();
        let err = dwa
            .with_axes(vec![Axis::new("x", "").with_data(vec![0.0, 1.0, 4.0]).with_index(0)])
            .unwrap_err();
        assert!(matches!(err, ModaqError::Shape(_)));
    }

    #[test]
    fn test_nav_indexes() {
        let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[5, 10])])
            .unwrap()
            .with_nav_indexes(vec![0])
            .unwrap();
        assert_eq!(dwa.dim(), DataDim::DataND);
        assert_eq!(dwa.sig_indexes(), vec![1]);
        assert_eq!(dwa.nav_shape(), vec![5]);
        assert_eq!(dwa.sig_shape(), vec![10]);
        assert_eq!(dwa.get_nav_axes().len(), 1);
        assert_eq!(dwa.get_signal_axes()[0].size(), 10);
        assert!(dwa.with_nav_indexes(vec![2]).is_err());
    }

    #[test]
    fn test_enum_names_parse() {
        for kind in DwaKind::ALL {
            assert_eq!(kind.name().parse::<DwaKind>().unwrap(), *kind);
        }
        assert!("Axis".parse::<DwaKind>().is_err());
        assert_eq!("spread".parse::<DataDistribution>().unwrap(), DataDistribution::Spread);
        assert!(DataDim::Data0D < DataDim::DataND);
    }

    #[test]
    fn test_full_name() {
        let dwa = DataWithAxes::new(DwaKind::DataRaw, "d", vec![zeros(&[1])])
            .unwrap()
            .with_origin("det0");
        assert_eq!(dwa.get_full_name(), "det0/d");
    }
}
