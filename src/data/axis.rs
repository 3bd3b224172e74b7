//! Labelled coordinate vectors attached to one dimension of a data block.

use super::array::NdArray;
use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};

const LINEAR_RTOL: f64 = 1e-5;
const LINEAR_ATOL: f64 = 1e-8;

/// Coordinates of one array dimension.
///
/// A linear axis is stored as `offset + scaling * i` for `i` in `0..size`; any other axis
/// keeps its explicit samples. Explicit samples that turn out to be linear are collapsed
/// into the compact form on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    label: String,
    units: String,
    data: Option<Vec<f64>>,
    offset: f64,
    scaling: f64,
    size: usize,
    index: usize,
    spread_order: usize,
}

impl Default for Axis {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl Axis {
    /// Empty linear axis (offset 0, scaling 1, size 0) for dimension 0.
    pub fn new(label: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            units: units.into(),
            data: None,
            offset: 0.0,
            scaling: 1.0,
            size: 0,
            index: 0,
            spread_order: 0,
        }
    }

    /// Linear axis described by its offset, step and number of samples.
    pub fn linear(
        label: impl Into<String>,
        units: impl Into<String>,
        offset: f64,
        scaling: f64,
        size: usize,
    ) -> Self {
        Self {
            offset,
            scaling,
            size,
            ..Self::new(label, units)
        }
    }

    /// Replace the coordinates with explicit samples.
    pub fn with_data(mut self, data: Vec<f64>) -> Self {
        self.set_data(data);
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_spread_order(mut self, spread_order: usize) -> Self {
        self.spread_order = spread_order;
        self
    }

    /// Build from a decoded array; the payload must be 1D (rank-0 is promoted).
    pub fn from_array(
        label: impl Into<String>,
        units: impl Into<String>,
        values: &NdArray,
    ) -> AppResult<Self> {
        if values.ndim() > 1 {
            return Err(ModaqError::Shape(format!(
                "axis data must be one dimensional, got shape {:?}",
                values.shape()
            )));
        }
        Ok(Self::new(label, units).with_data(values.to_f64_vec()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn set_units(&mut self, units: impl Into<String>) {
        self.units = units.into();
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn spread_order(&self) -> usize {
        self.spread_order
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Explicit samples, `None` when the axis is stored as offset/scaling.
    pub fn data(&self) -> Option<&[f64]> {
        self.data.as_deref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_linear(&self) -> bool {
        self.data.is_none()
    }

    /// Store explicit samples, collapsing them when they are evenly spaced.
    pub fn set_data(&mut self, data: Vec<f64>) {
        self.size = data.len();
        self.data = Some(data);
        self.get_scale_offset_from_data();
    }

    /// Collapse explicit samples into offset/scaling if they are linear.
    pub fn get_scale_offset_from_data(&mut self) {
        let Some(data) = self.data.as_deref() else {
            return;
        };
        if !is_linear(data) {
            return;
        }
        self.scaling = if data.len() == 1 {
            1.0
        } else {
            mean(&diff(data))
        };
        self.offset = data[0];
        self.data = None;
    }

    /// Coordinates of every sample, generated from offset/scaling when linear.
    pub fn get_data(&self) -> Vec<f64> {
        match &self.data {
            Some(data) => data.clone(),
            None => linear_data(self.offset, self.scaling, self.size),
        }
    }

    /// Coordinates as a float64 array (used by the wire codec and the savers).
    pub fn to_array(&self) -> NdArray {
        NdArray::from_vec(self.get_data())
    }

    /// Turn the compact form into `nsteps` explicit samples.
    pub fn create_linear_data(&mut self, nsteps: usize) {
        self.data = Some(linear_data(self.offset, self.scaling, nsteps));
        self.size = nsteps;
    }

    pub fn mean(&self) -> f64 {
        mean(&self.get_data())
    }

    pub fn min(&self) -> f64 {
        self.get_data().into_iter().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.get_data().into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Index of the sample closest to `threshold`, clamped to the axis range.
    pub fn find_index(&self, threshold: f64) -> usize {
        if self.size == 0 {
            return 0;
        }
        if threshold <= self.min() {
            return self.argmin();
        }
        if threshold >= self.max() {
            return self.argmax();
        }
        self.get_data()
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - threshold).abs().total_cmp(&(*b - threshold).abs()))
            .map_or(0, |(i, _)| i)
    }

    pub fn find_indexes(&self, thresholds: &[f64]) -> Vec<usize> {
        thresholds.iter().map(|t| self.find_index(*t)).collect()
    }

    fn argmin(&self) -> usize {
        self.get_data()
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(i, _)| i)
    }

    fn argmax(&self) -> usize {
        self.get_data()
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(i, _)| i)
    }
}

impl PartialEq for Axis {
    fn eq(&self, other: &Self) -> bool {
        if self.label != other.label || self.units != other.units || self.index != other.index {
            return false;
        }
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| (x - y).abs() <= LINEAR_ATOL + LINEAR_RTOL * y.abs())
            }
            _ => self.offset == other.offset && self.scaling == other.scaling,
        }
    }
}

fn linear_data(offset: f64, scaling: f64, size: usize) -> Vec<f64> {
    (0..size).map(|i| offset + scaling * i as f64).collect()
}

fn diff(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn is_linear(data: &[f64]) -> bool {
    if data.is_empty() {
        return false;
    }
    let steps = diff(data);
    let step = mean(&steps);
    steps
        .iter()
        .all(|s| (s - step).abs() <= LINEAR_ATOL + LINEAR_RTOL * step.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_data_collapses() {
        let axis = Axis::new("x", "m").with_data(vec![0.0, 1.0, 2.0, 3.0]);
        assert!(axis.is_linear());
        assert_eq!(axis.offset(), 0.0);
        assert_eq!(axis.scaling(), 1.0);
        assert_eq!(axis.size(), 4);
        assert_eq!(axis.get_data(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_single_sample_axis() {
        let axis = Axis::new("x", "").with_data(vec![5.0]);
        assert!(axis.is_linear());
        assert_eq!(axis.scaling(), 1.0);
        assert_eq!(axis.offset(), 5.0);
    }

    #[test]
    fn test_irregular_data_kept() {
        let axis = Axis::new("t", "s").with_data(vec![0.0, 1.0, 4.0, 9.0]);
        assert!(!axis.is_linear());
        assert_eq!(axis.data(), Some(&[0.0, 1.0, 4.0, 9.0][..]));
        assert_eq!(axis.min(), 0.0);
        assert_eq!(axis.max(), 9.0);
        assert_eq!(axis.find_index(3.9), 2);
        assert_eq!(axis.find_index(-10.0), 0);
        assert_eq!(axis.find_index(100.0), 3);
    }

    #[test]
    fn test_find_index_linear() {
        let axis = Axis::linear("x", "mm", 10.0, -0.5, 11);
        assert_eq!(axis.find_indexes(&[10.0, 7.6, 0.0]), vec![0, 5, 10]);
    }

    #[test]
    fn test_create_linear_data() {
        let mut axis = Axis::linear("x", "", 1.0, 2.0, 3);
        axis.create_linear_data(4);
        assert_eq!(axis.data(), Some(&[1.0, 3.0, 5.0, 7.0][..]));
        assert_eq!(axis.size(), 4);
    }

    #[test]
    fn test_equality() {
        let a = Axis::linear("x", "m", 0.0, 1.0, 4).with_index(1);
        let b = Axis::new("x", "m").with_data(vec![0.0, 1.0, 2.0, 3.0]).with_index(1);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_index(0));
    }

    #[test]
    fn test_from_array_rejects_2d() {
        let values = NdArray::zeros(super::super::array::DType::Float64, &[2, 2]);
        assert!(Axis::from_array("x", "", &values).is_err());
    }
}
