//! `DataToExport`: an ordered, named collection of `DataWithAxes`.

use super::dwa::{now_timestamp, DataDim, DataSource, DataWithAxes};
use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataToExport {
    name: String,
    timestamp: f64,
    data: Vec<DataWithAxes>,
}

impl DataToExport {
    /// Collect `data`; elements without an origin inherit the collection name.
    pub fn new(name: impl Into<String>, data: Vec<DataWithAxes>) -> Self {
        let mut dte = Self {
            name: name.into(),
            timestamp: now_timestamp(),
            data: Vec::new(),
        };
        for dwa in data {
            dte.append(dwa);
        }
        dte
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    pub fn data(&self) -> &[DataWithAxes] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataWithAxes> {
        self.data.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DataWithAxes> {
        self.data.get(index)
    }

    /// Add `dwa`, replacing any element with the same name and origin.
    pub fn append(&mut self, mut dwa: DataWithAxes) {
        if dwa.origin().is_empty() {
            dwa.set_origin(self.name.clone());
        }
        if let Some(index) = self.index_from_name_origin(dwa.name(), dwa.origin()) {
            self.data.remove(index);
        }
        self.data.push(dwa);
    }

    /// Append every element of another collection.
    pub fn extend(&mut self, other: DataToExport) {
        for dwa in other.data {
            self.append(dwa);
        }
    }

    pub fn pop(&mut self, index: usize) -> AppResult<DataWithAxes> {
        if index >= self.data.len() {
            return Err(ModaqError::Value(format!(
                "index {} out of range for {} elements",
                index,
                self.data.len()
            )));
        }
        Ok(self.data.remove(index))
    }

    pub fn remove(&mut self, dwa: &DataWithAxes) -> Option<DataWithAxes> {
        let index = self.data.iter().position(|elt| elt == dwa)?;
        Some(self.data.remove(index))
    }

    /// Position of the element with this name (and origin, unless empty).
    pub fn index_from_name_origin(&self, name: &str, origin: &str) -> Option<usize> {
        self.data
            .iter()
            .position(|dwa| dwa.name() == name && (origin.is_empty() || dwa.origin() == origin))
    }

    pub fn get_data_from_name(&self, name: &str) -> Option<&DataWithAxes> {
        self.data.iter().find(|dwa| dwa.name() == name)
    }

    pub fn get_data_from_names(&self, names: &[&str]) -> DataToExport {
        self.filtered(|dwa| names.contains(&dwa.name()))
    }

    pub fn get_data_from_name_origin(&self, name: &str, origin: &str) -> Option<&DataWithAxes> {
        self.index_from_name_origin(name, origin)
            .map(|index| &self.data[index])
    }

    /// Lookup by `origin/name`.
    pub fn get_data_from_full_name(&self, full_name: &str) -> Option<&DataWithAxes> {
        let (origin, name) = full_name.split_once('/')?;
        self.get_data_from_name_origin(name, origin)
    }

    pub fn get_data_from_full_names(&self, full_names: &[&str]) -> DataToExport {
        let data = full_names
            .iter()
            .filter_map(|full_name| self.get_data_from_full_name(full_name).cloned())
            .collect();
        DataToExport::new(self.name.clone(), data)
    }

    pub fn get_data_from_dim(&self, dim: DataDim) -> DataToExport {
        self.filtered(|dwa| dwa.dim() == dim)
    }

    pub fn get_data_from_dims(&self, dims: &[DataDim]) -> DataToExport {
        let mut selection = DataToExport::new(self.name.clone(), Vec::new());
        for dim in dims {
            selection.extend(self.get_data_from_dim(*dim));
        }
        selection
    }

    pub fn get_data_from_source(&self, source: DataSource) -> DataToExport {
        self.filtered(|dwa| dwa.source() == source)
    }

    /// Elements whose named field equals `value`, sorted by name.
    ///
    /// Recognised fields: `name`, `origin`, `source`, `dim`, `distribution`, `kind`.
    pub fn get_data_from_attribute(&self, attribute: &str, value: &str) -> AppResult<DataToExport> {
        let field: fn(&DataWithAxes) -> String = match attribute {
            "name" => |dwa| dwa.name().to_string(),
            "origin" => |dwa| dwa.origin().to_string(),
            "source" => |dwa| dwa.source().name().to_string(),
            "dim" => |dwa| dwa.dim().name().to_string(),
            "distribution" => |dwa| dwa.distribution().name().to_string(),
            "kind" => |dwa| dwa.kind().name().to_string(),
            other => {
                return Err(ModaqError::Value(format!(
                    "'{other}' is not a DataWithAxes attribute"
                )))
            }
        };
        let mut data: Vec<DataWithAxes> = self
            .data
            .iter()
            .filter(|dwa| field(dwa) == value)
            .cloned()
            .collect();
        data.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(DataToExport {
            name: self.name.clone(),
            timestamp: self.timestamp,
            data,
        })
    }

    /// Elements whose arrays have exactly `naxes` dimensions.
    pub fn get_data_from_naxes(&self, naxes: usize) -> DataToExport {
        self.filtered(|dwa| dwa.shape().len() == naxes)
    }

    pub fn get_data_from_sig_axes(&self, naxes: usize) -> DataToExport {
        self.filtered(|dwa| dwa.sig_indexes().len() == naxes)
    }

    pub fn get_names(&self, dim: Option<DataDim>) -> Vec<String> {
        self.select(dim).map(|dwa| dwa.name().to_string()).collect()
    }

    pub fn get_full_names(&self, dim: Option<DataDim>) -> Vec<String> {
        self.select(dim).map(DataWithAxes::get_full_name).collect()
    }

    /// Distinct origins in first-seen order.
    pub fn get_origins(&self, dim: Option<DataDim>) -> Vec<String> {
        let mut origins: Vec<String> = Vec::new();
        for dwa in self.select(dim) {
            if !origins.iter().any(|origin| origin == dwa.origin()) {
                origins.push(dwa.origin().to_string());
            }
        }
        origins
    }

    /// Dimensionalities present, in `DataDim` order.
    pub fn get_dim_presents(&self) -> Vec<DataDim> {
        DataDim::ALL
            .iter()
            .copied()
            .filter(|dim| self.data.iter().any(|dwa| dwa.dim() == *dim))
            .collect()
    }

    fn select(&self, dim: Option<DataDim>) -> impl Iterator<Item = &DataWithAxes> {
        self.data
            .iter()
            .filter(move |dwa| dim.map_or(true, |dim| dwa.dim() == dim))
    }

    fn filtered(&self, keep: impl Fn(&DataWithAxes) -> bool) -> DataToExport {
        DataToExport {
            name: self.name.clone(),
            timestamp: self.timestamp,
            data: self.data.iter().filter(|dwa| keep(dwa)).cloned().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DataToExport {
    type Item = &'a DataWithAxes;
    type IntoIter = std::slice::Iter<'a, DataWithAxes>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl IntoIterator for DataToExport {
    type Item = DataWithAxes;
    type IntoIter = std::vec::IntoIter<DataWithAxes>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::array::NdArray;
    use crate::data::dwa::DwaKind;

    fn dwa(kind: DwaKind, name: &str, len: usize) -> DataWithAxes {
        DataWithAxes::new(kind, name, vec![NdArray::linspace(0.0, 1.0, len)]).unwrap()
    }

    fn sample() -> DataToExport {
        DataToExport::new(
            "dte",
            vec![
                dwa(DwaKind::DataRaw, "b", 1).with_origin("det0"),
                dwa(DwaKind::DataRaw, "a", 10).with_origin("det0"),
                dwa(DwaKind::DataCalculated, "a", 10).with_origin("det1"),
                dwa(DwaKind::DataRaw, "c", 1),
            ],
        )
    }

    #[test]
    fn test_origin_defaults_to_collection_name() {
        let dte = sample();
        assert_eq!(dte.get_data_from_name("c").unwrap().origin(), "dte");
        assert_eq!(dte.get_origins(None), vec!["det0", "det1", "dte"]);
    }

    #[test]
    fn test_append_replaces_same_name_origin() {
        let mut dte = sample();
        dte.append(dwa(DwaKind::DataRaw, "a", 5).with_origin("det0"));
        assert_eq!(dte.len(), 4);
        assert_eq!(dte.get_data_from_full_name("det0/a").unwrap().size(), 5);
        assert_eq!(dte.get_data_from_full_name("det1/a").unwrap().size(), 10);
    }

    #[test]
    fn test_lookups() {
        let dte = sample();
        assert_eq!(dte.get_data_from_dim(DataDim::Data0D).get_names(None), vec!["b", "c"]);
        assert_eq!(dte.get_dim_presents(), vec![DataDim::Data0D, DataDim::Data1D]);
        assert_eq!(dte.get_data_from_source(DataSource::Calculated).len(), 1);
        assert_eq!(
            dte.get_full_names(Some(DataDim::Data1D)),
            vec!["det0/a", "det1/a"]
        );
        assert_eq!(dte.get_data_from_naxes(1).len(), 4);
        assert_eq!(
            dte.get_data_from_dims(&[DataDim::Data1D, DataDim::Data0D]).len(),
            4
        );
    }

    #[test]
    fn test_get_data_from_attribute() {
        let dte = sample();
        let selection = dte.get_data_from_attribute("origin", "det0").unwrap();
        assert_eq!(selection.get_names(None), vec!["a", "b"]);
        let selection = dte.get_data_from_attribute("kind", "DataCalculated").unwrap();
        assert_eq!(selection.len(), 1);
        assert!(matches!(
            dte.get_data_from_attribute("colour", "red"),
            Err(ModaqError::Value(_))
        ));
    }

    #[test]
    fn test_pop_and_remove() {
        let mut dte = sample();
        let first = dte.pop(0).unwrap();
        assert_eq!(first.name(), "b");
        assert!(dte.pop(10).is_err());
        let target = dte.get(0).cloned().unwrap();
        assert!(dte.remove(&target).is_some());
        assert_eq!(dte.len(), 2);
    }
}
