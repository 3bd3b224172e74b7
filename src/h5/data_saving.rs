//! Writing and reading `Axis`/`DataWithAxes` under the saver layout.

use super::attrs::{AttrValue, Metadata};
use super::backend::GroupType;
use super::node::{CArray, Group, Node};
use super::saving::{ArrayOptions, DataType, H5Saver};
use crate::data::{Axis, DataDim, DataDistribution, DataSource, DataToExport, DataWithAxes, DwaKind};
use crate::error::{AppResult, ModaqError};
use tracing::debug;

const DATA_NODE: &str = "Data";
const X_AXIS: &str = "x_axis";
const Y_AXIS: &str = "y_axis";

fn text_attr(saver: &H5Saver, node: impl AsRef<str>, key: &str) -> AppResult<String> {
    Ok(saver
        .get_attr_opt(node, key)?
        .map(|value| value.to_text())
        .unwrap_or_default())
}

fn usize_attr(saver: &H5Saver, node: impl AsRef<str>, key: &str) -> AppResult<usize> {
    let node = node.as_ref();
    match saver.get_attr_opt(node, key)? {
        None => Ok(0),
        Some(value) => value
            .as_i64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| ModaqError::Value(format!("{node}: '{key}' is not an index ({value})"))),
    }
}

/// Saves axes as `AxisNN` (or `x_axis`/`y_axis`) CARRAYs.
pub struct AxisSaver<'a> {
    saver: &'a mut H5Saver,
}

impl<'a> AxisSaver<'a> {
    pub fn new(saver: &'a mut H5Saver) -> Self {
        Self { saver }
    }

    /// Number of axis nodes already below `parent`, used to index the next one.
    fn next_index(&self, parent: &str) -> AppResult<usize> {
        let mut count = 0;
        for node in self.saver.walk_nodes(parent)? {
            if self
                .saver
                .get_attr_opt(&node, "data_type")?
                .is_some_and(|t| t == DataType::Axis.name())
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Save `axis` under `parent` as the next free `AxisNN` node.
    pub fn add_axis(&mut self, parent: impl AsRef<str>, axis: &Axis) -> AppResult<CArray> {
        let parent = parent.as_ref();
        let name = format!("{}{:02}", DataType::Axis.node_stem(), self.next_index(parent)?);
        self.add_named_axis(parent, &name, axis)
    }

    /// Save `axis` under `parent` with an explicit node name.
    pub fn add_named_axis(&mut self, parent: impl AsRef<str>, name: &str, axis: &Axis) -> AppResult<CArray> {
        let title = if axis.label().is_empty() {
            name
        } else {
            axis.label()
        };
        let array = self
            .saver
            .create_carray(parent, name, &axis.to_array(), title)?;
        let mut attrs = Metadata::new();
        attrs.insert("data_type".into(), DataType::Axis.name().into());
        attrs.insert("data_dimension".into(), DataDim::Data1D.name().into());
        attrs.insert("size".into(), axis.size().into());
        attrs.insert("label".into(), axis.label().into());
        attrs.insert("units".into(), axis.units().into());
        attrs.insert("index".into(), axis.index().into());
        attrs.insert("offset".into(), axis.offset().into());
        attrs.insert("scaling".into(), axis.scaling().into());
        attrs.insert("spread_order".into(), axis.spread_order().into());
        self.saver.set_attrs(&array, &attrs)?;
        Ok(array)
    }

    pub fn load_axis(&self, node: impl AsRef<str>) -> AppResult<Axis> {
        read_axis(&*self.saver, node.as_ref())
    }
}

/// Saves `DataWithAxes` as one `ChNNN` group per channel.
pub struct DataSaver<'a> {
    saver: &'a mut H5Saver,
}

impl<'a> DataSaver<'a> {
    pub fn new(saver: &'a mut H5Saver) -> Self {
        Self { saver }
    }

    /// Write every channel of `dwa` below `parent` (usually a detector group).
    ///
    /// Channels land in the `Data0D`/`Data1D`/... group matching the data
    /// dimensionality. Returns the channel groups in channel order.
    pub fn add_data(&mut self, parent: impl AsRef<str>, dwa: &DataWithAxes, settings: &str) -> AppResult<Vec<Group>> {
        let data_group = self
            .saver
            .add_data_group(parent, dwa.dim(), "", settings, &Metadata::new())?;
        let mut channels = Vec::with_capacity(dwa.length());
        for (array, label) in dwa.data().iter().zip(dwa.labels()) {
            let ch = self
                .saver
                .add_ch_group(&data_group, label, "", &Metadata::new())?;
            let metadata = data_attrs(dwa, label);
            self.saver.add_array(
                &ch,
                DATA_NODE,
                DataType::Data,
                ArrayOptions::fixed(array.clone())
                    .with_title(label.as_str())
                    .with_data_dimension(dwa.dim())
                    .with_metadata(metadata),
            )?;
            self.add_axes(&ch, dwa)?;
            channels.push(ch);
        }
        debug!("saved {} channel(s) of '{}'", channels.len(), dwa.get_full_name());
        Ok(channels)
    }

    /// Write every element of `dte` below `parent`.
    pub fn add_dte(&mut self, parent: impl AsRef<str>, dte: &DataToExport, settings: &str) -> AppResult<Vec<Group>> {
        let parent = parent.as_ref();
        let mut channels = Vec::new();
        for dwa in dte {
            channels.extend(self.add_data(parent, dwa, settings)?);
        }
        Ok(channels)
    }

    pub(crate) fn add_axes(&mut self, ch: &Group, dwa: &DataWithAxes) -> AppResult<()> {
        let sig = dwa.sig_indexes();
        let uniform = dwa.distribution() == DataDistribution::Uniform;
        let mut axis_saver = AxisSaver::new(&mut *self.saver);
        for axis in dwa.axes() {
            let named = match sig.as_slice() {
                [x] if uniform && axis.index() == *x => Some(X_AXIS),
                [y, _] if uniform && axis.index() == *y => Some(Y_AXIS),
                [_, x] if uniform && axis.index() == *x => Some(X_AXIS),
                _ => None,
            };
            match named {
                Some(name) if !axis_saver.saver.is_node_in_group(ch, name)? => {
                    axis_saver.add_named_axis(ch, name, axis)?;
                }
                _ => {
                    axis_saver.add_axis(ch, axis)?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild the single-channel `DataWithAxes` stored in a channel group.
    pub fn load_data(&self, ch: impl AsRef<str>) -> AppResult<DataWithAxes> {
        let ch = self.saver.get_group(ch)?;
        let data_node = self.saver.get_node_from(&ch, DATA_NODE)?;
        let saver = &*self.saver;
        let values = saver.read_array(&data_node)?;

        let kind: DwaKind = match saver.get_attr_opt(&data_node, "type")? {
            Some(value) => value.to_text().parse()?,
            None => DwaKind::DataWithAxes,
        };
        let mut dwa = DataWithAxes::new(kind, text_attr(saver, &data_node, "data_name")?, vec![values])?
            .with_labels(vec![text_attr(saver, &data_node, "label")?])
            .with_origin(text_attr(saver, &data_node, "origin")?);
        if let Some(source) = saver.get_attr_opt(&data_node, "source")? {
            dwa = dwa.with_source(source.to_text().parse::<DataSource>()?);
        }
        if let Some(distribution) = saver.get_attr_opt(&data_node, "distribution")? {
            dwa = dwa.with_distribution(distribution.to_text().parse::<DataDistribution>()?);
        }
        if let Some(timestamp) = saver
            .get_attr_opt(&data_node, "timestamp")?
            .and_then(|value| value.as_f64())
        {
            dwa = dwa.with_timestamp(timestamp);
        }

        let mut axes = Vec::new();
        for node in saver.get_children(&ch)?.into_values() {
            if is_axis_node(saver, &node)? {
                axes.push(read_axis(saver, node.path())?);
            }
        }
        axes.sort_by_key(|axis| (axis.index(), axis.spread_order()));
        let nav_indexes = match saver.get_attr_opt(&data_node, "nav_indexes")? {
            Some(value) => value.as_shape()?,
            None => Vec::new(),
        };
        dwa.with_axes(axes)?.with_nav_indexes(nav_indexes)
    }

    /// Load every `ChNNN` group of a `DataND`-style group. Channels sharing
    /// name and origin are merged back into one multi-channel `DataWithAxes`.
    pub fn load_channels(&self, data_group: impl AsRef<str>) -> AppResult<DataToExport> {
        let data_group = self.saver.get_group(data_group)?;
        let mut merged: Vec<DataWithAxes> = Vec::new();
        for ch in self.saver.get_groups(&data_group, GroupType::Ch)? {
            let single = self.load_data(&ch)?;
            let existing = merged
                .iter_mut()
                .find(|dwa| dwa.name() == single.name() && dwa.origin() == single.origin());
            match existing {
                Some(dwa) => {
                    let mut data = dwa.data().to_vec();
                    data.extend(single.data().iter().cloned());
                    let mut labels = dwa.labels().to_vec();
                    labels.extend(single.labels().iter().cloned());
                    dwa.set_data(data)?;
                    dwa.set_labels(labels);
                }
                None => merged.push(single),
            }
        }
        Ok(DataToExport::new(data_group.name(), merged))
    }
}

fn read_axis(saver: &H5Saver, node: &str) -> AppResult<Axis> {
    let values = saver.read_array(node)?;
    let axis = Axis::from_array(
        text_attr(saver, node, "label")?,
        text_attr(saver, node, "units")?,
        &values,
    )?;
    Ok(axis
        .with_index(usize_attr(saver, node, "index")?)
        .with_spread_order(usize_attr(saver, node, "spread_order")?))
}

fn is_axis_node(saver: &H5Saver, node: &Node) -> AppResult<bool> {
    Ok(!node.is_group()
        && saver
            .get_attr_opt(node, "data_type")?
            .is_some_and(|t| t == DataType::Axis.name()))
}

fn data_attrs(dwa: &DataWithAxes, label: &str) -> Metadata {
    let mut attrs = Metadata::new();
    attrs.insert("type".into(), dwa.kind().name().into());
    attrs.insert("data_name".into(), dwa.name().into());
    attrs.insert("shape".into(), AttrValue::from(dwa.shape()));
    attrs.insert("label".into(), label.into());
    attrs.insert("origin".into(), dwa.origin().into());
    attrs.insert("source".into(), dwa.source().name().into());
    attrs.insert("distribution".into(), dwa.distribution().name().into());
    attrs.insert("nav_indexes".into(), AttrValue::from(dwa.nav_indexes()));
    attrs.insert("timestamp".into(), dwa.timestamp().into());
    attrs
}
