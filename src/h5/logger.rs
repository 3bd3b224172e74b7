//! Continuous logging into enlargeable arrays.
//!
//! A [`DataLogger`] session owns one `Data_logger000` group holding a shared `Time`
//! array and one enlargeable `Data` array per logged channel. Every tick grows all of
//! them by exactly one row so their leading extents stay equal.
//!
//! [`H5LogLayer`] is the text side: a tracing layer writing each event as one line of
//! the saver's `Logger` array.

use super::attrs::{AttrValue, Metadata};
use super::backend::GroupType;
use super::data_saving::DataSaver;
use super::node::{EArray, Group};
use super::saving::{ArrayOptions, DataType, H5Saver};
use crate::data::dwa::now_timestamp;
use crate::data::{DType, DataToExport, DataWithAxes, NdArray};
use crate::error::{AppResult, ModaqError};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Identifies one logged channel: origin, data name and channel index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey {
    pub origin: String,
    pub name: String,
    pub index: usize,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.origin, self.name, self.index)
    }
}

#[derive(Debug)]
struct LoggedChannel {
    dtype: DType,
    row_shape: Vec<usize>,
    array: EArray,
}

/// One logging session below the raw group.
#[derive(Debug)]
pub struct DataLogger {
    session: Group,
    time: EArray,
    started: f64,
    ticks: usize,
    detectors: BTreeMap<String, Group>,
    channels: BTreeMap<ChannelKey, LoggedChannel>,
}

impl DataLogger {
    /// Start a new session group under the saver's raw group.
    pub fn new(saver: &mut H5Saver, title: &str, settings: &str) -> AppResult<Self> {
        let raw = saver.raw_group()?.clone();
        let session = saver.add_incremental_group(GroupType::DataLogger, &raw, title, settings, &Metadata::new())?;
        let mut time_attrs = Metadata::new();
        time_attrs.insert("units".to_string(), AttrValue::from("s"));
        time_attrs.insert("label".to_string(), AttrValue::from("time"));
        let time = saver.add_enlargeable_array(
            &session,
            "time",
            DataType::DataEnlargeable,
            ArrayOptions::enlargeable(DType::Float64, &[])
                .with_title("Time")
                .with_metadata(time_attrs),
        )?;
        debug!("data logger session {} started", session.path());
        Ok(Self {
            session,
            time,
            started: now_timestamp(),
            ticks: 0,
            detectors: BTreeMap::new(),
            channels: BTreeMap::new(),
        })
    }

    pub fn session(&self) -> &Group {
        &self.session
    }

    pub fn time_array(&self) -> &EArray {
        &self.time
    }

    /// Number of rows written to every array of the session.
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn channel_array(&self, key: &ChannelKey) -> Option<&EArray> {
        self.channels.get(key).map(|channel| &channel.array)
    }

    pub fn channel_keys(&self) -> impl Iterator<Item = &ChannelKey> {
        self.channels.keys()
    }

    /// Log `dte` with the time elapsed since the session started.
    pub fn log_tick(&mut self, saver: &mut H5Saver, dte: &DataToExport) -> AppResult<()> {
        let elapsed = now_timestamp() - self.started;
        self.log_tick_at(saver, dte, elapsed)
    }

    /// Log `dte` as one row at `elapsed` seconds.
    ///
    /// Channels seen for the first time are back-filled with missing values for the
    /// earlier ticks; known channels absent from `dte` get one missing-value row. Rows
    /// are checked against the known channels before anything is written.
    pub fn log_tick_at(&mut self, saver: &mut H5Saver, dte: &DataToExport, elapsed: f64) -> AppResult<()> {
        let mut rows: BTreeMap<ChannelKey, &NdArray> = BTreeMap::new();
        for dwa in dte {
            for (index, array) in dwa.data().iter().enumerate() {
                let key = ChannelKey {
                    origin: dwa.origin().to_string(),
                    name: dwa.name().to_string(),
                    index,
                };
                if let Some(channel) = self.channels.get(&key) {
                    check_row(&key, channel, array)?;
                }
                rows.insert(key, array);
            }
        }

        for dwa in dte {
            let fresh = (0..dwa.length()).any(|index| {
                !self.channels.contains_key(&ChannelKey {
                    origin: dwa.origin().to_string(),
                    name: dwa.name().to_string(),
                    index,
                })
            });
            if fresh {
                self.add_channels(saver, dwa)?;
            }
        }

        saver.append(&self.time, &NdArray::from_vec(vec![elapsed]))?;
        for (key, channel) in &self.channels {
            match rows.get(key) {
                Some(row) => saver.append(&channel.array, row)?,
                None => saver.append(
                    &channel.array,
                    &NdArray::filled_missing(channel.dtype, &channel.row_shape),
                )?,
            }
        }
        self.ticks += 1;
        Ok(())
    }

    fn add_channels(&mut self, saver: &mut H5Saver, dwa: &DataWithAxes) -> AppResult<()> {
        let origin = if dwa.origin().is_empty() {
            dwa.name()
        } else {
            dwa.origin()
        };
        let det = match self.detectors.get(origin) {
            Some(det) => det.clone(),
            None => {
                let det = saver.add_det_group(&self.session, origin, "", &Metadata::new())?;
                self.detectors.insert(origin.to_string(), det.clone());
                det
            }
        };
        let data_group = saver.add_data_group(&det, dwa.dim(), "", "", &Metadata::new())?;

        for (index, (array, label)) in dwa.data().iter().zip(dwa.labels()).enumerate() {
            let key = ChannelKey {
                origin: dwa.origin().to_string(),
                name: dwa.name().to_string(),
                index,
            };
            if self.channels.contains_key(&key) {
                continue;
            }
            let ch = saver.add_ch_group(&data_group, label, "", &Metadata::new())?;
            let mut attrs = Metadata::new();
            attrs.insert("type".to_string(), dwa.kind().name().into());
            attrs.insert("data_name".to_string(), dwa.name().into());
            attrs.insert("label".to_string(), label.into());
            attrs.insert("origin".to_string(), dwa.origin().into());
            attrs.insert("source".to_string(), dwa.source().name().into());
            let earray = saver.add_enlargeable_array(
                &ch,
                "data",
                DataType::DataEnlargeable,
                ArrayOptions::enlargeable(array.dtype(), array.shape())
                    .with_title(label.as_str())
                    .with_data_dimension(dwa.dim())
                    .with_metadata(attrs),
            )?;
            DataSaver::new(saver).add_axes(&ch, dwa)?;
            if self.ticks > 0 {
                let mut shape = vec![self.ticks];
                shape.extend_from_slice(array.shape());
                saver.append(&earray, &NdArray::filled_missing(array.dtype(), &shape))?;
            }
            debug!("logging channel {} into {}", key, earray.path());
            self.channels.insert(
                key,
                LoggedChannel {
                    dtype: array.dtype(),
                    row_shape: array.shape().to_vec(),
                    array: earray,
                },
            );
        }
        Ok(())
    }
}

fn check_row(key: &ChannelKey, channel: &LoggedChannel, row: &NdArray) -> AppResult<()> {
    if row.dtype() != channel.dtype {
        return Err(ModaqError::Type(format!(
            "channel {key} logs {} rows, got {}",
            channel.dtype,
            row.dtype()
        )));
    }
    if row.shape() != channel.row_shape.as_slice() {
        return Err(ModaqError::Shape(format!(
            "channel {key} logs rows of shape {:?}, got {:?}",
            channel.row_shape,
            row.shape()
        )));
    }
    Ok(())
}

thread_local! {
    static WRITING: Cell<bool> = const { Cell::new(false) };
}

/// Extracts the `message` field of an event, falling back to the first other field.
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            if self.message.len() >= 2 && self.message.starts_with('"') && self.message.ends_with('"') {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        } else if self.message.is_empty() {
            self.message = format!("{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else if self.message.is_empty() {
            self.message = format!("{}={}", field.name(), value);
        }
    }
}

/// Tracing layer appending events to the `Logger` array of a shared saver.
///
/// Lines read `<rfc3339 time> - <target> - <LEVEL> - <message>`. Events raised while
/// the saver is busy (including the ones the saver itself emits) are skipped. Lines the
/// saver fails to store, for instance before `init_file` created the logger array, are
/// counted in [`H5LogLayer::failed_writes`].
#[derive(Clone)]
pub struct H5LogLayer {
    saver: Arc<Mutex<H5Saver>>,
    failed_writes: Arc<AtomicUsize>,
}

impl H5LogLayer {
    pub fn new(saver: Arc<Mutex<H5Saver>>) -> Self {
        Self {
            saver,
            failed_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of log lines the saver rejected so far, shared by all clones.
    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for H5LogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if WRITING.with(Cell::get) {
            return;
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let metadata = event.metadata();
        let message = if visitor.message.is_empty() {
            metadata.name().to_string()
        } else {
            visitor.message
        };
        let line = format!(
            "{} - {} - {} - {}",
            chrono::Local::now().to_rfc3339(),
            metadata.target(),
            metadata.level(),
            message
        );

        let Some(mut saver) = self.saver.try_lock() else {
            return;
        };
        WRITING.with(|writing| writing.set(true));
        if saver.add_log(&line).is_err() {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
        }
        WRITING.with(|writing| writing.set(false));
    }
}
