//! Node attribute values.
//!
//! Every engine stores the same small set of value kinds. Byte strings returned
//! for the reserved keys are turned back into text by [`normalize_attr`] at the read
//! boundary so callers never see the difference between engines.

use crate::error::{AppResult, ModaqError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved keys whose values are always text once read back.
pub const MANDATORY_TEXT_ATTRS: [&str; 3] = ["TITLE", "CLASS", "EXTDIM"];

/// Attribute map of one node, ordered by key.
pub type Metadata = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntTuple(Vec<i64>),
    FloatTuple(Vec<f64>),
    /// Arbitrary structured metadata.
    Json(serde_json::Value),
}

impl AttrValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "str",
            AttrValue::Bytes(_) => "bytes",
            AttrValue::IntTuple(_) => "int tuple",
            AttrValue::FloatTuple(_) => "float tuple",
            AttrValue::Json(_) => "json",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            AttrValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(value) => Some(*value),
            AttrValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(value) => Some(*value),
            AttrValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_int_tuple(&self) -> Option<&[i64]> {
        match self {
            AttrValue::IntTuple(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_float_tuple(&self) -> Option<&[f64]> {
        match self {
            AttrValue::FloatTuple(values) => Some(values),
            _ => None,
        }
    }

    /// Shape-like tuple as unsigned extents.
    pub fn as_shape(&self) -> AppResult<Vec<usize>> {
        let values = self.as_int_tuple().ok_or_else(|| {
            ModaqError::Type(format!("expected an int tuple, got a {}", self.kind_name()))
        })?;
        values
            .iter()
            .map(|&v| {
                usize::try_from(v)
                    .map_err(|_| ModaqError::Value(format!("negative extent {v} in a shape")))
            })
            .collect()
    }

    /// Structured value, parsing text that some engines store JSON as.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self {
            AttrValue::Json(value) => Some(value.clone()),
            AttrValue::Str(text) => serde_json::from_str(text).ok(),
            _ => None,
        }
    }

    /// Text form of a value, used by engines without a native structured type.
    pub fn to_text(&self) -> String {
        match self {
            AttrValue::Str(value) => value.clone(),
            AttrValue::Json(value) => value.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Float(value) => write!(f, "{value}"),
            AttrValue::Str(value) => f.write_str(value),
            AttrValue::Bytes(value) => write!(f, "{value:?}"),
            AttrValue::IntTuple(values) => write!(f, "{values:?}"),
            AttrValue::FloatTuple(values) => write!(f, "{values:?}"),
            AttrValue::Json(value) => write!(f, "{value}"),
        }
    }
}

impl PartialEq<&str> for AttrValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<&String> for AttrValue {
    fn from(value: &String) -> Self {
        AttrValue::Str(value.clone())
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(value: Vec<u8>) -> Self {
        AttrValue::Bytes(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(values: Vec<i64>) -> Self {
        AttrValue::IntTuple(values)
    }
}

impl From<&[usize]> for AttrValue {
    fn from(values: &[usize]) -> Self {
        AttrValue::IntTuple(values.iter().map(|&v| v as i64).collect())
    }
}

impl From<Vec<usize>> for AttrValue {
    fn from(values: Vec<usize>) -> Self {
        AttrValue::from(values.as_slice())
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(values: Vec<f64>) -> Self {
        AttrValue::FloatTuple(values)
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        AttrValue::Json(value)
    }
}

/// Serializable mirror of [`AttrValue`], JSON kept as text so that non
/// self-describing formats can persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum StoredAttr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntTuple(Vec<i64>),
    FloatTuple(Vec<f64>),
    Json(String),
}

impl From<&AttrValue> for StoredAttr {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Bool(v) => StoredAttr::Bool(*v),
            AttrValue::Int(v) => StoredAttr::Int(*v),
            AttrValue::Float(v) => StoredAttr::Float(*v),
            AttrValue::Str(v) => StoredAttr::Str(v.clone()),
            AttrValue::Bytes(v) => StoredAttr::Bytes(v.clone()),
            AttrValue::IntTuple(v) => StoredAttr::IntTuple(v.clone()),
            AttrValue::FloatTuple(v) => StoredAttr::FloatTuple(v.clone()),
            AttrValue::Json(v) => StoredAttr::Json(v.to_string()),
        }
    }
}

impl From<&StoredAttr> for AttrValue {
    fn from(value: &StoredAttr) -> Self {
        match value {
            StoredAttr::Bool(v) => AttrValue::Bool(*v),
            StoredAttr::Int(v) => AttrValue::Int(*v),
            StoredAttr::Float(v) => AttrValue::Float(*v),
            StoredAttr::Str(v) => AttrValue::Str(v.clone()),
            StoredAttr::Bytes(v) => AttrValue::Bytes(v.clone()),
            StoredAttr::IntTuple(v) => AttrValue::IntTuple(v.clone()),
            StoredAttr::FloatTuple(v) => AttrValue::FloatTuple(v.clone()),
            StoredAttr::Json(text) => serde_json::from_str(text)
                .map(AttrValue::Json)
                .unwrap_or_else(|_| AttrValue::Str(text.clone())),
        }
    }
}

/// Accepts `title` as an alias for the reserved `TITLE` key.
pub fn canonical_key(key: &str) -> &str {
    if key == "title" {
        "TITLE"
    } else {
        key
    }
}

/// Decode byte-string values of the reserved keys into text.
///
/// Invalid UTF-8 is returned untouched.
pub fn normalize_attr(key: &str, value: AttrValue) -> AttrValue {
    if !MANDATORY_TEXT_ATTRS.contains(&canonical_key(key)) {
        return value;
    }
    match value {
        AttrValue::Bytes(raw) => match String::from_utf8(raw) {
            Ok(text) => AttrValue::Str(text),
            Err(err) => AttrValue::Bytes(err.into_bytes()),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_reserved_keys() {
        let title = normalize_attr("TITLE", AttrValue::Bytes(b"scan".to_vec()));
        assert_eq!(title, AttrValue::Str("scan".to_string()));
        let class = normalize_attr("CLASS", AttrValue::Bytes(b"GROUP".to_vec()));
        assert_eq!(class, "GROUP");
        let alias = normalize_attr("title", AttrValue::Bytes(b"x".to_vec()));
        assert_eq!(alias, "x");
    }

    #[test]
    fn test_normalize_leaves_other_values() {
        let raw = AttrValue::Bytes(vec![0xff, 0xfe]);
        assert_eq!(normalize_attr("TITLE", raw.clone()), raw);
        let payload = AttrValue::Bytes(b"abc".to_vec());
        assert_eq!(normalize_attr("payload", payload.clone()), payload);
        assert_eq!(normalize_attr("TITLE", AttrValue::Int(3)), AttrValue::Int(3));
    }

    #[test]
    fn test_stored_attr_mirror() {
        let json = AttrValue::from(serde_json::json!({"gain": 2, "mode": "fast"}));
        let stored = StoredAttr::from(&json);
        assert_eq!(AttrValue::from(&stored), json);

        let shape = AttrValue::from(vec![5usize, 10, 3]);
        assert_eq!(shape.as_shape().unwrap(), vec![5, 10, 3]);
        assert!(AttrValue::IntTuple(vec![-1]).as_shape().is_err());
    }

    #[test]
    fn test_json_from_text() {
        let text = AttrValue::from(r#"{"a": [1, 2]}"#);
        assert_eq!(text.as_json().unwrap()["a"][1], 2);
        assert!(AttrValue::from("plain").as_json().is_none());
    }
}
