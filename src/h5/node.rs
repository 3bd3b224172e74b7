//! Lightweight handles on nodes of an open file.
//!
//! A handle is a path plus the node class read when it was resolved. It carries no
//! engine state, so handles stay valid across flushes and can be freely cloned; all
//! operations go through the owning [`H5Backend`](super::backend::H5Backend).

use crate::error::{AppResult, ModaqError};
use std::fmt;
use std::ops::Deref;

pub const ROOT_PATH: &str = "/";

named_enum!(
    /// Value of the mandatory `CLASS` attribute.
    NodeClass: Node {
        Group => "GROUP",
        CArray => "CARRAY",
        EArray => "EARRAY",
        VlArray => "VLARRAY",
    }
);

impl NodeClass {
    pub fn is_array(self) -> bool {
        !matches!(self, NodeClass::Group)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    path: String,
    class: NodeClass,
    string_rows: bool,
}

impl Node {
    pub(crate) fn new(path: impl Into<String>, class: NodeClass) -> Self {
        Self {
            path: path.into(),
            class,
            string_rows: false,
        }
    }

    pub(crate) fn with_string_rows(mut self, string_rows: bool) -> Self {
        self.string_rows = string_rows;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component, `/` for the root.
    pub fn name(&self) -> &str {
        node_name(&self.path)
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn is_group(&self) -> bool {
        self.class == NodeClass::Group
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }

    /// VLARRAY whose rows are UTF-8 strings.
    pub fn is_string_array(&self) -> bool {
        self.class == NodeClass::VlArray && self.string_rows
    }

    pub fn parent_path(&self) -> Option<String> {
        parent_path(&self.path)
    }

    fn expect_class(self, class: NodeClass) -> AppResult<Self> {
        if self.class == class {
            Ok(self)
        } else {
            Err(ModaqError::Node(format!(
                "{} is a {}, not a {}",
                self.path, self.class, class
            )))
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.class)
    }
}

impl AsRef<str> for Node {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

macro_rules! typed_node {
    ($(#[$meta:meta])* $name:ident, $class:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(Node);

        impl $name {
            pub fn node(&self) -> &Node {
                &self.0
            }

            pub fn into_node(self) -> Node {
                self.0
            }
        }

        impl TryFrom<Node> for $name {
            type Error = ModaqError;

            fn try_from(node: Node) -> AppResult<Self> {
                node.expect_class($class).map($name)
            }
        }

        impl From<$name> for Node {
            fn from(typed: $name) -> Node {
                typed.0
            }
        }

        impl Deref for $name {
            type Target = Node;

            fn deref(&self) -> &Node {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.path()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

typed_node!(
    /// Container node.
    Group,
    NodeClass::Group
);
typed_node!(
    /// Fixed-size array written once.
    CArray,
    NodeClass::CArray
);
typed_node!(
    /// Array growing along its leading dimension.
    EArray,
    NodeClass::EArray
);
typed_node!(
    /// Sequence of variable-length 1D rows.
    VlArray,
    NodeClass::VlArray
);

impl Group {
    pub(crate) fn root() -> Self {
        Group(Node::new(ROOT_PATH, NodeClass::Group))
    }
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

pub fn node_name(path: &str) -> &str {
    if path == ROOT_PATH {
        return ROOT_PATH;
    }
    path.rsplit('/').next().unwrap_or(path)
}

pub fn parent_path(path: &str) -> Option<String> {
    if path == ROOT_PATH {
        return None;
    }
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => Some(ROOT_PATH.to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => Some(ROOT_PATH.to_string()),
    }
}

/// Absolute form of a user supplied path (`RawData/Scan000` -> `/RawData/Scan000`).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Reject names that cannot be a single path component.
pub fn check_child_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ModaqError::Value(format!("'{name}' is not a valid node name")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(join_path("/", "RawData"), "/RawData");
        assert_eq!(join_path("/RawData", "Scan000"), "/RawData/Scan000");
        assert_eq!(node_name("/RawData/Scan000"), "Scan000");
        assert_eq!(node_name("/"), "/");
        assert_eq!(parent_path("/RawData/Scan000").as_deref(), Some("/RawData"));
        assert_eq!(parent_path("/RawData").as_deref(), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(normalize_path("RawData/Logger/"), "/RawData/Logger");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_child_names() {
        assert!(check_child_name("Ch000").is_ok());
        assert!(check_child_name("").is_err());
        assert!(check_child_name("a/b").is_err());
    }

    #[test]
    fn test_typed_handles() {
        let node = Node::new("/RawData", NodeClass::Group);
        let group = Group::try_from(node.clone()).unwrap();
        assert_eq!(group.name(), "RawData");
        assert!(matches!(EArray::try_from(node), Err(ModaqError::Node(_))));
        assert_eq!("EARRAY".parse::<NodeClass>().unwrap(), NodeClass::EArray);
        assert!("TABLE".parse::<NodeClass>().is_err());
    }
}
