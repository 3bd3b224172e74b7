//! Custom error types for the library.
//!
//! This module defines the primary error type, `ModaqError`, shared by the data model,
//! the wire codec and the storage layer. Using the `thiserror` crate, it provides a
//! centralized and consistent way to report failures to the immediate caller.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: Partial or failed network I/O in the socket wrapper, including the
//!   peer closing the stream before the requested number of bytes arrived.
//! - **`Type`**: An unsupported value kind was handed to an encoder, or a decoded type
//!   tag did not match the expected kind (asking for an `Axis` but reading a `DataRaw`).
//! - **`Value`**: Malformed structural input such as an empty array title, an unknown
//!   group type, a length that does not fit the 4-byte length prefix or an invalid
//!   configuration entry.
//! - **`Shape`**: Inconsistent array shapes inside the data model or on append.
//! - **`Node`**: Tree addressing failures in a storage file (unknown path, duplicate name).
//! - **`FeatureNotEnabled`**: A storage engine was requested that was not compiled in.
//!
//! Errors coming from the standard library, `bincode`, `figment` and the HDF5 library are
//! wrapped with `#[from]` so they propagate unmodified with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, ModaqError>;

#[derive(Error, Debug)]
pub enum ModaqError {
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Value error: {0}")]
    Value(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Node error: {0}")]
    Node(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid UTF-8 payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Persistence error: {0}")]
    Persist(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl ModaqError {
    /// Transport failure without an underlying OS error (peer closed, zero-length write).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Transport failure caused by an I/O error of the underlying stream.
    pub fn transport_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl From<figment::Error> for ModaqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = ModaqError::Type("expected Axis, got DataRaw".to_string());
        assert_eq!(err.to_string(), "Type error: expected Axis, got DataRaw");
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ModaqError::transport_io("send failed after 12 bytes", io);
        assert!(err.to_string().contains("send failed"));
        assert!(err.source().is_some());
        assert!(ModaqError::transport("closed").source().is_none());
    }
}
