//! Library configuration using Figment.
//!
//! Values are layered, highest precedence last:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `MODAQ_`, nested keys split on `__`
//!
//! ```text
//! MODAQ_STORAGE__BACKEND=hdf5
//! MODAQ_STORAGE__COMPRESSION_LEVEL=9
//! MODAQ_TRANSPORT__CHUNK_SIZE=65536
//! MODAQ_LOGGING__LEVEL=debug
//! ```

use crate::error::{AppResult, ModaqError};
use crate::h5::backend::{BackendKind, Compression, CompressionLibrary};
use crate::h5::saving::{SaveType, DEFAULT_FILE_TITLE, DEFAULT_RAW_GROUP};
use crate::tcpip::DEFAULT_CHUNK_SIZE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "MODAQ_";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub storage: StorageConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Storage file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Engine name (`tree` or `hdf5`)
    pub backend: String,
    /// Compression library (`zlib`, `gzip`, `bzip2`, `blosc` or `none`)
    pub compression: String,
    /// Compression level (0-9)
    pub compression_level: u8,
    pub raw_group_name: String,
    pub file_title: String,
    /// Kind of application writing the file
    pub save_type: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let compression = Compression::default();
        Self {
            backend: BackendKind::Tree.name().to_string(),
            compression: compression.library().name().to_string(),
            compression_level: compression.level(),
            raw_group_name: DEFAULT_RAW_GROUP.to_string(),
            file_title: DEFAULT_FILE_TITLE.to_string(),
            save_type: SaveType::Scan.name().to_string(),
        }
    }
}

impl StorageConfig {
    pub fn backend(&self) -> AppResult<BackendKind> {
        self.backend.parse()
    }

    pub fn compression(&self) -> AppResult<Compression> {
        let library: CompressionLibrary = self.compression.parse()?;
        Compression::new(library, self.compression_level)
    }

    pub fn save_type(&self) -> AppResult<SaveType> {
        self.save_type.parse()
    }
}

/// Socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound of bytes requested per read call
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl IoConfig {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(IoConfig::default()))
    }

    /// Defaults overridden by `MODAQ_` environment variables.
    pub fn load() -> AppResult<Self> {
        let config: Self = Self::figment()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the TOML file at `path` (skipped when missing), then the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that cannot be expressed in the types.
    pub fn validate(&self) -> AppResult<()> {
        self.storage.backend()?;
        self.storage.save_type()?;
        self.storage.compression()?;

        if self.transport.chunk_size == 0 {
            return Err(ModaqError::Value(
                "transport.chunk_size must be at least 1".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ModaqError::Value(format!(
                "invalid log level '{}', expected one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = IoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend().unwrap(), BackendKind::Tree);
        assert_eq!(config.storage.compression().unwrap(), Compression::default());
        assert_eq!(config.storage.raw_group_name, "RawData");
        assert_eq!(config.transport.chunk_size, 4096);
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "modaq.toml",
                r#"
                [storage]
                compression = "blosc"
                compression_level = 3
                save_type = "logger"

                [transport]
                chunk_size = 1024
                "#,
            )?;
            jail.set_env("MODAQ_TRANSPORT__CHUNK_SIZE", "65536");
            jail.set_env("MODAQ_LOGGING__LEVEL", "debug");

            let config = IoConfig::load_from("modaq.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.storage.compression, "blosc");
            assert_eq!(config.storage.compression_level, 3);
            assert_eq!(config.storage.save_type().unwrap(), SaveType::Logger);
            assert_eq!(config.storage.backend, "tree");
            assert_eq!(config.transport.chunk_size, 65536);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values() {
        let mut config = IoConfig::default();
        config.storage.compression_level = 12;
        assert!(matches!(config.validate(), Err(ModaqError::Value(_))));

        let mut config = IoConfig::default();
        config.storage.backend = "netcdf".to_string();
        assert!(matches!(config.validate(), Err(ModaqError::Value(_))));

        let mut config = IoConfig::default();
        config.transport.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ModaqError::Value(_))));

        let mut config = IoConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ModaqError::Value(_))));
    }

    #[test]
    fn test_env_rejects_bad_compression_level() {
        Jail::expect_with(|jail| {
            jail.set_env("MODAQ_STORAGE__COMPRESSION_LEVEL", "10");
            assert!(matches!(IoConfig::load(), Err(ModaqError::Value(_))));
            Ok(())
        });
    }
}
