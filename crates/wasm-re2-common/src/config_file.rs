//! Configuration file structures for wasm-re2.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`PatternEntry`]: Pre-compiled pattern definition

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CompileOptions, RuntimeConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// guest_path = "./guest/libcre2.wasm"
/// cache_compiled_modules = true
/// cache_dir = "./cache"
///
/// [runtime.pool]
/// prewarm_contexts = 4
/// max_idle_contexts = 32
///
/// [runtime.compile]
/// case_insensitive = true
///
/// [[patterns]]
/// name = "date"
/// pattern = '(?P<year>\d+)-(?P<month>\d+)'
///
/// [[patterns]]
/// name = "word"
/// pattern = '\w+'
/// options = { longest = true }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + pool + default flags).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Patterns to compile at startup.
    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Config file read");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// A pattern to compile at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternEntry {
    /// Registry name for the compiled pattern.
    pub name: String,

    /// Pattern source.
    pub pattern: String,

    /// Compile flags; falls back to `runtime.compile` when absent.
    #[serde(default)]
    pub options: Option<CompileOptions>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.runtime.engine.guest_path.is_none());
        assert!(config.patterns.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [runtime.engine]
            guest_path = "./libcre2.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(
            config.runtime.engine.guest_path.as_deref(),
            Some("./libcre2.wasm")
        );
        // Defaults applied
        assert_eq!(config.runtime.pool.prewarm_contexts, 1);
        assert!(config.runtime.engine.guest_threads);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            guest_path = "./libcre2.wasm"
            opt_level = "speed_and_size"
            guest_threads = false
            pooling_allocator = true
            max_instances = 200

            [runtime.pool]
            prewarm_contexts = 4
            max_idle_contexts = 8
            arena_min_bytes = 65536

            [runtime.compile]
            case_insensitive = true

            [[patterns]]
            name = "date"
            pattern = '(?P<year>\d+)-(?P<month>\d+)'

            [[patterns]]
            name = "word"
            pattern = '\w+'
            options = { longest = true }
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(
            config.runtime.engine.opt_level,
            crate::config::OptLevel::SpeedAndSize
        );
        assert!(!config.runtime.engine.guest_threads);
        assert!(config.runtime.engine.pooling_allocator);
        assert_eq!(config.runtime.engine.max_instances, 200);
        assert_eq!(config.runtime.pool.prewarm_contexts, 4);
        assert_eq!(config.runtime.pool.max_idle_contexts, 8);
        assert_eq!(config.runtime.pool.arena_min_bytes, 65536);
        assert!(config.runtime.compile.case_insensitive);

        assert_eq!(config.patterns.len(), 2);
        assert_eq!(config.patterns[0].name, "date");
        assert_eq!(config.patterns[0].pattern, r"(?P<year>\d+)-(?P<month>\d+)");
        assert!(config.patterns[0].options.is_none());
        assert_eq!(
            config.patterns[1].options,
            Some(CompileOptions::new().with_longest(true))
        );
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/nonexistent/wasm-re2.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
