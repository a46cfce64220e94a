//! Common types, errors, and configuration for wasm-re2.
//!
//! This crate provides shared functionality used across the wasm-re2 workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine and context pool
//! - Pattern compile flags

pub mod config;
pub mod config_file;
pub mod error;
pub mod options;

pub use config::{EngineConfig, OptLevel, PoolConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, PatternEntry};
pub use error::{PatternError, PatternErrorKind, RuntimeError, ThreadError};
pub use options::CompileOptions;
