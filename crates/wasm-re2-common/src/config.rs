//! Configuration structures for wasm-re2.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine and guest module settings
//! - [`PoolConfig`]: Execution context pool and per-context limits

use serde::{Deserialize, Serialize};

use crate::CompileOptions;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for an engine.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Execution context pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Flags applied by `compile` when none are given explicitly.
    #[serde(default)]
    pub compile: CompileOptions,
}

/// Cranelift optimization level used to compile the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations; fastest compile.
    None,
    /// Optimize for execution speed.
    #[default]
    Speed,
    /// Optimize for speed and code size.
    SpeedAndSize,
}

/// Wasmtime engine configuration.
///
/// These settings affect how the guest module is compiled and how
/// its instances are allocated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to the guest module (`.wasm`).
    #[serde(default)]
    pub guest_path: Option<String>,

    /// Cranelift optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Enable the WebAssembly threads proposal.
    ///
    /// Required for guests that import a shared memory and for the
    /// guest-thread emulation.
    #[serde(default = "defaults::guest_threads")]
    pub guest_threads: bool,

    /// Enable pooling allocator for instance creation.
    ///
    /// Ignored when `guest_threads` is enabled.
    #[serde(default)]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Cache compiled guest artifacts on disk.
    #[serde(default)]
    pub cache_compiled_modules: bool,

    /// Directory for compiled module cache.
    ///
    /// Only effective when `cache_compiled_modules` is enabled.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guest_path: None,
            opt_level: OptLevel::default(),
            guest_threads: defaults::guest_threads(),
            pooling_allocator: false,
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: false,
            cache_dir: None,
        }
    }
}

/// Execution context pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Contexts instantiated when the pool is created.
    ///
    /// At least one context is always instantiated so that import
    /// resolution failures surface at startup.
    #[serde(default = "defaults::prewarm_contexts")]
    pub prewarm_contexts: u32,

    /// Maximum idle contexts kept for reuse; extra ones are torn down.
    #[serde(default = "defaults::max_idle_contexts")]
    pub max_idle_contexts: u32,

    /// Minimum size of a context's scratch arena in bytes.
    #[serde(default = "defaults::arena_min_bytes")]
    pub arena_min_bytes: u32,

    /// Maximum linear memory per context in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prewarm_contexts: defaults::prewarm_contexts(),
            max_idle_contexts: defaults::max_idle_contexts(),
            arena_min_bytes: defaults::arena_min_bytes(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl PoolConfig {
    /// Get the per-context memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn guest_threads() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn prewarm_contexts() -> u32 {
        1
    }

    pub const fn max_idle_contexts() -> u32 {
        64
    }

    pub const fn arena_min_bytes() -> u32 {
        4096
    }

    pub const fn max_memory_mb() -> u32 {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(config.engine.guest_path.is_none());
        assert_eq!(config.engine.opt_level, OptLevel::Speed);
        assert!(config.engine.guest_threads);
        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert!(!config.engine.cache_compiled_modules);

        assert_eq!(config.pool.prewarm_contexts, 1);
        assert_eq!(config.pool.max_idle_contexts, 64);
        assert_eq!(config.pool.arena_min_bytes, 4096);
        assert_eq!(config.pool.max_memory_mb, 256);
        assert!(config.compile.is_default());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(
            config.pool.max_idle_contexts,
            deserialized.pool.max_idle_contexts
        );
    }

    #[test]
    fn test_max_memory_bytes() {
        let config = PoolConfig {
            max_memory_mb: 2,
            ..Default::default()
        };

        assert_eq!(config.max_memory_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"opt_level": "none"}, "compile": {"longest": true}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set values
        assert_eq!(config.engine.opt_level, OptLevel::None);
        assert!(config.compile.longest);
        // Default values for unspecified fields
        assert!(config.engine.guest_threads);
        assert_eq!(config.pool.prewarm_contexts, 1);
    }
}
