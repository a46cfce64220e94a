//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the bridge. It is:
//! - Thread-safe and shared by every execution context
//! - Configured once per process (or per test) from [`EngineConfig`]
//! - Set up with the threads proposal when guest threads are enabled

use std::sync::Arc;

use tracing::{info, warn};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use wasm_re2_common::{EngineConfig, OptLevel, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] configured for the guest regex
/// engine. It holds no per-call state; every execution context creates its
/// own store against it.
///
/// # Configuration
///
/// - **Optimization level**: Cranelift opt level for the guest's machine code
/// - **Threads**: Shared memories and atomics, needed by guests built with
///   thread support
/// - **Pooling Allocator**: Optional pre-allocated instance slots; disabled
///   when threads are on, since shared memories cannot live in the pool
///
/// # Example
///
/// ```ignore
/// use wasm_re2_common::EngineConfig;
/// use wasm_re2_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    pooling: bool,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.cranelift_opt_level(match config.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });

        wasmtime_config.wasm_threads(config.guest_threads);

        let pooling = config.pooling_allocator && !config.guest_threads;
        if config.pooling_allocator && config.guest_threads {
            warn!("Pooling allocator disabled: incompatible with guest threads");
        }

        if pooling {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            guest_threads = config.guest_threads,
            opt_level = ?config.opt_level,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            pooling,
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if the pooling allocator is in effect.
    pub fn is_pooling_enabled(&self) -> bool {
        self.pooling
    }

    /// Check if the threads proposal is enabled.
    pub fn threads_enabled(&self) -> bool {
        self.config.guest_threads
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("opt_level", &self.config.opt_level)
            .field("guest_threads", &self.config.guest_threads)
            .field("pooling_allocator", &self.pooling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(engine.threads_enabled());
        assert!(!engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_creation_pooling() {
        let config = EngineConfig {
            pooling_allocator: true,
            guest_threads: false,
            max_instances: 8,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(engine.is_pooling_enabled());
        assert!(!engine.threads_enabled());
    }

    #[test]
    fn test_pooling_disabled_with_threads() {
        let config = EngineConfig {
            pooling_allocator: true,
            guest_threads: true,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(!engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_debug() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("guest_threads"));
    }
}
