//! The engine object threaded through all pattern operations.
//!
//! This module provides [`Re2Engine`], which holds the compiled guest, the
//! context pool and a registry of named patterns. Several engines can coexist
//! in one process; none of them shares state with another.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use wasm_re2_common::{CompileOptions, ConfigFile, PatternEntry, RuntimeConfig, RuntimeError};
use wasm_re2_core::{
    ContextFactory, ContextPool, Export, GuestModule, PoolStats, WasmEngine, abi,
};
use wasm_re2_host::create_linker;

use crate::pattern::Pattern;

/// Engine context for compiling and running patterns in the guest.
///
/// Cheap to clone; clones share the pool and the pattern registry.
#[derive(Clone)]
pub struct Re2Engine {
    /// Wasmtime engine the guest was compiled with.
    engine: WasmEngine,

    /// Compiled guest module.
    module: GuestModule,

    /// Execution contexts.
    pool: ContextPool,

    /// Flags used by [`compile`](Self::compile).
    default_options: CompileOptions,

    /// Named patterns (name -> Pattern).
    patterns: Arc<DashMap<String, Arc<Pattern>>>,
}

impl Re2Engine {
    /// Create an engine from the guest at `config.engine.guest_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if no guest path is configured, the guest fails to
    /// load, lacks a required export or cannot be instantiated.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let path = config
            .engine
            .guest_path
            .as_deref()
            .ok_or_else(|| RuntimeError::invalid_config("engine.guest_path is not set"))?;

        let engine = WasmEngine::new(&config.engine)?;
        let module = GuestModule::from_file(&engine, path)?;
        Self::with_module(config, engine, module)
    }

    /// Create an engine from guest bytes.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_bytes(config: &RuntimeConfig, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = GuestModule::from_bytes(engine.inner(), bytes)?;
        Self::with_module(config, engine, module)
    }

    /// Create an engine from guest WAT text.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_wat(config: &RuntimeConfig, wat: &str) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = GuestModule::from_wat(engine.inner(), wat)?;
        Self::with_module(config, engine, module)
    }

    /// Create an engine from a configuration file and compile its patterns.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new) and [`load_patterns`](Self::load_patterns).
    pub fn from_config_file(file: &ConfigFile) -> Result<Self, RuntimeError> {
        let engine = Self::new(&file.runtime)?;
        engine.load_patterns(&file.patterns)?;
        Ok(engine)
    }

    fn with_module(
        config: &RuntimeConfig,
        engine: WasmEngine,
        module: GuestModule,
    ) -> Result<Self, RuntimeError> {
        module.verify_exports(Export::required_names())?;

        let linker = create_linker(engine.inner())?;
        let factory = ContextFactory::new(&engine, &module, linker, config.pool.clone());
        let pool = ContextPool::new(factory)?;

        info!(
            content_hash = %module.content_hash(),
            threads = module.imports_shared_memory(),
            "Re2 engine ready"
        );

        Ok(Self {
            engine,
            module,
            pool,
            default_options: config.compile,
            patterns: Arc::new(DashMap::new()),
        })
    }

    /// Get the compiled guest module.
    pub fn compiled_module(&self) -> &GuestModule {
        &self.module
    }

    /// Get the Wasmtime engine.
    pub fn wasm_engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the context pool.
    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Flags used by [`compile`](Self::compile).
    pub fn default_options(&self) -> CompileOptions {
        self.default_options
    }

    /// Compile `pattern` with the engine's default flags.
    ///
    /// # Errors
    ///
    /// Invalid syntax is [`RuntimeError::InvalidPattern`]; anything else is a
    /// context or guest failure.
    pub fn compile(&self, pattern: &str) -> Result<Pattern, RuntimeError> {
        self.compile_bytes(pattern.as_bytes(), self.default_options)
    }

    /// Compile `pattern` with explicit flags.
    ///
    /// # Errors
    ///
    /// See [`compile`](Self::compile).
    pub fn compile_with(
        &self,
        pattern: &str,
        options: CompileOptions,
    ) -> Result<Pattern, RuntimeError> {
        self.compile_bytes(pattern.as_bytes(), options)
    }

    /// Compile a pattern given as raw bytes (UTF-8, or Latin-1 with
    /// [`CompileOptions::latin1`]).
    ///
    /// # Errors
    ///
    /// See [`compile`](Self::compile).
    #[instrument(skip(self, pattern), fields(len = pattern.len()))]
    pub fn compile_bytes(
        &self,
        pattern: &[u8],
        options: CompileOptions,
    ) -> Result<Pattern, RuntimeError> {
        let mut context = self.pool.checkout()?;
        let raw = abi::compile(&mut context, pattern, &options)?;
        Ok(Pattern::new(raw, pattern.to_vec(), options, context))
    }

    /// Register a pattern under `name`, replacing any previous one.
    pub fn register(&self, name: &str, pattern: Pattern) -> Arc<Pattern> {
        let pattern = Arc::new(pattern);
        self.patterns.insert(name.to_string(), pattern.clone());
        pattern
    }

    /// Get a registered pattern.
    pub fn get(&self, name: &str) -> Option<Arc<Pattern>> {
        self.patterns.get(name).map(|v| v.clone())
    }

    /// Remove a pattern from the registry.
    ///
    /// The pattern is released once the last reference to it is dropped.
    pub fn unregister(&self, name: &str) -> Option<Arc<Pattern>> {
        self.patterns.remove(name).map(|(_, v)| v)
    }

    /// List all registered pattern names.
    pub fn pattern_names(&self) -> Vec<String> {
        self.patterns.iter().map(|r| r.key().clone()).collect()
    }

    /// Compile and register every entry. Entries without options use the
    /// engine's default flags.
    ///
    /// Returns the number of patterns registered.
    ///
    /// # Errors
    ///
    /// Stops at the first entry that fails to compile; earlier entries stay
    /// registered.
    pub fn load_patterns(&self, entries: &[PatternEntry]) -> Result<usize, RuntimeError> {
        for entry in entries {
            let options = entry.options.unwrap_or(self.default_options);
            let pattern = self.compile_with(&entry.pattern, options).inspect_err(|e| {
                warn!(name = %entry.name, error = %e, "Failed to compile configured pattern");
            })?;
            self.register(&entry.name, pattern);
        }

        info!(count = entries.len(), "Configured patterns loaded");
        Ok(entries.len())
    }

    /// Current pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Tear down every idle context. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        self.pool.drain()
    }

    /// Release every registered pattern and close the pool.
    ///
    /// Patterns still referenced elsewhere are released too; later calls on
    /// them fail with [`RuntimeError::PatternReleased`].
    pub fn shutdown(&self) {
        let names = self.pattern_names();
        for name in &names {
            let Some(pattern) = self.unregister(name) else {
                continue;
            };
            if let Err(e) = pattern.release() {
                warn!(name = %name, error = %e, "Failed to release pattern at shutdown");
            }
        }

        let drained = self.pool.close();
        info!(patterns = names.len(), drained, "Re2 engine shut down");
    }
}

impl std::fmt::Debug for Re2Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Re2Engine")
            .field("content_hash", &self.module.content_hash())
            .field("patterns_count", &self.patterns.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
