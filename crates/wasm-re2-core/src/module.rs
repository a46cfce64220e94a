//! Guest module compilation and caching.
//!
//! This module provides [`GuestModule`], a wrapper around Wasmtime's [`Module`]
//! holding the compiled guest engine. It is compiled once and shared
//! read-only by every execution context.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at startup
//! - **AOT**: Load a serialized artifact, optionally from the on-disk cache
//!   keyed by the content hash of the original bytes

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Engine, ExternType, Module};

use crate::WasmEngine;
use wasm_re2_common::RuntimeError;

/// The compiled guest module.
///
/// # Thread Safety
///
/// `GuestModule` is cheap to clone and safe to share across threads; the
/// underlying Wasmtime module is reference counted.
#[derive(Clone)]
pub struct GuestModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl GuestModule {
    /// Compile the guest from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::module_load(format!("Guest module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Guest module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile the guest from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let module = Module::new(engine, wat)
            .map_err(|e| RuntimeError::module_load(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());
        debug!(content_hash = %content_hash, "WAT guest compiled");

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Load the guest from a `.wasm` file.
    ///
    /// When the engine has `cache_compiled_modules` enabled with a
    /// `cache_dir`, a `{content_hash}.cwasm` artifact is loaded from the cache
    /// if present, and written after a fresh compile otherwise. Cache write
    /// failures are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &WasmEngine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            RuntimeError::module_load(format!("Failed to read {}: {e}", path.display()))
        })?;

        let Some(cache_dir) = Self::cache_dir(engine) else {
            return Self::from_bytes(engine.inner(), &bytes);
        };

        let content_hash = compute_hash(&bytes);
        let artifact = cache_dir.join(format!("{content_hash}.cwasm"));

        if artifact.is_file() {
            match Self::from_precompiled(engine.inner(), &artifact) {
                Ok(module) => return Ok(module),
                Err(e) => warn!(error = %e, "Ignoring unusable cached artifact"),
            }
        }

        let module = Self::from_bytes(engine.inner(), &bytes)?;
        if let Err(e) = module.write_artifact(&cache_dir, &artifact) {
            warn!(
                artifact = %artifact.display(),
                error = %e,
                "Failed to write compiled guest to cache"
            );
        }

        Ok(module)
    }

    /// Load a pre-compiled guest from disk.
    ///
    /// # Safety
    ///
    /// This deserializes machine code. Only load artifacts produced by
    /// [`GuestModule::serialize`] with the same Wasmtime version and engine
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: artifacts come from our own serialize() via the cache directory
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            RuntimeError::module_load(format!(
                "Failed to load precompiled guest from {}: {e}",
                path.display()
            ))
        })?;

        // Extract hash from filename convention: {hash}.cwasm
        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled guest loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Serialize the compiled guest for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, RuntimeError> {
        self.inner
            .serialize()
            .map_err(|e| RuntimeError::module_load(format!("Guest serialization failed: {e}")))
    }

    /// Check that every name in `names` is exported as a function.
    ///
    /// This is a static check against the module's export section; nothing is
    /// instantiated or resolved.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingExport`] for the first missing name.
    pub fn verify_exports<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), RuntimeError> {
        for name in names {
            match self.inner.get_export(name) {
                Some(ExternType::Func(_)) => {}
                _ => return Err(RuntimeError::missing_export(name)),
            }
        }
        Ok(())
    }

    /// Returns `true` if the guest imports a shared linear memory.
    pub fn imports_shared_memory(&self) -> bool {
        self.inner
            .imports()
            .any(|import| matches!(import.ty(), ExternType::Memory(ty) if ty.is_shared()))
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    fn cache_dir(engine: &WasmEngine) -> Option<PathBuf> {
        let config = engine.config();
        if !config.cache_compiled_modules {
            return None;
        }
        config.cache_dir.as_ref().map(PathBuf::from)
    }

    fn write_artifact(&self, cache_dir: &Path, artifact: &Path) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(cache_dir)?;
        std::fs::write(artifact, self.serialize()?)?;
        debug!(artifact = %artifact.display(), "Compiled guest cached");
        Ok(())
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::module_load("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::module_load("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
