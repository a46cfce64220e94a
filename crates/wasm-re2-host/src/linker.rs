//! Host import registration for Wasmtime linkers.
//!
//! This module provides functions to register the imports the guest needs:
//! the WASI preview-1 shim used by its libc, and the two thread-emulation
//! primitives.

use tracing::debug;
use wasm_re2_common::RuntimeError;
use wasm_re2_core::store::ContextState;
use wasmtime::{Engine, Linker};

use crate::threads::{THREAD_BLOCK, THREAD_MODULE, THREAD_SPAWN, thread_block, thread_spawn};

/// Create a linker with every host import registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_linker(engine: &Engine) -> Result<Linker<ContextState>, RuntimeError> {
    let mut linker = Linker::new(engine);
    register_all(&mut linker)?;
    Ok(linker)
}

/// Register all host imports on a linker.
///
/// This registers:
/// - `wasi_snapshot_preview1::*` - System interface used by the guest's libc
/// - `wasi::thread-spawn` / `wasi::thread-block` - Guest-thread emulation
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<ContextState>) -> Result<(), RuntimeError> {
    register_wasi(linker)?;
    register_threads(linker)?;
    debug!("Host imports registered");
    Ok(())
}

/// Register the WASI preview-1 functions.
pub fn register_wasi(linker: &mut Linker<ContextState>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, |state: &mut ContextState| {
        state.wasi_mut()
    })
    .map_err(|e| RuntimeError::invalid_config(format!("Failed to register WASI: {e}")))
}

/// Register the thread-emulation primitives.
///
/// Both use a single-`i32`-argument, single-`i32`-result calling convention:
/// - `thread-spawn(start_arg) -> tid`, negative on failure
/// - `thread-block(_) -> status`, returning only once the parent releases
///   the calling thread
pub fn register_threads(linker: &mut Linker<ContextState>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(THREAD_MODULE, THREAD_SPAWN, thread_spawn)
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register {THREAD_SPAWN}: {e}"))
        })?;

    linker
        .func_wrap(THREAD_MODULE, THREAD_BLOCK, thread_block)
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register {THREAD_BLOCK}: {e}"))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_re2_common::EngineConfig;
    use wasm_re2_core::WasmEngine;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_register_threads() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());

        assert!(register_threads(&mut linker).is_ok());
    }

    #[test]
    fn test_register_all() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());

        assert!(register_all(&mut linker).is_ok());
    }

    #[test]
    fn test_double_registration_fails() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());

        register_threads(&mut linker).unwrap();
        assert!(matches!(
            register_threads(&mut linker),
            Err(RuntimeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_linker_satisfies_wasi_imports() {
        let engine = engine();
        let linker = create_linker(engine.inner()).unwrap();
        let module = wasmtime::Module::new(
            engine.inner(),
            r#"(module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (import "wasi" "thread-spawn" (func (param i32) (result i32)))
                (memory (export "memory") 1))"#,
        )
        .unwrap();

        let mut store = wasmtime::Store::new(
            engine.inner(),
            ContextState::new(&wasm_re2_common::PoolConfig::default()),
        );
        assert!(linker.instantiate(&mut store, &module).is_ok());
    }
}
