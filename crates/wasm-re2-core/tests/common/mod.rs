//! Shared fixtures for the wasm-re2-core integration tests.

#![allow(dead_code)]

use wasm_re2_common::{EngineConfig, PoolConfig};
use wasm_re2_core::{ContextFactory, ExecutionContext, GuestModule, WasmEngine};
use wasm_re2_host::create_linker;

/// Literal-substring stand-in for the cre2 guest.
pub const LITERAL_ENGINE: &str = include_str!("../fixtures/literal_engine.wat");

/// Shared-memory guest driving thread-spawn/thread-block.
pub const GUEST_THREADS: &str = include_str!("../fixtures/guest_threads.wat");

/// Bookkeeping cells of the literal engine.
pub const INITIALIZED: u32 = 12;
pub const FREES: u32 = 16;
pub const DELETES: u32 = 20;
pub const ITER_DELETES: u32 = 24;
pub const MALLOCS: u32 = 28;
pub const LAST_OPTIONS_PTR: u32 = 40;
pub const LAST_OPTIONS: u32 = 48;

pub fn factory(wat: &str) -> ContextFactory {
    factory_with(wat, PoolConfig::default())
}

pub fn factory_with(wat: &str, pool: PoolConfig) -> ContextFactory {
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    let module = GuestModule::from_wat(engine.inner(), wat).unwrap();
    let linker = create_linker(engine.inner()).unwrap();
    ContextFactory::new(&engine, &module, linker, pool)
}

pub fn literal_context() -> ExecutionContext {
    factory(LITERAL_ENGINE).instantiate().unwrap()
}
