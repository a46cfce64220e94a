//! Host imports for the wasm-re2 guest.
//!
//! The guest is a C library compiled to WebAssembly and imports only what its
//! libc and thread shim need from the host.
//!
//! # Imports
//!
//! - WASI preview-1: provided by `wasmtime-wasi`, with only stderr inherited
//! - [`threads`]: `wasi::thread-spawn` and `wasi::thread-block`, the two
//!   primitives behind guest-thread emulation
//!
//! [`linker::create_linker`] builds a linker with all of them registered.

pub mod linker;
pub mod threads;

pub use linker::{create_linker, register_all};
