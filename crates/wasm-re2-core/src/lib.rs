//! Sandboxed execution bridge for the wasm-re2 guest.
//!
//! This crate hosts a precompiled RE2 (cre2) WebAssembly module and drives it
//! through its C export table:
//! - [`WasmEngine`] / [`GuestModule`]: Engine configuration and the compiled guest
//! - [`ExecutionContext`]: One instantiation with private linear memory
//! - [`ContextPool`]: Hands out contexts for exclusive use, one call at a time
//! - [`Arena`]: Per-call scratch space in guest memory
//! - [`codec`] / [`abi`]: The binary ABI and the call sequences built on it
//! - [`threads`]: Guest-initiated thread emulation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              WasmEngine + GuestModule                   │
//! │  (Compiled once, shared read-only)                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ContextPool                         │
//! │  (Checkout never blocks; creates on a miss)             │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │       ExecutionContext = Store<ContextState>            │
//! │  - Private linear memory                                │
//! │  - Lazily resolved SymbolTable                          │
//! │  - Scratch Arena                                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod arena;
pub mod codec;
pub mod context;
pub mod engine;
pub mod memory;
pub mod module;
pub mod pool;
pub mod store;
pub mod symbols;
pub mod threads;

pub use abi::{Anchor, RawPattern};
pub use arena::Arena;
pub use codec::{ByteString, Span};
pub use context::{ContextFactory, ExecutionContext};
pub use engine::WasmEngine;
pub use memory::GuestMemory;
pub use module::GuestModule;
pub use pool::{ContextPool, PoolStats, PooledContext};
pub use store::{ContextMetrics, ContextState};
pub use symbols::{Export, SymbolTable};
pub use threads::{GuestThread, Rendezvous, ThreadSupport};
