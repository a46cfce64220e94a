//! RE2 regular expressions executed in a sandboxed WebAssembly guest.
//!
//! The matching engine is the cre2 C binding of RE2 compiled to WebAssembly.
//! This crate loads it once, runs it in pooled execution contexts and exposes
//! compiled patterns as ordinary host objects.
//!
//! # Example
//!
//! ```no_run
//! use wasm_re2::{CompileOptions, Re2Engine, RuntimeConfig};
//!
//! let mut config = RuntimeConfig::default();
//! config.engine.guest_path = Some("./guest/libcre2.wasm".into());
//!
//! let engine = Re2Engine::new(&config)?;
//! let date = engine.compile(r"(?P<year>\d+)-(?P<month>\d+)")?;
//!
//! assert_eq!(date.find("on 2024-05")?, Some(3..10));
//! assert_eq!(
//!     date.group_names()?,
//!     vec![("year".to_string(), 1), ("month".to_string(), 2)]
//! );
//!
//! let digits = engine.compile_with(r"\d", CompileOptions::new().with_longest(true))?;
//! assert_eq!(digits.replace_all("a1b2c3", "")?, (b"abc".to_vec(), true));
//!
//! engine.shutdown();
//! # Ok::<(), wasm_re2::RuntimeError>(())
//! ```
//!
//! # Crates
//!
//! - `wasm-re2-common`: errors, configuration and compile flags
//! - `wasm-re2-core`: engine, contexts, pool, arena and the guest ABI
//! - `wasm-re2-host`: host imports the guest links against

pub mod engine;
pub mod named_groups;
pub mod pattern;

pub use engine::Re2Engine;
pub use named_groups::NamedGroups;
pub use pattern::Pattern;

pub use wasm_re2_common::{
    CompileOptions, ConfigFile, EngineConfig, PatternEntry, PatternError, PatternErrorKind,
    PoolConfig, RuntimeConfig, RuntimeError,
};
pub use wasm_re2_core::{Anchor, PoolStats, Span};
