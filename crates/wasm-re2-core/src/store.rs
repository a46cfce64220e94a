//! Per-context store state.
//!
//! This module provides:
//! - [`ContextState`]: Store data of one guest instantiation, reachable from
//!   host functions through [`wasmtime::Caller`]
//! - [`ContextMetrics`]: Call counters for a context

use std::time::{Duration, Instant};

use uuid::Uuid;
use wasmtime::{StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::threads::{GuestThread, Rendezvous, ThreadSupport};
use wasm_re2_common::PoolConfig;

/// Store data for one execution context.
///
/// # Contents
///
/// - `wasi`: WASI preview-1 context backing the guest's system-interface imports
/// - `limits`: Memory growth limits
/// - `context_id`: Identifier used in tracing
/// - thread emulation state: spawn support, the pending identity channel of a
///   spawn in progress, the child-side rendezvous and the spawned children
pub struct ContextState {
    /// WASI context for the guest's libc.
    wasi: WasiP1Ctx,

    /// Memory growth limits.
    pub(crate) limits: StoreLimits,

    /// Unique context identifier for tracing.
    pub context_id: Uuid,

    /// Guest thread identity; `0` for a pool context.
    pub thread_id: u32,

    /// Call counters.
    pub metrics: ContextMetrics,

    /// Present when the guest imports a shared memory.
    pub(crate) threads: Option<ThreadSupport>,

    /// Set by the parent while it waits for a child to rendezvous.
    pub(crate) pending_identity: Option<tokio::sync::oneshot::Sender<u32>>,

    /// Child side of the rendezvous; taken by `thread-block`.
    pub(crate) rendezvous: Option<Rendezvous>,

    /// Children spawned from this context.
    pub(crate) children: Vec<GuestThread>,

    created_at: Instant,
}

/// Execution counters for one context.
#[derive(Debug, Clone, Default)]
pub struct ContextMetrics {
    /// Guest exports invoked.
    pub calls: u64,

    /// Times the scratch arena was reallocated.
    pub arena_growths: u64,

    /// Guest threads spawned.
    pub threads_spawned: u64,
}

impl ContextState {
    /// Create state for a pool context.
    pub fn new(config: &PoolConfig) -> Self {
        // The guest only needs stderr for RE2's error log
        let wasi = WasiCtxBuilder::new().inherit_stderr().build_p1();
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        Self {
            wasi,
            limits,
            context_id: Uuid::new_v4(),
            thread_id: 0,
            metrics: ContextMetrics::default(),
            threads: None,
            pending_identity: None,
            rendezvous: None,
            children: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Create state for a child thread context.
    pub(crate) fn child(
        parent: &ThreadSupport,
        thread_id: u32,
        rendezvous: Rendezvous,
    ) -> Self {
        let mut state = Self::new(&parent.pool_config);
        state.thread_id = thread_id;
        state.threads = Some(parent.clone());
        state.rendezvous = Some(rendezvous);
        state
    }

    /// Get the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Returns `true` if this context can spawn guest threads.
    pub fn supports_threads(&self) -> bool {
        self.threads.is_some()
    }

    /// Get a handle for spawning children of this context.
    pub fn thread_support(&self) -> Option<ThreadSupport> {
        self.threads.clone()
    }

    /// Take the identity channel of a parent waiting for a spawn.
    pub fn take_pending_identity(&mut self) -> Option<tokio::sync::oneshot::Sender<u32>> {
        self.pending_identity.take()
    }

    /// Take the child-side rendezvous.
    pub fn take_rendezvous(&mut self) -> Option<Rendezvous> {
        self.rendezvous.take()
    }

    /// Record a child spawned from this context.
    pub fn adopt_child(&mut self, child: GuestThread) {
        self.metrics.threads_spawned += 1;
        self.children.push(child);
    }

    /// Number of live children spawned from this context.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Get elapsed time since the context was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
