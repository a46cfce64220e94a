//! Guest-thread emulation.
//!
//! Guests built with thread support create threads by calling the host's
//! `wasi::thread-spawn` import. The host answers with a new child context that
//! shares the parent's [`SharedMemory`] and runs `wasi_thread_start(tid, arg)`
//! on its own OS thread.
//!
//! Lifecycle is coordinated purely through message passing:
//!
//! 1. The parent parks a oneshot identity sender in its store before calling
//!    the guest's `wasi_start_thread` export.
//! 2. `thread-spawn` moves that sender, plus the receiving end of a second
//!    oneshot exit channel, into the child's store.
//! 3. The child's `wasi::thread-block` import sends the child's identity, then
//!    waits for the exit signal.
//! 4. [`GuestThread::release`] sends the exit signal and joins the OS thread,
//!    so the parent never reclaims a child that has not exited.
//!
//! This is the only concurrency primitive offered to the guest.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use wasmtime::{Engine, Linker, Module, SharedMemory, Store};

use crate::store::ContextState;
use wasm_re2_common::{PoolConfig, RuntimeError, ThreadError};

/// Guest export run on a child's OS thread.
pub const THREAD_ENTRY: &str = "wasi_thread_start";

/// Everything needed to instantiate children of one context.
#[derive(Clone)]
pub struct ThreadSupport {
    pub(crate) engine: Engine,
    pub(crate) module: Module,
    pub(crate) linker: Linker<ContextState>,
    pub(crate) memory: SharedMemory,
    pub(crate) memory_import: (String, String),
    pub(crate) next_tid: Arc<AtomicU32>,
    pub(crate) pool_config: PoolConfig,
}

impl ThreadSupport {
    /// Instantiate a child sharing this context's memory and start it.
    ///
    /// `identity` is the parent's pending rendezvous channel, if any; without
    /// one the child runs detached and its identity is not reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be instantiated, lacks the thread
    /// entry export, or the OS thread cannot be created.
    pub fn spawn_child(
        &self,
        start_arg: i32,
        identity: Option<oneshot::Sender<u32>>,
    ) -> Result<GuestThread, RuntimeError> {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed) + 1;
        let (exit_tx, exit_rx) = oneshot::channel();

        let state = ContextState::child(
            self,
            tid,
            Rendezvous {
                tid,
                identity,
                exit: exit_rx,
            },
        );
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);

        let (module_name, field) = &self.memory_import;
        let mut linker = self.linker.clone();
        linker
            .define(&store, module_name, field, self.memory.clone())
            .map_err(|e| spawn_failed(format!("defining shared memory: {e}")))?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| spawn_failed(format!("instantiating child: {e}")))?;

        let entry = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, THREAD_ENTRY)
            .map_err(|_| RuntimeError::missing_export(THREAD_ENTRY))?;

        #[allow(clippy::cast_possible_wrap)]
        let join = std::thread::Builder::new()
            .name(format!("wasm-re2-guest-{tid}"))
            .spawn(move || {
                entry
                    .call(&mut store, (tid as i32, start_arg))
                    .map_err(|e| e.to_string())
            })
            .map_err(|e| spawn_failed(format!("starting OS thread: {e}")))?;

        debug!(tid, start_arg, "Guest thread spawned");

        Ok(GuestThread {
            tid,
            exit: Some(exit_tx),
            join: Some(join),
        })
    }
}

impl std::fmt::Debug for ThreadSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSupport")
            .field("memory_import", &self.memory_import)
            .finish_non_exhaustive()
    }
}

/// Child side of the spawn rendezvous.
#[derive(Debug)]
pub struct Rendezvous {
    tid: u32,
    identity: Option<oneshot::Sender<u32>>,
    exit: oneshot::Receiver<()>,
}

impl Rendezvous {
    /// Report this child's identity, then block until the parent releases it.
    ///
    /// Must be called from the child's OS thread, never from inside an async
    /// runtime.
    pub fn arrive(self) -> u32 {
        if let Some(identity) = self.identity {
            // The parent may have given up waiting; the child still parks.
            let _ = identity.send(self.tid);
        }
        // A dropped sender is an exit signal as well.
        let _ = self.exit.blocking_recv();
        debug!(tid = self.tid, "Guest thread released");
        self.tid
    }
}

/// Parent-side handle of a spawned child.
#[derive(Debug)]
pub struct GuestThread {
    tid: u32,
    exit: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<Result<(), String>>>,
}

impl GuestThread {
    /// Identity assigned by `thread-spawn`.
    pub fn tid(&self) -> u32 {
        self.tid
    }

    /// Signal exit and wait for the child's OS thread to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the child trapped or panicked.
    pub fn release(mut self) -> Result<(), RuntimeError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), RuntimeError> {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(());
        }

        let Some(join) = self.join.take() else {
            return Ok(());
        };

        let outcome = match join.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ThreadError::ChildFailed {
                tid: self.tid,
                message,
            }),
            Err(_) => Err(ThreadError::ChildFailed {
                tid: self.tid,
                message: "thread panicked".into(),
            }),
        };

        outcome.map_err(RuntimeError::from)
    }
}

impl Drop for GuestThread {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(tid = self.tid, error = %e, "Guest thread ended with an error");
        }
    }
}

fn spawn_failed(reason: String) -> RuntimeError {
    ThreadError::SpawnFailed { reason }.into()
}
