//! Execution contexts.
//!
//! An [`ExecutionContext`] is one instantiation of the guest: its own store,
//! private linear memory, symbol table and scratch arena. Guest execution is
//! not reentrant, so every operation takes `&mut self` and a context is only
//! ever driven by one caller at a time.
//!
//! Fatal errors poison the context. A poisoned context refuses further calls
//! and is discarded by the pool instead of being reused.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use wasmtime::{
    Extern, ExternType, Instance, Linker, Memory, SharedMemory, Store, WasmParams, WasmResults,
};

use crate::arena::Arena;
use crate::codec::ByteString;
use crate::memory::GuestMemory;
use crate::module::GuestModule;
use crate::store::ContextState;
use crate::symbols::{Export, SymbolTable};
use crate::threads::ThreadSupport;
use crate::WasmEngine;
use wasm_re2_common::{PoolConfig, RuntimeError, ThreadError};

/// One instantiation of the guest module.
pub struct ExecutionContext {
    store: Store<ContextState>,
    memory: GuestMemory,
    symbols: SymbolTable,
    arena: Arena,
    arena_floor: u32,
    poisoned: bool,
}

impl ExecutionContext {
    /// Identifier used in tracing.
    pub fn id(&self) -> Uuid {
        self.store.data().context_id
    }

    /// Store data of this context.
    pub fn state(&self) -> &ContextState {
        self.store.data()
    }

    /// Symbol table of this context.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Scratch arena bookkeeping.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Linear memory of this context.
    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    /// Current size of the linear memory in bytes.
    pub fn memory_size(&self) -> u64 {
        self.memory.size(&self.store)
    }

    /// Returns `true` once a fatal error has been observed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the context unusable.
    pub fn poison(&mut self) {
        if !self.poisoned {
            warn!(context_id = %self.id(), "Execution context poisoned");
        }
        self.poisoned = true;
    }

    /// Invoke a guest export.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ContextPoisoned`] on a poisoned context, a
    /// resolution error if the export is missing or mistyped, and
    /// [`RuntimeError::Trap`] if the guest traps. All of these poison the
    /// context.
    pub fn call<P, R>(&mut self, export: Export, params: P) -> Result<R, RuntimeError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.ensure_usable()?;

        let func = self.symbols.typed::<P, R>(&mut self.store, export);
        let func = self.guard(func)?;

        self.store.data_mut().metrics.calls += 1;
        let result = func
            .call(&mut self.store, params)
            .map_err(|e| RuntimeError::trap(export.name(), trap_message(&e)));
        self.guard(result)
    }

    /// Returns `true` if the guest exports `export` as a function.
    pub fn has_export(&mut self, export: Export) -> bool {
        self.symbols.lookup(&mut self.store, export).is_some()
    }

    /// Allocate `size` bytes from the guest heap.
    ///
    /// # Errors
    ///
    /// A null result is [`RuntimeError::GuestAllocationFailed`].
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn malloc(&mut self, size: u32) -> Result<u32, RuntimeError> {
        let ptr = self.call::<i32, i32>(Export::Malloc, size as i32)? as u32;
        if ptr == 0 {
            return self.guard(Err(RuntimeError::GuestAllocationFailed { size }));
        }
        Ok(ptr)
    }

    /// Return `ptr` to the guest heap.
    #[allow(clippy::cast_possible_wrap)]
    pub fn free(&mut self, ptr: u32) -> Result<(), RuntimeError> {
        self.call::<i32, ()>(Export::Free, ptr as i32)
    }

    /// Start a call epoch with at least `size` bytes of scratch space.
    ///
    /// The backing buffer is reused when large enough; otherwise it is freed
    /// and a larger one is allocated. It never shrinks. The buffer is never
    /// smaller than the pool's `arena_min_bytes`.
    pub fn reserve(&mut self, size: u32) -> Result<(), RuntimeError> {
        self.ensure_usable()?;

        let wanted = size.max(self.arena_floor);
        if self.arena.is_bound() && self.arena.capacity() >= wanted {
            self.arena.reset();
            return Ok(());
        }

        if self.arena.is_bound() {
            let old = self.arena.base();
            self.free(old)?;
            self.arena = Arena::unbound();
        }

        let base = self.malloc(wanted)?;
        self.arena.rebind(base, wanted);
        self.store.data_mut().metrics.arena_growths += 1;

        debug!(
            context_id = %self.id(),
            base,
            capacity = wanted,
            "Scratch arena grown"
        );
        Ok(())
    }

    /// Bump-allocate `size` bytes of scratch space.
    pub fn allocate(&mut self, size: u32) -> Result<u32, RuntimeError> {
        let ptr = self.arena.allocate(size);
        self.guard(ptr)
    }

    /// Copy `bytes` into freshly allocated scratch space.
    pub fn write_scratch(&mut self, bytes: &[u8]) -> Result<ByteString, RuntimeError> {
        let len = scratch_len(bytes.len())?;
        let ptr = self.allocate(len)?;
        self.write(ptr, bytes)?;
        Ok(ByteString::new(ptr, len))
    }

    /// Copy bytes out of guest memory.
    pub fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, RuntimeError> {
        let bytes = self.memory.read(&self.store, ptr, len);
        self.guard(bytes)
    }

    /// Copy bytes into guest memory.
    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), RuntimeError> {
        let result = self.memory.write(&mut self.store, ptr, bytes);
        self.guard(result)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self, ptr: u32) -> Result<u32, RuntimeError> {
        let word = self.memory.read_u32(&self.store, ptr);
        self.guard(word)
    }

    /// Read a NUL-terminated byte sequence.
    pub fn read_c_string(&mut self, ptr: u32) -> Result<Vec<u8>, RuntimeError> {
        let bytes = self.memory.read_c_string(&self.store, ptr);
        self.guard(bytes)
    }

    /// Run the guest's `wasi_start_thread` export and wait for the spawned
    /// child to report its identity.
    ///
    /// The child stays parked in `thread-block` until
    /// [`join_guest_threads`](Self::join_guest_threads) or until this context
    /// is dropped. Blocks the calling thread; do not call from within an
    /// async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::Unsupported`] if the guest does not import a
    /// shared memory, [`ThreadError::NotSpawned`] if the export returned
    /// without spawning, and [`ThreadError::RendezvousClosed`] if the child
    /// failed before reporting.
    pub fn spawn_guest_thread(&mut self) -> Result<u32, RuntimeError> {
        if !self.store.data().supports_threads() {
            return Err(ThreadError::Unsupported.into());
        }

        let (identity, reported) = oneshot::channel();
        self.store.data_mut().pending_identity = Some(identity);

        let started = self.call::<(), ()>(Export::StartThread, ());
        let unclaimed = self.store.data_mut().pending_identity.take().is_some();
        started?;

        if unclaimed {
            return Err(ThreadError::NotSpawned.into());
        }

        match reported.blocking_recv() {
            Ok(tid) => {
                debug!(context_id = %self.id(), tid, "Guest thread reported in");
                Ok(tid)
            }
            Err(_) => {
                let tid = self.store.data().children.last().map_or(0, |c| c.tid());
                Err(ThreadError::RendezvousClosed { tid }.into())
            }
        }
    }

    /// Release every child spawned from this context and wait for them to
    /// exit. Returns how many were joined.
    ///
    /// # Errors
    ///
    /// Every child is joined even if some fail; the first failure is returned.
    pub fn join_guest_threads(&mut self) -> Result<usize, RuntimeError> {
        let children = std::mem::take(&mut self.store.data_mut().children);
        let count = children.len();

        let mut first_error = None;
        for child in children {
            if let Err(e) = child.release() {
                warn!(context_id = %self.id(), error = %e, "Guest thread failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    fn ensure_usable(&self) -> Result<(), RuntimeError> {
        if self.poisoned {
            return Err(RuntimeError::ContextPoisoned);
        }
        Ok(())
    }

    /// Poison the context if `result` is a fatal error.
    fn guard<T>(&mut self, result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(context_id = %self.id(), error = %e, "Fatal guest error");
                self.poison();
            }
        }
        result
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id())
            .field("arena", &self.arena)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Creates execution contexts against one compiled guest.
///
/// Cheap to clone; clones share the thread-identity counter.
#[derive(Clone)]
pub struct ContextFactory {
    engine: WasmEngine,
    module: GuestModule,
    linker: Linker<ContextState>,
    pool_config: PoolConfig,
    next_tid: Arc<AtomicU32>,
}

impl ContextFactory {
    /// Create a factory. `linker` must provide every non-memory import of the
    /// guest.
    pub fn new(
        engine: &WasmEngine,
        module: &GuestModule,
        linker: Linker<ContextState>,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            engine: engine.clone(),
            module: module.clone(),
            linker,
            pool_config,
            next_tid: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Get the pool configuration contexts are created with.
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Get the compiled guest.
    pub fn module(&self) -> &GuestModule {
        &self.module
    }

    /// Instantiate a new context.
    ///
    /// Memory imports are satisfied with a fresh memory per context, so
    /// contexts never share linear memory. The guest's `_initialize` export
    /// runs once when present.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Instantiation`] if the imports cannot be
    /// satisfied or the guest traps during initialization.
    #[instrument(skip(self))]
    pub fn instantiate(&self) -> Result<ExecutionContext, RuntimeError> {
        let start = Instant::now();
        let engine = self.engine.inner();
        let module = self.module.inner();

        let mut store = Store::new(engine, ContextState::new(&self.pool_config));
        store.limiter(|state| &mut state.limits);

        let mut linker = self.linker.clone();
        let mut imported = None;

        for import in module.imports() {
            let ExternType::Memory(ty) = import.ty() else {
                continue;
            };

            let memory = if ty.is_shared() {
                SharedMemory::new(engine, ty)
                    .map(GuestMemory::Shared)
                    .map_err(|e| RuntimeError::instantiation(format!("shared memory: {e}")))?
            } else {
                Memory::new(&mut store, ty)
                    .map(GuestMemory::Owned)
                    .map_err(|e| RuntimeError::instantiation(format!("memory: {e}")))?
            };

            linker
                .define(&store, import.module(), import.name(), memory.to_extern())
                .map_err(|e| RuntimeError::instantiation(e.to_string()))?;

            imported = Some((
                memory,
                (import.module().to_string(), import.name().to_string()),
            ));
        }

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| RuntimeError::instantiation(e.to_string()))?;

        let memory = match imported {
            Some((memory, import)) => {
                if let Some(shared) = memory.as_shared() {
                    store.data_mut().threads = Some(ThreadSupport {
                        engine: engine.clone(),
                        module: module.clone(),
                        linker: self.linker.clone(),
                        memory: shared.clone(),
                        memory_import: import,
                        next_tid: Arc::clone(&self.next_tid),
                        pool_config: self.pool_config.clone(),
                    });
                }
                memory
            }
            None => exported_memory(&mut store, &instance)?,
        };

        let arena_floor = self.pool_config.arena_min_bytes;
        let mut context = ExecutionContext {
            store,
            memory,
            symbols: SymbolTable::new(instance),
            arena: Arena::unbound(),
            arena_floor,
            poisoned: false,
        };

        if context.has_export(Export::Initialize) {
            context
                .call::<(), ()>(Export::Initialize, ())
                .map_err(|e| RuntimeError::instantiation(format!("_initialize failed: {e}")))?;
        }

        debug!(
            context_id = %context.id(),
            shared_memory = context.memory.is_shared(),
            duration_us = start.elapsed().as_micros(),
            "Execution context created"
        );

        Ok(context)
    }
}

impl std::fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFactory")
            .field("module", &self.module)
            .field("pool_config", &self.pool_config)
            .finish_non_exhaustive()
    }
}

fn exported_memory(
    store: &mut Store<ContextState>,
    instance: &Instance,
) -> Result<GuestMemory, RuntimeError> {
    match instance.get_export(&mut *store, "memory") {
        Some(Extern::Memory(memory)) => Ok(GuestMemory::Owned(memory)),
        Some(Extern::SharedMemory(memory)) => Ok(GuestMemory::Shared(memory)),
        _ => Err(RuntimeError::missing_export("memory")),
    }
}

/// Convert a host length into a guest `u32` length.
pub(crate) fn scratch_len(len: usize) -> Result<u32, RuntimeError> {
    u32::try_from(len).map_err(|_| RuntimeError::RequestTooLarge { len })
}

/// Extract a human-readable trap description.
fn trap_message(error: &wasmtime::Error) -> String {
    match error.downcast_ref::<wasmtime::Trap>() {
        Some(trap) => format!("{trap}"),
        None => format!("{error:#}"),
    }
}
