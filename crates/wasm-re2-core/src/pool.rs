//! Execution context pool.
//!
//! [`ContextPool::checkout`] hands out an idle context or instantiates a new
//! one; it never waits. The returned [`PooledContext`] gives exclusive access
//! until it is released, either explicitly or on drop. Poisoned contexts,
//! contexts beyond `max_idle_contexts` and contexts coming back after
//! [`ContextPool::close`] are torn down instead of being kept.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::{ContextFactory, ExecutionContext};
use wasm_re2_common::RuntimeError;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Contexts instantiated over the pool's lifetime.
    pub created: u64,
    /// Contexts currently idle.
    pub idle: usize,
    /// Contexts currently checked out.
    pub checked_out: u64,
    /// Contexts torn down instead of reused.
    pub discarded: u64,
}

struct PoolInner {
    factory: ContextFactory,
    idle: Mutex<Vec<ExecutionContext>>,
    closed: AtomicBool,
    created: AtomicU64,
    checked_out: AtomicU64,
    discarded: AtomicU64,
}

/// Pool of independent execution contexts.
///
/// Cheap to clone; clones share the same contexts.
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

impl ContextPool {
    /// Create a pool and instantiate `prewarm_contexts` contexts (at least
    /// one, so import problems surface here).
    ///
    /// # Errors
    ///
    /// Returns an error if instantiation fails.
    pub fn new(factory: ContextFactory) -> Result<Self, RuntimeError> {
        let prewarm = factory.pool_config().prewarm_contexts.max(1);
        let pool = Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                checked_out: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        };

        let mut contexts = Vec::with_capacity(prewarm as usize);
        for _ in 0..prewarm {
            contexts.push(pool.instantiate()?);
        }
        pool.inner.idle.lock().extend(contexts);

        info!(prewarmed = prewarm, "Context pool ready");
        Ok(pool)
    }

    /// Take an idle context or create a new one.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PoolClosed`] after [`close`](Self::close), or
    /// an instantiation error on a pool miss.
    pub fn checkout(&self) -> Result<PooledContext, RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::PoolClosed);
        }

        let reused = self.inner.idle.lock().pop();
        let context = match reused {
            Some(context) => context,
            None => self.instantiate()?,
        };

        self.inner.checked_out.fetch_add(1, Ordering::Relaxed);
        debug!(context_id = %context.id(), "Context checked out");

        Ok(PooledContext {
            context: Some(context),
            pool: self.clone(),
        })
    }

    /// Tear down every idle context. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let drained = std::mem::take(&mut *self.inner.idle.lock());
        let count = drained.len();
        self.inner
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);
        drop(drained);

        debug!(count, "Idle contexts drained");
        count
    }

    /// Reject further checkouts and drain the idle set.
    ///
    /// Contexts still checked out are torn down when they are released.
    pub fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let count = self.drain();
        info!(drained = count, "Context pool closed");
        count
    }

    /// Returns `true` after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
            checked_out: self.inner.checked_out.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Get the factory contexts are created with.
    pub fn factory(&self) -> &ContextFactory {
        &self.inner.factory
    }

    fn instantiate(&self) -> Result<ExecutionContext, RuntimeError> {
        let context = self.inner.factory.instantiate()?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        Ok(context)
    }

    fn give_back(&self, context: ExecutionContext) {
        self.inner.checked_out.fetch_sub(1, Ordering::Relaxed);

        let reason = if context.is_poisoned() {
            "poisoned"
        } else if self.is_closed() {
            "pool closed"
        } else {
            let mut idle = self.inner.idle.lock();
            if idle.len() < self.inner.factory.pool_config().max_idle_contexts as usize {
                debug!(context_id = %context.id(), "Context returned");
                idle.push(context);
                return;
            }
            "idle limit reached"
        };

        if context.is_poisoned() {
            warn!(context_id = %context.id(), reason, "Context discarded");
        } else {
            debug!(context_id = %context.id(), reason, "Context discarded");
        }
        self.inner.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A context checked out of a [`ContextPool`].
///
/// Dereferences to [`ExecutionContext`]. Returned to the pool on
/// [`release`](Self::release) or drop.
pub struct PooledContext {
    context: Option<ExecutionContext>,
    pool: ContextPool,
}

impl PooledContext {
    /// Return the context to its pool.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.give_back(context);
        }
    }
}

impl Deref for PooledContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &Self::Target {
        // Only `give_back` empties the slot, and it consumes or drops `self`
        self.context.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
