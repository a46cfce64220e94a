//! Host side of the guest-thread emulation.
//!
//! `thread-spawn` runs on the parent's thread, inside a guest call. It creates
//! a child context sharing the parent's memory and hands the parent's pending
//! identity channel to it. `thread-block` runs on the child's own OS thread:
//! it reports the child's identity and parks until the parent releases it.

use tracing::{debug, warn};
use wasm_re2_core::store::ContextState;
use wasmtime::Caller;

/// Import module of both primitives.
pub const THREAD_MODULE: &str = "wasi";

/// Spawn primitive.
pub const THREAD_SPAWN: &str = "thread-spawn";

/// Block/rendezvous primitive.
pub const THREAD_BLOCK: &str = "thread-block";

/// `wasi::thread-spawn(start_arg) -> tid`.
///
/// Returns the new thread's identity, or `-1` if the context cannot spawn.
#[allow(clippy::needless_pass_by_value, clippy::cast_possible_wrap)]
pub fn thread_spawn(mut caller: Caller<'_, ContextState>, start_arg: i32) -> i32 {
    let Some(support) = caller.data().thread_support() else {
        warn!("thread-spawn called by a guest without shared memory");
        return -1;
    };

    let identity = caller.data_mut().take_pending_identity();
    match support.spawn_child(start_arg, identity) {
        Ok(child) => {
            let tid = child.tid();
            caller.data_mut().adopt_child(child);
            tid as i32
        }
        Err(e) => {
            warn!(start_arg, error = %e, "thread-spawn failed");
            -1
        }
    }
}

/// `wasi::thread-block(_) -> status`.
///
/// Returns `0` once released, or `-1` when called outside a spawned thread.
#[allow(clippy::needless_pass_by_value)]
pub fn thread_block(mut caller: Caller<'_, ContextState>, _arg: i32) -> i32 {
    let Some(rendezvous) = caller.data_mut().take_rendezvous() else {
        warn!(
            thread_id = caller.data().thread_id,
            "thread-block called without a pending rendezvous"
        );
        return -1;
    };

    let tid = rendezvous.arrive();
    debug!(tid, "Guest thread resuming after release");
    0
}
