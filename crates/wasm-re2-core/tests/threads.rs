//! Integration tests for guest-thread emulation.
//!
//! These tests verify the spawn/rendezvous protocol:
//! - The parent observes the child's identity before `spawn_guest_thread` returns
//! - The child stays parked until it is released
//! - Joining waits for the child to exit

mod common;

use common::{GUEST_THREADS, factory, literal_context};
use wasm_re2_common::{RuntimeError, ThreadError};

#[test]
fn test_spawn_rendezvous_and_join() {
    let mut ctx = factory(GUEST_THREADS).instantiate().unwrap();
    assert!(ctx.memory().is_shared());
    assert!(ctx.state().supports_threads());

    let tid = ctx.spawn_guest_thread().unwrap();

    assert_eq!(tid, 1);
    assert_eq!(ctx.read_u32(0).unwrap(), tid);
    assert_eq!(ctx.read_u32(4).unwrap(), tid);
    assert_eq!(ctx.read_u32(8).unwrap(), 64);
    assert_eq!(ctx.state().child_count(), 1);
    assert_eq!(ctx.state().metrics.threads_spawned, 1);

    // Parked in thread-block until released
    assert_eq!(ctx.read_u32(12).unwrap(), 0);

    assert_eq!(ctx.join_guest_threads().unwrap(), 1);
    assert_eq!(ctx.read_u32(12).unwrap(), 1);
    assert_eq!(ctx.state().child_count(), 0);
}

#[test]
fn test_thread_ids_are_unique_per_engine() {
    let factory = factory(GUEST_THREADS);
    let mut a = factory.instantiate().unwrap();
    let mut b = factory.instantiate().unwrap();

    let first = a.spawn_guest_thread().unwrap();
    let second = a.spawn_guest_thread().unwrap();
    let third = b.spawn_guest_thread().unwrap();

    assert_eq!([first, second, third], [1, 2, 3]);
    assert_eq!(a.join_guest_threads().unwrap(), 2);
    assert_eq!(b.join_guest_threads().unwrap(), 1);
}

#[test]
fn test_dropping_context_releases_children() {
    let mut ctx = factory(GUEST_THREADS).instantiate().unwrap();
    ctx.spawn_guest_thread().unwrap();

    // Must not hang: the child is signalled and joined on drop
    drop(ctx);
}

#[test]
fn test_unsupported_without_shared_memory() {
    let mut ctx = literal_context();

    let err = ctx.spawn_guest_thread().unwrap_err();

    assert!(matches!(err, RuntimeError::Thread(ThreadError::Unsupported)));
}

#[test]
fn test_export_that_never_spawns() {
    let mut ctx = factory(
        r#"(module
            (import "env" "memory" (memory 1 1 shared))
            (func (export "wasi_start_thread")))"#,
    )
    .instantiate()
    .unwrap();

    let err = ctx.spawn_guest_thread().unwrap_err();

    assert!(matches!(err, RuntimeError::Thread(ThreadError::NotSpawned)));
    assert!(!ctx.is_poisoned());
}

#[test]
fn test_child_without_entry_point() {
    let mut ctx = factory(
        r#"(module
            (import "env" "memory" (memory 1 1 shared))
            (import "wasi" "thread-spawn" (func $spawn (param i32) (result i32)))
            (func (export "wasi_start_thread")
                (i32.store (i32.const 0) (call $spawn (i32.const 0)))))"#,
    )
    .instantiate()
    .unwrap();

    let err = ctx.spawn_guest_thread().unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Thread(ThreadError::RendezvousClosed { .. })
    ));
    // The guest saw the failure as a negative id
    assert_eq!(ctx.read_u32(0).unwrap(), u32::MAX);
}
