//! Per-call scratch allocation.
//!
//! An [`Arena`] is a bump allocator over one guest-heap buffer. The buffer is
//! obtained from the guest's `malloc` by the owning context and reused across
//! calls; the arena itself only does the bookkeeping.
//!
//! Allocations made during one call share an *epoch*. [`Arena::reset`] ends
//! the epoch: every pointer handed out before it must be considered dead.

use wasm_re2_common::RuntimeError;

/// Bump allocator bookkeeping for a scratch buffer in guest memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arena {
    base: u32,
    capacity: u32,
    cursor: u32,
    epoch: u64,
}

impl Arena {
    /// An arena with no backing buffer.
    pub const fn unbound() -> Self {
        Self {
            base: 0,
            capacity: 0,
            cursor: 0,
            epoch: 0,
        }
    }

    /// Point the arena at a new backing buffer and start a new epoch.
    pub fn rebind(&mut self, base: u32, capacity: u32) {
        self.base = base;
        self.capacity = capacity;
        self.reset();
    }

    /// Discard all allocations and start a new epoch.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
    }

    /// Bump-allocate `size` bytes, returning the guest address.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ArenaExhausted`] if the allocation would run
    /// past the reserved capacity, even by a single byte.
    pub fn allocate(&mut self, size: u32) -> Result<u32, RuntimeError> {
        let exhausted = || RuntimeError::ArenaExhausted {
            requested: size,
            cursor: self.cursor,
            capacity: self.capacity,
        };

        let end = self.cursor.checked_add(size).ok_or_else(exhausted)?;
        if end > self.capacity {
            return Err(exhausted());
        }

        let ptr = self.base + self.cursor;
        self.cursor = end;
        Ok(ptr)
    }

    /// Returns `true` if `ptr..ptr + len` lies inside the allocated part of
    /// the current epoch.
    pub fn contains(&self, ptr: u32, len: u32) -> bool {
        let start = u64::from(ptr);
        let end = start + u64::from(len);
        start >= u64::from(self.base) && end <= u64::from(self.base) + u64::from(self.cursor)
    }

    /// Returns `true` once a backing buffer has been bound.
    pub fn is_bound(&self) -> bool {
        self.base != 0
    }

    /// Guest address of the backing buffer.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the backing buffer.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes handed out in the current epoch.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Bytes still available in the current epoch.
    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }

    /// Current epoch number.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_allocation() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);

        assert_eq!(arena.allocate(16).unwrap(), 1024);
        assert_eq!(arena.allocate(8).unwrap(), 1040);
        assert_eq!(arena.cursor(), 24);
        assert_eq!(arena.remaining(), 40);
    }

    #[test]
    fn test_exact_capacity_fits() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);

        assert_eq!(arena.allocate(64).unwrap(), 1024);
        assert_eq!(arena.remaining(), 0);
        assert_eq!(arena.allocate(0).unwrap(), 1088);
    }

    #[test]
    fn test_one_byte_over_capacity_fails() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);

        let err = arena.allocate(65).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ArenaExhausted {
                requested: 65,
                cursor: 0,
                capacity: 64
            }
        ));
        assert!(err.is_fatal());

        // A failed allocation leaves the cursor untouched
        arena.allocate(60).unwrap();
        assert!(arena.allocate(5).is_err());
        assert_eq!(arena.cursor(), 60);
    }

    #[test]
    fn test_overflowing_request_fails() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);
        arena.allocate(1).unwrap();

        assert!(arena.allocate(u32::MAX).is_err());
    }

    #[test]
    fn test_unbound_arena_rejects_allocation() {
        let mut arena = Arena::unbound();

        assert!(!arena.is_bound());
        assert!(arena.allocate(1).is_err());
    }

    #[test]
    fn test_reset_starts_new_epoch() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);
        let epoch = arena.epoch();

        let first = arena.allocate(32).unwrap();
        arena.reset();

        assert_eq!(arena.epoch(), epoch + 1);
        assert_eq!(arena.cursor(), 0);
        assert_eq!(arena.allocate(32).unwrap(), first);
    }

    #[test]
    fn test_contains() {
        let mut arena = Arena::unbound();
        arena.rebind(1024, 64);
        arena.allocate(16).unwrap();

        assert!(arena.contains(1024, 16));
        assert!(arena.contains(1030, 2));
        assert!(!arena.contains(1030, 16));
        assert!(!arena.contains(1000, 4));
    }
}
