//! Host views into a context's linear memory.
//!
//! Every guest pointer is a plain `u32` offset. All accesses here are bounds
//! checked against the current memory size, and an out-of-range access is a
//! [`RuntimeError::MemoryOutOfBounds`] rather than a panic.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Extern, Memory, SharedMemory};

use wasm_re2_common::RuntimeError;

/// The linear memory of one execution context.
///
/// Guests built with thread support import a shared memory; everything else
/// owns a plain store-bound memory.
#[derive(Clone)]
pub enum GuestMemory {
    /// Memory owned by the context's store.
    Owned(Memory),
    /// Shared memory, visible to every guest thread of the context.
    Shared(SharedMemory),
}

#[allow(unsafe_code)]
impl GuestMemory {
    /// Returns `true` for a shared memory.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsContext) -> u64 {
        match self {
            Self::Owned(memory) => memory.data_size(&store) as u64,
            Self::Shared(memory) => memory.data_size() as u64,
        }
    }

    /// Copy `len` bytes starting at `ptr` out of guest memory.
    pub fn read(&self, store: impl AsContext, ptr: u32, len: u32) -> Result<Vec<u8>, RuntimeError> {
        let range = checked_range(ptr, u64::from(len), self.size(&store))?;

        match self {
            Self::Owned(memory) => Ok(memory.data(store.as_context())[range].to_vec()),
            Self::Shared(memory) => Ok(memory.data()[range]
                .iter()
                // SAFETY: the range is in bounds and host accesses happen
                // while the owning context is checked out, so no guest code of
                // that context runs concurrently with this copy.
                .map(|cell| unsafe { *cell.get() })
                .collect()),
        }
    }

    /// Copy `bytes` into guest memory at `ptr`.
    pub fn write(
        &self,
        mut store: impl AsContextMut,
        ptr: u32,
        bytes: &[u8],
    ) -> Result<(), RuntimeError> {
        let range = checked_range(ptr, bytes.len() as u64, self.size(&store))?;

        match self {
            Self::Owned(memory) => {
                memory.data_mut(store.as_context_mut())[range].copy_from_slice(bytes);
            }
            Self::Shared(memory) => {
                for (cell, byte) in memory.data()[range].iter().zip(bytes) {
                    // SAFETY: see `read`.
                    unsafe { *cell.get() = *byte };
                }
            }
        }
        Ok(())
    }

    /// Read a little-endian `u32` at `ptr`.
    pub fn read_u32(&self, store: impl AsContext, ptr: u32) -> Result<u32, RuntimeError> {
        let bytes = self.read(store, ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a NUL-terminated byte sequence starting at `ptr`.
    ///
    /// The terminator is not included. A sequence that runs off the end of
    /// memory is out of bounds.
    pub fn read_c_string(&self, store: impl AsContext, ptr: u32) -> Result<Vec<u8>, RuntimeError> {
        let size = self.size(&store);
        let start = checked_range(ptr, 0, size)?.start;

        let terminator = match self {
            Self::Owned(memory) => memory
                .data(store.as_context())[start..]
                .iter()
                .position(|b| *b == 0),
            Self::Shared(memory) => memory.data()[start..]
                .iter()
                // SAFETY: see `read`.
                .position(|cell| unsafe { *cell.get() } == 0),
        };

        let Some(len) = terminator else {
            return Err(RuntimeError::MemoryOutOfBounds {
                ptr: u64::from(ptr),
                len: size - u64::from(ptr) + 1,
                memory_size: size,
            });
        };

        #[allow(clippy::cast_possible_truncation)]
        self.read(store, ptr, len as u32)
    }

    /// Convert into an [`Extern`] for linker definitions.
    pub fn to_extern(&self) -> Extern {
        match self {
            Self::Owned(memory) => Extern::from(*memory),
            Self::Shared(memory) => Extern::from(memory.clone()),
        }
    }

    /// Get the shared memory, if this is one.
    pub fn as_shared(&self) -> Option<&SharedMemory> {
        match self {
            Self::Owned(_) => None,
            Self::Shared(memory) => Some(memory),
        }
    }
}

impl std::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("shared", &self.is_shared())
            .finish_non_exhaustive()
    }
}

/// Bounds check `ptr..ptr + len` against a memory of `memory_size` bytes.
#[allow(clippy::cast_possible_truncation)]
fn checked_range(ptr: u32, len: u64, memory_size: u64) -> Result<Range<usize>, RuntimeError> {
    let start = u64::from(ptr);
    match start.checked_add(len) {
        Some(end) if end <= memory_size => Ok(start as usize..end as usize),
        _ => Err(RuntimeError::MemoryOutOfBounds {
            ptr: start,
            len,
            memory_size,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, MemoryType, Store};

    fn owned() -> (Store<()>, GuestMemory) {
        let mut store = Store::new(&Engine::default(), ());
        let memory = Memory::new(&mut store, MemoryType::new(1, Some(1))).unwrap();
        (store, GuestMemory::Owned(memory))
    }

    #[test]
    fn test_checked_range() {
        assert_eq!(checked_range(0, 8, 8).unwrap(), 0..8);
        assert_eq!(checked_range(8, 0, 8).unwrap(), 8..8);
        assert!(checked_range(1, 8, 8).is_err());
        assert!(checked_range(9, 0, 8).is_err());
    }

    #[test]
    fn test_read_write_roundtrip() {
        let (mut store, memory) = owned();

        memory.write(&mut store, 100, b"hello").unwrap();
        assert_eq!(memory.read(&store, 100, 5).unwrap(), b"hello");
        assert_eq!(memory.size(&store), 65536);
    }

    #[test]
    fn test_out_of_bounds() {
        let (mut store, memory) = owned();

        let err = memory.write(&mut store, 65535, b"ab").unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MemoryOutOfBounds {
                ptr: 65535,
                len: 2,
                memory_size: 65536
            }
        ));
        assert!(err.is_fatal());
        assert!(memory.read(&store, 70000, 0).is_err());
    }

    #[test]
    fn test_read_u32_little_endian() {
        let (mut store, memory) = owned();

        memory.write(&mut store, 8, &[0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(memory.read_u32(&store, 8).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_read_c_string() {
        let (mut store, memory) = owned();

        memory.write(&mut store, 40, b"year\0month\0").unwrap();
        assert_eq!(memory.read_c_string(&store, 40).unwrap(), b"year");
        assert_eq!(memory.read_c_string(&store, 45).unwrap(), b"month");

        // Fresh memory is zeroed, so an empty string is found right away
        assert_eq!(memory.read_c_string(&store, 1000).unwrap(), b"");
    }

    #[test]
    fn test_read_c_string_unterminated() {
        let (mut store, memory) = owned();

        memory.write(&mut store, 65532, b"abcd").unwrap();
        assert!(matches!(
            memory.read_c_string(&store, 65532),
            Err(RuntimeError::MemoryOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_shared_memory_access() {
        let mut config = wasmtime::Config::new();
        config.wasm_threads(true);
        let engine = Engine::new(&config).unwrap();
        let shared = SharedMemory::new(&engine, MemoryType::shared(1, 1)).unwrap();
        let memory = GuestMemory::Shared(shared);
        let mut store = Store::new(&engine, ());

        assert!(memory.is_shared());
        memory.write(&mut store, 16, b"abc\0").unwrap();
        assert_eq!(memory.read(&store, 16, 3).unwrap(), b"abc");
        assert_eq!(memory.read_c_string(&store, 16).unwrap(), b"abc");
    }
}
