//! Error types for wasm-re2.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for the bridge
//! - [`PatternError`]: Invalid pattern syntax reported by the guest engine
//! - [`ThreadError`]: Guest-thread emulation failures
//!
//! Errors fall into two classes. Fatal errors mean the host/guest contract
//! itself is broken (missing export, out-of-bounds access, exhausted arena,
//! guest out of memory) and the execution context that produced them must not
//! be reused. Everything else is an ordinary, recoverable error.

use std::fmt;
use std::io;

use thiserror::Error;

/// Top-level runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The guest module could not be compiled or loaded.
    #[error("Guest module load failed: {reason}")]
    ModuleLoad {
        /// Description of the failure.
        reason: String,
    },

    /// Instantiating the guest module failed (unsatisfied imports, start trap).
    #[error("Guest instantiation failed: {reason}")]
    Instantiation {
        /// Description of the failure.
        reason: String,
    },

    /// A required guest export is missing.
    #[error("Missing guest export: {name}")]
    MissingExport {
        /// Name of the export.
        name: String,
    },

    /// A guest export exists but has an unexpected signature.
    #[error("Guest export '{name}' has an unexpected signature: {reason}")]
    SignatureMismatch {
        /// Name of the export.
        name: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// The guest trapped while executing an export.
    #[error("Guest trap in '{export}': {message}")]
    Trap {
        /// Export that was executing.
        export: String,
        /// Trap description.
        message: String,
    },

    /// A host access fell outside the guest's linear memory.
    #[error("Guest memory access out of bounds: ptr={ptr} len={len} memory_size={memory_size}")]
    MemoryOutOfBounds {
        /// Start address of the access.
        ptr: u64,
        /// Length of the access.
        len: u64,
        /// Current size of the linear memory in bytes.
        memory_size: u64,
    },

    /// A bump allocation exceeded the capacity reserved for the call.
    #[error("Arena exhausted: requested {requested} bytes at cursor {cursor} of {capacity}")]
    ArenaExhausted {
        /// Bytes requested.
        requested: u32,
        /// Cursor position at the time of the request.
        cursor: u32,
        /// Reserved capacity.
        capacity: u32,
    },

    /// The guest allocator returned a null pointer.
    #[error("Guest allocation of {size} bytes failed")]
    GuestAllocationFailed {
        /// Requested size in bytes.
        size: u32,
    },

    /// The guest reported it ran out of memory.
    #[error("Guest out of memory during {operation}")]
    GuestOutOfMemory {
        /// Operation that failed.
        operation: String,
    },

    /// The guest returned data that violates the binary ABI.
    #[error("ABI violation: {reason}")]
    AbiViolation {
        /// Description of the violation.
        reason: String,
    },

    /// The execution context previously hit a fatal error.
    #[error("Execution context is poisoned by an earlier fatal error")]
    ContextPoisoned,

    /// The pattern is syntactically invalid.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    /// A request does not fit the guest's 32-bit address space.
    #[error("Request too large: {len} bytes")]
    RequestTooLarge {
        /// Size of the rejected input.
        len: usize,
    },

    /// A match range lies outside the subject.
    #[error("Invalid match range {start}..{end} for subject of {len} bytes")]
    InvalidRange {
        /// Requested start offset.
        start: usize,
        /// Requested end offset.
        end: usize,
        /// Subject length.
        len: usize,
    },

    /// The pattern handle was already released.
    #[error("Pattern already released")]
    PatternReleased,

    /// The context pool was closed.
    #[error("Context pool is closed")]
    PoolClosed,

    /// A guest-thread operation failed.
    #[error("Guest thread error: {0}")]
    Thread(#[from] ThreadError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// An invalid pattern, as reported by the guest's error-code protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {fragment}")]
pub struct PatternError {
    /// Raw error code returned by the guest.
    pub code: i32,
    /// Decoded error kind.
    pub kind: PatternErrorKind,
    /// The offending pattern fragment.
    pub fragment: String,
}

impl PatternError {
    /// Build an error from a raw guest code and fragment.
    pub fn new(code: i32, fragment: impl Into<String>) -> Self {
        Self {
            code,
            kind: PatternErrorKind::from_code(code),
            fragment: fragment.into(),
        }
    }
}

/// RE2 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternErrorKind {
    Internal,
    BadEscape,
    BadCharClass,
    BadCharRange,
    MissingBracket,
    MissingParen,
    UnexpectedParen,
    TrailingBackslash,
    RepeatArgument,
    RepeatSize,
    RepeatOp,
    BadPerlOp,
    BadUtf8,
    BadNamedCapture,
    PatternTooLarge,
    Unknown(i32),
}

impl PatternErrorKind {
    /// Decode a non-zero guest error code.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Internal,
            2 => Self::BadEscape,
            3 => Self::BadCharClass,
            4 => Self::BadCharRange,
            5 => Self::MissingBracket,
            6 => Self::MissingParen,
            7 => Self::UnexpectedParen,
            8 => Self::TrailingBackslash,
            9 => Self::RepeatArgument,
            10 => Self::RepeatSize,
            11 => Self::RepeatOp,
            12 => Self::BadPerlOp,
            13 => Self::BadUtf8,
            14 => Self::BadNamedCapture,
            15 => Self::PatternTooLarge,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for PatternErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Internal => "unexpected error",
            Self::BadEscape => "invalid escape sequence",
            Self::BadCharClass => "invalid character class",
            Self::BadCharRange => "invalid character class range",
            Self::MissingBracket => "missing ]",
            Self::MissingParen => "missing )",
            Self::UnexpectedParen => "unexpected )",
            Self::TrailingBackslash => "trailing \\",
            Self::RepeatArgument => "no argument for repetition operator",
            Self::RepeatSize => "invalid repetition size",
            Self::RepeatOp => "bad repetition operator",
            Self::BadPerlOp => "invalid perl operator",
            Self::BadUtf8 => "invalid UTF-8",
            Self::BadNamedCapture => "invalid named capture group",
            Self::PatternTooLarge => "pattern too large (compile failed)",
            Self::Unknown(code) => return write!(f, "unknown error code {code}"),
        };
        f.write_str(text)
    }
}

/// Guest-thread emulation errors.
#[derive(Error, Debug)]
pub enum ThreadError {
    /// The guest module does not import a shared memory.
    #[error("Guest threads are not supported by this module")]
    Unsupported,

    /// The host could not create the child context.
    #[error("Spawning guest thread failed: {reason}")]
    SpawnFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The guest returned without calling `thread-spawn`.
    #[error("Guest did not spawn a thread")]
    NotSpawned,

    /// The child exited before sending its identity.
    #[error("Guest thread {tid} exited before the rendezvous")]
    RendezvousClosed {
        /// Identity of the child.
        tid: u32,
    },

    /// The child trapped on its OS thread.
    #[error("Guest thread {tid} failed: {message}")]
    ChildFailed {
        /// Identity of the child.
        tid: u32,
        /// Failure description.
        message: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleLoad` error.
    pub fn module_load(reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `Trap` error.
    pub fn trap(export: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Trap {
            export: export.into(),
            message: message.into(),
        }
    }

    /// Create a new `AbiViolation` error.
    pub fn abi_violation(reason: impl Into<String>) -> Self {
        Self::AbiViolation {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error means the host/guest contract is broken.
    ///
    /// The context that produced a fatal error is discarded instead of being
    /// returned to the pool.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModuleLoad { .. }
                | Self::Instantiation { .. }
                | Self::MissingExport { .. }
                | Self::SignatureMismatch { .. }
                | Self::Trap { .. }
                | Self::MemoryOutOfBounds { .. }
                | Self::ArenaExhausted { .. }
                | Self::GuestAllocationFailed { .. }
                | Self::GuestOutOfMemory { .. }
                | Self::AbiViolation { .. }
                | Self::ContextPoisoned
        )
    }

    /// Returns `true` if this error reports invalid pattern syntax.
    pub fn is_invalid_pattern(&self) -> bool {
        matches!(self, Self::InvalidPattern(_))
    }
}
