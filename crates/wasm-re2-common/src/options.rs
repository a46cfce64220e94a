//! Pattern compile flags.

use serde::{Deserialize, Serialize};

/// Flags applied when compiling a pattern.
///
/// Every flag is independent. A flag left at `false` keeps the guest
/// engine's default for that setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Leftmost-longest matching instead of leftmost-first.
    pub longest: bool,

    /// Restrict the syntax to POSIX egrep.
    pub posix: bool,

    /// Match without regard to case.
    pub case_insensitive: bool,

    /// Treat pattern and subjects as Latin-1 instead of UTF-8.
    pub latin1: bool,

    /// Let the guest log compile errors to its stderr.
    pub log_errors: bool,
}

impl CompileOptions {
    /// All flags unset.
    pub const fn new() -> Self {
        Self {
            longest: false,
            posix: false,
            case_insensitive: false,
            latin1: false,
            log_errors: false,
        }
    }

    #[must_use]
    pub const fn with_longest(mut self, enabled: bool) -> Self {
        self.longest = enabled;
        self
    }

    #[must_use]
    pub const fn with_posix(mut self, enabled: bool) -> Self {
        self.posix = enabled;
        self
    }

    #[must_use]
    pub const fn with_case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    #[must_use]
    pub const fn with_latin1(mut self, enabled: bool) -> Self {
        self.latin1 = enabled;
        self
    }

    #[must_use]
    pub const fn with_log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Returns `true` if no flag is set, so no options object is needed.
    pub const fn is_default(&self) -> bool {
        !(self.longest || self.posix || self.case_insensitive || self.latin1 || self.log_errors)
    }
}
