//! Iterator over a pattern's named capturing groups.

use tracing::warn;

use wasm_re2_common::RuntimeError;
use wasm_re2_core::abi;

use crate::pattern::Pattern;

/// Guest-resident cursor over `(name, index)` pairs.
///
/// Yields each named group once, in index order, then `None` forever. The
/// guest iterator is deleted by [`delete`](Self::delete), on drop or when
/// the pattern is released, whether or not it was exhausted.
pub struct NamedGroups<'a> {
    pattern: &'a Pattern,
    iter: u32,
    exhausted: bool,
    deleted: bool,
}

impl<'a> NamedGroups<'a> {
    pub(crate) fn new(pattern: &'a Pattern, iter: u32) -> Self {
        Self {
            pattern,
            iter,
            exhausted: false,
            deleted: false,
        }
    }

    /// Delete the guest iterator.
    pub fn delete(mut self) -> Result<(), RuntimeError> {
        self.delete_in_guest()
    }

    fn delete_in_guest(&mut self) -> Result<(), RuntimeError> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;
        self.exhausted = true;

        self.pattern.delete_iterator(self.iter)
    }
}

impl Iterator for NamedGroups<'_> {
    type Item = Result<(String, usize), RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let iter = self.iter;
        match self
            .pattern
            .with_context(|ctx, _| abi::named_groups_next(ctx, iter))
        {
            Ok(Some((name, index))) => Some(Ok((
                String::from_utf8_lossy(&name).into_owned(),
                index as usize,
            ))),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for NamedGroups<'_> {}

impl Drop for NamedGroups<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.delete_in_guest() {
            warn!(iter = self.iter, error = %e, "Failed to delete named-group iterator");
        }
    }
}

impl std::fmt::Debug for NamedGroups<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedGroups")
            .field("iter", &self.iter)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}
