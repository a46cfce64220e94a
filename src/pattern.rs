//! Host-side handle to a compiled pattern.
//!
//! A [`Pattern`] owns a guest-resident `cre2_regexp_t` together with the
//! execution context whose memory holds it. The context stays checked out of
//! the pool for the handle's whole life; calls on one pattern are serialized
//! by the handle's lock, while different patterns run on different contexts
//! in parallel.

use std::ops::Range;

use parking_lot::Mutex;
use tracing::{debug, warn};

use wasm_re2_common::{CompileOptions, RuntimeError};
use wasm_re2_core::abi::{self, Anchor, RawPattern};
use wasm_re2_core::{ExecutionContext, PooledContext, Span};

use crate::named_groups::NamedGroups;

/// A compiled pattern.
///
/// Released explicitly with [`release`](Self::release), or on drop. Every
/// call after release fails with [`RuntimeError::PatternReleased`].
pub struct Pattern {
    raw: RawPattern,
    source: Vec<u8>,
    options: CompileOptions,
    slot: Mutex<Option<Slot>>,
}

/// Context pinned by a live pattern and the guest iterators opened on it.
struct Slot {
    context: PooledContext,
    iterators: Vec<u32>,
}

impl Pattern {
    pub(crate) fn new(
        raw: RawPattern,
        source: Vec<u8>,
        options: CompileOptions,
        context: PooledContext,
    ) -> Self {
        Self {
            raw,
            source,
            options,
            slot: Mutex::new(Some(Slot {
                context,
                iterators: Vec::new(),
            })),
        }
    }

    /// Pattern source as given to `compile`.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Flags the pattern was compiled with.
    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Number of capturing groups, not counting the overall match.
    pub fn capture_count(&self) -> usize {
        self.raw.capture_count as usize
    }

    /// Returns `true` once the pattern has been released.
    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Returns `true` if the pattern matches anywhere in `subject`.
    pub fn is_match(&self, subject: impl AsRef<[u8]>) -> Result<bool, RuntimeError> {
        let subject = subject.as_ref();
        let found = self.with_context(|ctx, raw| {
            abi::match_at(ctx, raw, subject, 0, subject.len(), Anchor::Unanchored, 0)
        })?;
        Ok(found.is_some())
    }

    /// Byte range of the leftmost match.
    pub fn find(&self, subject: impl AsRef<[u8]>) -> Result<Option<Range<usize>>, RuntimeError> {
        let subject = subject.as_ref();
        let spans = self.with_context(|ctx, raw| {
            abi::match_at(ctx, raw, subject, 0, subject.len(), Anchor::Unanchored, 1)
        })?;
        Ok(spans.and_then(|spans| spans.first().and_then(Span::range)))
    }

    /// Spans of the overall match and every capturing group.
    ///
    /// Groups that did not participate are [`Span::UNMATCHED`].
    pub fn captures(&self, subject: impl AsRef<[u8]>) -> Result<Option<Vec<Span>>, RuntimeError> {
        let subject = subject.as_ref();
        self.captures_at(subject, 0, subject.len(), Anchor::Unanchored)
    }

    /// Like [`captures`](Self::captures), restricted to `subject[start..end]`
    /// and anchored as requested.
    ///
    /// Offsets in the result are relative to the whole subject.
    ///
    /// # Errors
    ///
    /// A range outside the subject is [`RuntimeError::InvalidRange`].
    pub fn captures_at(
        &self,
        subject: impl AsRef<[u8]>,
        start: usize,
        end: usize,
        anchor: Anchor,
    ) -> Result<Option<Vec<Span>>, RuntimeError> {
        let subject = subject.as_ref();
        let groups = self.raw.capture_count.saturating_add(1);
        self.with_context(|ctx, raw| abi::match_at(ctx, raw, subject, start, end, anchor, groups))
    }

    /// Iterate over the named groups as `(name, index)` pairs.
    ///
    /// The guest iterator is deleted when the returned value is deleted or
    /// dropped, or when the pattern is released, whichever comes first.
    pub fn named_groups(&self) -> Result<NamedGroups<'_>, RuntimeError> {
        let mut guard = self.slot.lock();
        let slot = guard.as_mut().ok_or(RuntimeError::PatternReleased)?;

        let iter = abi::named_groups_new(&mut slot.context, &self.raw)?;
        slot.iterators.push(iter);
        Ok(NamedGroups::new(self, iter))
    }

    /// Collect every named group, in index order.
    pub fn group_names(&self) -> Result<Vec<(String, usize)>, RuntimeError> {
        let mut groups = self.named_groups()?;
        let names = groups.by_ref().collect::<Result<Vec<_>, _>>();
        let deleted = groups.delete();

        let names = names?;
        deleted?;
        Ok(names)
    }

    /// Replace every match in `subject` with `rewrite`.
    ///
    /// Returns the rewritten bytes and `true`, or the unchanged subject and
    /// `false` when nothing matched. `rewrite` may refer to groups as `\1`.
    pub fn replace_all(
        &self,
        subject: impl AsRef<[u8]>,
        rewrite: impl AsRef<[u8]>,
    ) -> Result<(Vec<u8>, bool), RuntimeError> {
        let subject = subject.as_ref();
        let rewrite = rewrite.as_ref();
        let replaced =
            self.with_context(|ctx, raw| abi::global_replace(ctx, raw, subject, rewrite))?;

        Ok(match replaced {
            Some(bytes) => (bytes, true),
            None => (subject.to_vec(), false),
        })
    }

    /// Delete the pattern in the guest and return its context to the pool.
    ///
    /// Named-group iterators still open on the pattern are deleted first;
    /// later calls on them fail with [`RuntimeError::PatternReleased`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PatternReleased`] if already released. If a
    /// guest call fails the context is discarded rather than reused, and the
    /// first failure is returned.
    pub fn release(&self) -> Result<(), RuntimeError> {
        let Some(Slot {
            mut context,
            iterators,
        }) = self.slot.lock().take()
        else {
            return Err(RuntimeError::PatternReleased);
        };

        let open_iterators = iterators.len();
        let iterators_deleted = iterators
            .into_iter()
            .map(|iter| abi::named_groups_delete(&mut context, iter))
            .fold(Ok(()), Result::and);
        let deleted = iterators_deleted.and(abi::delete(&mut context, self.raw.ptr));
        debug!(
            ptr = self.raw.ptr,
            context_id = %context.id(),
            open_iterators,
            ok = deleted.is_ok(),
            "Pattern released"
        );
        context.release();
        deleted
    }

    /// Delete a named-group iterator opened by [`named_groups`](Self::named_groups).
    ///
    /// An iterator already deleted by [`release`](Self::release) is a no-op.
    pub(crate) fn delete_iterator(&self, iter: u32) -> Result<(), RuntimeError> {
        let mut guard = self.slot.lock();
        let Some(slot) = guard.as_mut() else {
            return Ok(());
        };

        let Some(pos) = slot.iterators.iter().position(|&open| open == iter) else {
            return Ok(());
        };
        slot.iterators.swap_remove(pos);
        abi::named_groups_delete(&mut slot.context, iter)
    }

    pub(crate) fn with_context<T>(
        &self,
        f: impl FnOnce(&mut ExecutionContext, &RawPattern) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut guard = self.slot.lock();
        let slot = guard.as_mut().ok_or(RuntimeError::PatternReleased)?;
        f(&mut *slot.context, &self.raw)
    }
}

impl Drop for Pattern {
    fn drop(&mut self) {
        if self.slot.get_mut().is_none() {
            return;
        }
        if let Err(e) = self.release() {
            warn!(
                pattern = %String::from_utf8_lossy(&self.source),
                error = %e,
                "Failed to release pattern on drop"
            );
        }
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &String::from_utf8_lossy(&self.source))
            .field("capture_count", &self.raw.capture_count)
            .field("options", &self.options)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
