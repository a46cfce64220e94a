//! Call sequences for the guest's cre2 export table.
//!
//! Each function here performs one complete host/guest exchange on a context:
//! it reserves scratch space, marshals the request, invokes the export and
//! decodes the response before the arena is reused. Patterns and iterators
//! are raw guest pointers and are only meaningful on the context that
//! created them.

use tracing::{debug, trace};

use crate::codec::{BYTE_STRING_SIZE, ByteString, MATCH_RECORD_SIZE, Span, decode_match_table};
use crate::context::{ExecutionContext, scratch_len};
use crate::symbols::Export;
use wasm_re2_common::{CompileOptions, PatternError, RuntimeError};

/// A compiled pattern living in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPattern {
    /// Guest pointer to the `cre2_regexp_t`.
    pub ptr: u32,
    /// Number of capturing groups, not counting group 0.
    pub capture_count: u32,
}

/// Anchoring mode passed to `cre2_match`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum Anchor {
    #[default]
    Unanchored = 1,
    AnchorStart = 2,
    AnchorBoth = 3,
}

/// Compile `pattern` in the guest.
///
/// # Errors
///
/// Invalid syntax is reported as [`RuntimeError::InvalidPattern`]; the
/// rejected pattern is deleted in the guest first. A null constructor result
/// is [`RuntimeError::GuestAllocationFailed`].
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn compile(
    ctx: &mut ExecutionContext,
    pattern: &[u8],
    options: &CompileOptions,
) -> Result<RawPattern, RuntimeError> {
    let len = scratch_len(pattern.len())?;
    ctx.reserve(len.saturating_add(BYTE_STRING_SIZE))?;

    let source = ctx.write_scratch(pattern)?;
    let opts = if options.is_default() {
        0
    } else {
        new_options(ctx, options)?
    };

    let ptr = ctx.call::<(i32, i32, i32), i32>(
        Export::New,
        (source.ptr as i32, source.len as i32, opts as i32),
    )? as u32;
    if opts != 0 {
        ctx.call::<i32, ()>(Export::OptDelete, opts as i32)?;
    }

    if ptr == 0 {
        ctx.poison();
        return Err(RuntimeError::GuestAllocationFailed { size: len });
    }

    let code = ctx.call::<i32, i32>(Export::ErrorCode, ptr as i32)?;
    if code != 0 {
        let fragment = error_arg(ctx, ptr)?;
        delete(ctx, ptr)?;
        debug!(code, fragment = %fragment, "Pattern rejected by guest");
        return Err(PatternError::new(code, fragment).into());
    }

    let capture_count = capture_count(ctx, ptr)?;
    trace!(ptr, capture_count, "Pattern compiled");

    Ok(RawPattern { ptr, capture_count })
}

/// Build a guest options object for the flags set in `options`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn new_options(ctx: &mut ExecutionContext, options: &CompileOptions) -> Result<u32, RuntimeError> {
    let opts = ctx.call::<(), i32>(Export::OptNew, ())?;
    if opts == 0 {
        ctx.poison();
        return Err(RuntimeError::GuestAllocationFailed { size: 0 });
    }

    if options.log_errors {
        ctx.call::<(i32, i32), ()>(Export::OptSetLogErrors, (opts, 1))?;
    }
    if options.longest {
        ctx.call::<(i32, i32), ()>(Export::OptSetLongestMatch, (opts, 1))?;
    }
    if options.posix {
        ctx.call::<(i32, i32), ()>(Export::OptSetPosixSyntax, (opts, 1))?;
    }
    if options.case_insensitive {
        ctx.call::<(i32, i32), ()>(Export::OptSetCaseSensitive, (opts, 0))?;
    }
    if options.latin1 {
        ctx.call::<i32, ()>(Export::OptSetLatin1Encoding, opts)?;
    }

    Ok(opts as u32)
}

/// Fetch the offending fragment of a rejected pattern.
///
/// The fragment is copied out while the arena slot still holds its pointer.
#[allow(clippy::cast_possible_wrap)]
fn error_arg(ctx: &mut ExecutionContext, ptr: u32) -> Result<String, RuntimeError> {
    let slot = ctx.allocate(BYTE_STRING_SIZE)?;
    ctx.call::<(i32, i32), ()>(Export::ErrorArg, (ptr as i32, slot as i32))?;

    let arg = ByteString::decode(&ctx.read(slot, BYTE_STRING_SIZE)?)?;
    let bytes = ctx.read(arg.ptr, arg.len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Number of capturing groups of a compiled pattern.
#[allow(clippy::cast_possible_wrap)]
pub fn capture_count(ctx: &mut ExecutionContext, ptr: u32) -> Result<u32, RuntimeError> {
    let count = ctx.call::<i32, i32>(Export::NumCapturingGroups, ptr as i32)?;
    u32::try_from(count).map_err(|_| {
        ctx.poison();
        RuntimeError::abi_violation(format!("negative capture count {count}"))
    })
}

/// Delete a compiled pattern.
#[allow(clippy::cast_possible_wrap)]
pub fn delete(ctx: &mut ExecutionContext, ptr: u32) -> Result<(), RuntimeError> {
    ctx.call::<i32, ()>(Export::Delete, ptr as i32)
}

/// Match `subject[start..end]`.
///
/// `groups` is the number of match slots to fill: `0` only reports whether
/// the pattern matches, `1` adds the overall match, and
/// `capture_count + 1` reports every group.
///
/// Returns `None` when there is no match.
///
/// # Errors
///
/// A range outside the subject is [`RuntimeError::InvalidRange`]; it is
/// checked before any guest call.
#[allow(clippy::cast_possible_wrap)]
pub fn match_at(
    ctx: &mut ExecutionContext,
    pattern: &RawPattern,
    subject: &[u8],
    start: usize,
    end: usize,
    anchor: Anchor,
    groups: u32,
) -> Result<Option<Vec<Span>>, RuntimeError> {
    if start > end || end > subject.len() {
        return Err(RuntimeError::InvalidRange {
            start,
            end,
            len: subject.len(),
        });
    }

    let subject_len = scratch_len(subject.len())?;
    let table_len = groups
        .checked_mul(MATCH_RECORD_SIZE)
        .ok_or(RuntimeError::RequestTooLarge {
            len: subject.len(),
        })?;
    let needed = table_len
        .checked_add(subject_len)
        .ok_or(RuntimeError::RequestTooLarge {
            len: subject.len(),
        })?;
    ctx.reserve(needed)?;

    // Table first so records stay word aligned
    let table = ctx.allocate(table_len)?;
    ctx.write(table, &vec![0; table_len as usize])?;
    let text = ctx.write_scratch(subject)?;

    let matched = ctx.call::<(i32, i32, i32, i32, i32, i32, i32, i32), i32>(
        Export::Match,
        (
            pattern.ptr as i32,
            text.ptr as i32,
            text.len as i32,
            start as i32,
            end as i32,
            anchor as i32,
            table as i32,
            groups as i32,
        ),
    )?;

    if matched == 0 {
        return Ok(None);
    }

    let records = ctx.read(table, table_len)?;
    let spans = decode_match_table(&records, text);
    if spans.is_err() {
        ctx.poison();
    }
    spans.map(Some)
}

/// Create a named-group iterator for a compiled pattern.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn named_groups_new(ctx: &mut ExecutionContext, pattern: &RawPattern) -> Result<u32, RuntimeError> {
    let iter = ctx.call::<i32, i32>(Export::NamedGroupsIterNew, pattern.ptr as i32)? as u32;
    if iter == 0 {
        ctx.poison();
        return Err(RuntimeError::GuestAllocationFailed { size: 0 });
    }
    Ok(iter)
}

/// Advance a named-group iterator.
///
/// Returns `None` once the iterator is exhausted.
#[allow(clippy::cast_possible_wrap)]
pub fn named_groups_next(
    ctx: &mut ExecutionContext,
    iter: u32,
) -> Result<Option<(Vec<u8>, u32)>, RuntimeError> {
    ctx.reserve(2 * 4)?;
    let name_slot = ctx.allocate(4)?;
    let index_slot = ctx.allocate(4)?;

    let more = ctx.call::<(i32, i32, i32), i32>(
        Export::NamedGroupsIterNext,
        (iter as i32, name_slot as i32, index_slot as i32),
    )?;
    if more == 0 {
        return Ok(None);
    }

    let name_ptr = ctx.read_u32(name_slot)?;
    let name = ctx.read_c_string(name_ptr)?;
    let index = ctx.read_u32(index_slot)?;

    Ok(Some((name, index)))
}

/// Delete a named-group iterator.
#[allow(clippy::cast_possible_wrap)]
pub fn named_groups_delete(ctx: &mut ExecutionContext, iter: u32) -> Result<(), RuntimeError> {
    ctx.call::<i32, ()>(Export::NamedGroupsIterDelete, iter as i32)
}

/// Replace every match in `subject` with `rewrite`.
///
/// Returns `None` when nothing was replaced; in that case no result buffer
/// exists in the guest and nothing is freed.
///
/// # Errors
///
/// A `-1` from the guest is [`RuntimeError::GuestOutOfMemory`].
#[allow(clippy::cast_possible_wrap)]
pub fn global_replace(
    ctx: &mut ExecutionContext,
    pattern: &RawPattern,
    subject: &[u8],
    rewrite: &[u8],
) -> Result<Option<Vec<u8>>, RuntimeError> {
    let subject_len = scratch_len(subject.len())?;
    let rewrite_len = scratch_len(rewrite.len())?;
    let needed = subject_len
        .checked_add(rewrite_len)
        .and_then(|n| n.checked_add(2 * BYTE_STRING_SIZE))
        .ok_or(RuntimeError::RequestTooLarge {
            len: subject.len() + rewrite.len(),
        })?;
    ctx.reserve(needed)?;

    // Both structs first so they stay word aligned
    let target = ctx.allocate(BYTE_STRING_SIZE)?;
    let rewrite_slot = ctx.allocate(BYTE_STRING_SIZE)?;
    let text = ctx.write_scratch(subject)?;
    let template = ctx.write_scratch(rewrite)?;
    ctx.write(target, &text.encode())?;
    ctx.write(rewrite_slot, &template.encode())?;

    let replaced = ctx.call::<(i32, i32, i32), i32>(
        Export::GlobalReplace,
        (pattern.ptr as i32, target as i32, rewrite_slot as i32),
    )?;

    match replaced {
        0 => Ok(None),
        count if count > 0 => {
            let result = ByteString::decode(&ctx.read(target, BYTE_STRING_SIZE)?)?;
            let bytes = ctx.read(result.ptr, result.len)?;
            ctx.free(result.ptr)?;
            trace!(count, len = bytes.len(), "Global replace done");
            Ok(Some(bytes))
        }
        -1 => {
            ctx.poison();
            Err(RuntimeError::GuestOutOfMemory {
                operation: "global replace".into(),
            })
        }
        other => {
            ctx.poison();
            Err(RuntimeError::abi_violation(format!(
                "global replace returned {other}"
            )))
        }
    }
}
