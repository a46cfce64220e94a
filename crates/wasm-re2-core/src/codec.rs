//! Binary structures crossing the host/guest boundary.
//!
//! All integers are little-endian `u32`. A byte-string is a `(ptr, len)` pair
//! of 8 bytes. A match table is an array of byte-strings, one per requested
//! group, where the guest writes absolute pointers into the subject it was
//! given; offsets are recovered by subtracting the subject's base address.

use std::ops::Range;

use wasm_re2_common::RuntimeError;

/// Size of an encoded byte-string.
pub const BYTE_STRING_SIZE: u32 = 8;

/// Size of one match-table record.
pub const MATCH_RECORD_SIZE: u32 = BYTE_STRING_SIZE;

/// A `(ptr, len)` pair referencing guest memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteString {
    pub ptr: u32,
    pub len: u32,
}

impl ByteString {
    pub fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// A null pointer marks a group that did not participate.
    pub fn is_null(&self) -> bool {
        self.ptr == 0
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.ptr.to_le_bytes());
        out[4..].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    /// Decode the first 8 bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, RuntimeError> {
        Ok(Self {
            ptr: read_u32_le(bytes, 0)?,
            len: read_u32_le(bytes, 4)?,
        })
    }
}

/// Read a little-endian `u32` at `offset`.
pub fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, RuntimeError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|word| word.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| {
            RuntimeError::abi_violation(format!(
                "truncated word at offset {offset} of {} bytes",
                bytes.len()
            ))
        })
}

/// Byte offsets of one capture group, `(-1, -1)` when it did not participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

impl Span {
    /// Sentinel for a group that did not participate in the match.
    pub const UNMATCHED: Self = Self { start: -1, end: -1 };

    pub fn new(start: usize, end: usize) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self {
            start: start as i64,
            end: end as i64,
        }
    }

    pub fn is_matched(&self) -> bool {
        *self != Self::UNMATCHED
    }

    /// The byte range, or `None` for an unmatched group.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn range(&self) -> Option<Range<usize>> {
        self.is_matched()
            .then(|| self.start as usize..self.end as usize)
    }
}

impl From<Span> for (i64, i64) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

/// Decode a match table written by the guest.
///
/// `subject` is the byte-string the guest was asked to match against; every
/// participating record must point inside it.
///
/// # Errors
///
/// Returns [`RuntimeError::AbiViolation`] if the table is not a whole number
/// of records or a record points outside the subject.
pub fn decode_match_table(table: &[u8], subject: ByteString) -> Result<Vec<Span>, RuntimeError> {
    if table.len() % MATCH_RECORD_SIZE as usize != 0 {
        return Err(RuntimeError::abi_violation(format!(
            "match table of {} bytes is not a whole number of records",
            table.len()
        )));
    }

    let subject_start = u64::from(subject.ptr);
    let subject_end = subject_start + u64::from(subject.len);

    table
        .chunks_exact(MATCH_RECORD_SIZE as usize)
        .enumerate()
        .map(|(group, record)| {
            let record = ByteString::decode(record)?;
            if record.is_null() {
                return Ok(Span::UNMATCHED);
            }

            let start = u64::from(record.ptr);
            let end = start + u64::from(record.len);
            if start < subject_start || end > subject_end {
                return Err(RuntimeError::abi_violation(format!(
                    "group {group} at {start}..{end} lies outside subject {subject_start}..{subject_end}"
                )));
            }

            #[allow(clippy::cast_possible_truncation)]
            Ok(Span::new(
                (start - subject_start) as usize,
                (end - subject_start) as usize,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(records: &[ByteString]) -> Vec<u8> {
        records.iter().flat_map(ByteString::encode).collect()
    }

    #[test]
    fn test_byte_string_layout() {
        let encoded = ByteString::new(0x0102_0304, 5).encode();
        assert_eq!(encoded, [4, 3, 2, 1, 5, 0, 0, 0]);
        assert_eq!(
            ByteString::decode(&encoded).unwrap(),
            ByteString::new(0x0102_0304, 5)
        );
    }

    #[test]
    fn test_decode_truncated() {
        assert!(ByteString::decode(&[1, 2, 3, 4, 5]).is_err());
        assert!(read_u32_le(&[1, 2, 3], 0).is_err());
        assert_eq!(read_u32_le(&[0, 1, 0, 0, 0], 1).unwrap(), 1);
    }

    #[test]
    fn test_offsets_from_pointer_subtraction() {
        let subject = ByteString::new(2000, 10);
        let bytes = table(&[ByteString::new(2003, 4), ByteString::new(2004, 2)]);

        let spans = decode_match_table(&bytes, subject).unwrap();
        assert_eq!(spans, vec![Span::new(3, 7), Span::new(4, 6)]);
        assert_eq!(spans[0].range(), Some(3..7));
    }

    #[test]
    fn test_null_record_is_unmatched() {
        let subject = ByteString::new(2000, 10);
        // A stale length next to a null pointer is ignored
        let bytes = table(&[ByteString::new(2000, 10), ByteString::new(0, 7)]);

        let spans = decode_match_table(&bytes, subject).unwrap();
        assert_eq!(spans[1], Span::UNMATCHED);
        assert_eq!(<(i64, i64)>::from(spans[1]), (-1, -1));
        assert!(!spans[1].is_matched());
        assert_eq!(spans[1].range(), None);
    }

    #[test]
    fn test_empty_match_at_end() {
        let subject = ByteString::new(2000, 3);
        let bytes = table(&[ByteString::new(2003, 0)]);

        assert_eq!(
            decode_match_table(&bytes, subject).unwrap(),
            vec![Span::new(3, 3)]
        );
    }

    #[test]
    fn test_record_outside_subject() {
        let subject = ByteString::new(2000, 3);

        let before = table(&[ByteString::new(1999, 1)]);
        assert!(matches!(
            decode_match_table(&before, subject),
            Err(RuntimeError::AbiViolation { .. })
        ));

        let past_end = table(&[ByteString::new(2001, 3)]);
        assert!(decode_match_table(&past_end, subject).is_err());
    }

    #[test]
    fn test_partial_record() {
        let subject = ByteString::new(2000, 3);
        assert!(decode_match_table(&[0; 12], subject).is_err());
        assert!(decode_match_table(&[], subject).unwrap().is_empty());
    }
}
