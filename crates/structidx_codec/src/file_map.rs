//! Encoding of per-key file contributions.
//!
//! The value stored for one key is the set of files that contributed to it,
//! each with its own value:
//!
//! ```text
//! | count (i32) | file_id (i32) | value | file_id (i32) | value | ...
//! ```
//!
//! Entries are written in ascending file id order.

use crate::error::{CodecError, CodecResult};
use crate::value_list::{read_i32, ValueList};
use bytes::{Buf, BufMut};

/// A value that can be stored per (key, file) pair.
pub trait IndexValue: Clone + PartialEq + Send + Sync + 'static {
    /// Writes the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode_into(&self, out: &mut Vec<u8>) -> CodecResult<()>;

    /// Reads a value, advancing `input` past it.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is malformed.
    fn decode_from(input: &mut &[u8]) -> CodecResult<Self>;
}

impl IndexValue for ValueList {
    fn encode_into(&self, out: &mut Vec<u8>) -> CodecResult<()> {
        ValueList::encode_into(self, out)
    }

    fn decode_from(input: &mut &[u8]) -> CodecResult<Self> {
        ValueList::decode_from(input)
    }
}

/// Writes `(file_id, value)` entries.
///
/// The caller supplies entries in ascending file id order.
///
/// # Errors
///
/// Returns an error if a file id or value cannot be encoded.
pub fn encode_file_entries<'a, V, I>(entries: I, out: &mut Vec<u8>) -> CodecResult<()>
where
    V: IndexValue,
    I: ExactSizeIterator<Item = (u32, &'a V)>,
{
    let count = i32::try_from(entries.len()).map_err(|_| CodecError::InvalidLength {
        len: entries.len() as i64,
    })?;
    out.put_i32_le(count);

    for (file_id, value) in entries {
        let raw = i32::try_from(file_id).map_err(|_| CodecError::PositionOutOfRange {
            value: i64::from(file_id),
        })?;
        out.put_i32_le(raw);
        value.encode_into(out)?;
    }
    Ok(())
}

/// Reads entries written by [`encode_file_entries`].
///
/// # Errors
///
/// Returns an error if the input is truncated or malformed.
pub fn decode_file_entries<V: IndexValue>(input: &mut &[u8]) -> CodecResult<Vec<(u32, V)>> {
    let count = read_i32(input)?;
    // Each entry needs at least a file id and a one-int value.
    if count < 0 || count as usize > input.remaining() / 8 {
        return Err(CodecError::InvalidLength {
            len: i64::from(count),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let file_id = read_i32(input)?;
        if file_id < 0 {
            return Err(CodecError::PositionOutOfRange {
                value: i64::from(file_id),
            });
        }
        let value = V::decode_from(input)?;
        entries.push((file_id as u32, value));
    }
    Ok(entries)
}
