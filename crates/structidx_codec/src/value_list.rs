//! Compact encoding of position lists.
//!
//! ## Format
//!
//! Every integer is a 4-byte little-endian `i32`:
//!
//! ```text
//! empty        | i32::MAX |
//! singleton    | v |
//! n >= 2       | -n | v0 | v1 | ... | v(n-1) |
//! ```
//!
//! The leading integer alone determines the shape, so decoding reads one
//! integer and then exactly as many more as it announces. `i32::MAX` is
//! reserved as the empty sentinel, which bounds positions to
//! [`MAX_POSITION`].

use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut};
use std::fmt;

/// Sentinel written for an empty list.
pub const EMPTY_SENTINEL: i32 = i32::MAX;

/// Largest position a [`ValueList`] can hold.
pub const MAX_POSITION: u32 = (i32::MAX - 1) as u32;

const INT_SIZE: usize = 4;

/// An ordered set of positions inside one file's structural tree.
///
/// Insertion order is preserved and duplicates are ignored.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ValueList(Vec<u32>);

impl ValueList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a list holding a single position.
    #[must_use]
    pub fn singleton(position: u32) -> Self {
        Self(vec![position])
    }

    /// Appends a position unless it is already present.
    ///
    /// Returns `false` if the position was a duplicate.
    pub fn push(&mut self, position: u32) -> bool {
        if self.0.contains(&position) {
            return false;
        }
        self.0.push(position);
        true
    }

    /// Returns the positions in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Returns the number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the list holds no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `position` is in the list.
    #[must_use]
    pub fn contains(&self, position: u32) -> bool {
        self.0.contains(&position)
    }

    /// Iterates over the positions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// Writes the list in the compact format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::PositionOutOfRange`] if a position exceeds
    /// [`MAX_POSITION`], or [`CodecError::InvalidLength`] if the list is too
    /// long to describe with a negative `i32`.
    pub fn encode_into<B: BufMut>(&self, out: &mut B) -> CodecResult<()> {
        if let Some(&bad) = self.0.iter().find(|&&p| p > MAX_POSITION) {
            return Err(CodecError::PositionOutOfRange {
                value: i64::from(bad),
            });
        }

        match self.0.as_slice() {
            [] => out.put_i32_le(EMPTY_SENTINEL),
            [single] => out.put_i32_le(*single as i32),
            many => {
                let len = i32::try_from(many.len()).map_err(|_| CodecError::InvalidLength {
                    len: many.len() as i64,
                })?;
                out.put_i32_le(-len);
                for &position in many {
                    out.put_i32_le(position as i32);
                }
            }
        }
        Ok(())
    }

    /// Reads a list in the compact format, advancing `input` past it.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated, announces an impossible
    /// size, or contains a negative or repeated element.
    pub fn decode_from<B: Buf>(input: &mut B) -> CodecResult<Self> {
        let head = read_i32(input)?;

        if head == EMPTY_SENTINEL {
            return Ok(Self::new());
        }
        if head >= 0 {
            return Ok(Self::singleton(head as u32));
        }

        let len = -i64::from(head);
        // A list of one is always written as a bare singleton.
        if len < 2 || len as usize > input.remaining() / INT_SIZE {
            return Err(CodecError::InvalidLength { len });
        }

        let mut list = Self(Vec::with_capacity(len as usize));
        for _ in 0..len {
            let value = read_i32(input)?;
            if value < 0 || value == EMPTY_SENTINEL {
                return Err(CodecError::PositionOutOfRange {
                    value: i64::from(value),
                });
            }
            if !list.push(value as u32) {
                return Err(CodecError::DuplicatePosition {
                    value: value as u32,
                });
            }
        }
        Ok(list)
    }
}

impl fmt::Debug for ValueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.0).finish()
    }
}

impl FromIterator<u32> for ValueList {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut list = Self::new();
        for position in iter {
            list.push(position);
        }
        list
    }
}

impl From<Vec<u32>> for ValueList {
    fn from(positions: Vec<u32>) -> Self {
        positions.into_iter().collect()
    }
}

pub(crate) fn read_i32<B: Buf>(input: &mut B) -> CodecResult<i32> {
    if input.remaining() < INT_SIZE {
        return Err(CodecError::UnexpectedEof {
            needed: INT_SIZE,
            remaining: input.remaining(),
        });
    }
    Ok(input.get_i32_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(list: &ValueList) -> Vec<u8> {
        let mut out = Vec::new();
        list.encode_into(&mut out).unwrap();
        out
    }

    #[test]
    fn empty_list_writes_sentinel() {
        assert_eq!(encode(&ValueList::new()), i32::MAX.to_le_bytes());
    }

    #[test]
    fn singleton_writes_bare_value() {
        assert_eq!(encode(&ValueList::singleton(7)), 7i32.to_le_bytes());
    }

    #[test]
    fn list_writes_negated_length_then_values() {
        let bytes = encode(&ValueList::from(vec![4, 0, 9]));
        let mut expected = Vec::new();
        for v in [-3i32, 4, 0, 9] {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(bytes, expected);
    }

    #[test]
    fn push_ignores_duplicates() {
        let mut list = ValueList::new();
        assert!(list.push(3));
        assert!(list.push(1));
        assert!(!list.push(3));
        assert_eq!(list.as_slice(), &[3, 1]);
    }

    #[test]
    fn position_above_max_rejected() {
        let list = ValueList(vec![1, MAX_POSITION + 1]);
        let mut out = Vec::new();
        assert!(matches!(
            list.encode_into(&mut out),
            Err(CodecError::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn truncated_list_rejected() {
        let mut bytes = encode(&ValueList::from(vec![1, 2, 3]));
        bytes.truncate(bytes.len() - 2);
        let result = ValueList::decode_from(&mut bytes.as_slice());
        assert!(matches!(result, Err(CodecError::InvalidLength { len: 3 })));
    }

    #[test]
    fn negative_element_rejected() {
        let mut bytes = Vec::new();
        for v in [-2i32, 5, -8] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let result = ValueList::decode_from(&mut bytes.as_slice());
        assert!(matches!(
            result,
            Err(CodecError::PositionOutOfRange { value: -8 })
        ));
    }

    #[test]
    fn repeated_element_rejected() {
        let mut bytes = Vec::new();
        for v in [-2i32, 5, 5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let result = ValueList::decode_from(&mut bytes.as_slice());
        assert_eq!(result, Err(CodecError::DuplicatePosition { value: 5 }));
    }

    #[test]
    fn length_of_one_rejected() {
        let mut bytes = Vec::new();
        for v in [-1i32, 5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert!(ValueList::decode_from(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn decode_leaves_following_bytes() {
        let mut bytes = encode(&ValueList::from(vec![10, 11]));
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let mut input = bytes.as_slice();
        let list = ValueList::decode_from(&mut input).unwrap();
        assert_eq!(list.as_slice(), &[10, 11]);
        assert_eq!(input, &[0xAA, 0xBB]);
    }

    proptest! {
        #[test]
        fn round_trip(positions in prop::collection::vec(0..=MAX_POSITION, 0..64)) {
            let list: ValueList = positions.into_iter().collect();
            let bytes = encode(&list);
            let mut input = bytes.as_slice();
            let decoded = ValueList::decode_from(&mut input).unwrap();
            prop_assert_eq!(decoded, list);
            prop_assert!(input.is_empty());
        }
    }
}
