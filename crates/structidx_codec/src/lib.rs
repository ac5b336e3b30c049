//! # structidx Codec
//!
//! Compact encodings for the values stored in the structural index.
//!
//! An index value is a list of positions into one file's structural tree.
//! Almost every list is empty or has a single element, so the format spends
//! one integer on those shapes and only pays for a length prefix when a file
//! contributes several positions to the same key.
//!
//! The format is an internal storage detail of the index, not a
//! cross-process contract. The only law it must satisfy is the round trip:
//! decoding an encoded list yields the original list.
//!
//! ## Usage
//!
//! ```
//! use structidx_codec::ValueList;
//!
//! let list = ValueList::from(vec![3, 8, 21]);
//! let mut bytes = Vec::new();
//! list.encode_into(&mut bytes).unwrap();
//!
//! let decoded = ValueList::decode_from(&mut bytes.as_slice()).unwrap();
//! assert_eq!(decoded, list);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file_map;
mod value_list;

pub use error::{CodecError, CodecResult};
pub use file_map::{decode_file_entries, encode_file_entries, IndexValue};
pub use value_list::{ValueList, EMPTY_SENTINEL, MAX_POSITION};
