//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the next read.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A list element is outside the encodable position range.
    #[error("position {value} is not encodable")]
    PositionOutOfRange {
        /// The offending value.
        value: i64,
    },

    /// A list repeats a position.
    #[error("duplicate position {value}")]
    DuplicatePosition {
        /// The repeated position.
        value: u32,
    },

    /// A declared length is negative or implausibly large.
    #[error("invalid length: {len}")]
    InvalidLength {
        /// The declared length.
        len: i64,
    },

    /// A key could not be decoded.
    #[error("invalid key bytes: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}
