//! Error types for the structural index.
//!
//! Inside the crate every fallible step returns [`CoreResult`]. At the public
//! query boundary these errors are absorbed: storage failures are routed to
//! the [`crate::RebuildController`] and the query degrades to fewer or no
//! results. The only error a query caller ever sees is [`QueryError`].

use crate::types::FileId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure taxonomy used for remediation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// On-disk schema version differs from the declared one.
    VersionMismatch,
    /// Stored index data cannot be read back.
    StorageCorruption,
    /// A stored position no longer matches the file's live structure.
    ReconciliationDrift,
    /// A collaborator could not supply a file or its structure.
    ResourceUnavailable,
}

/// Errors that can occur in index core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] structidx_storage::StorageError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] structidx_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted version marker does not match the declared version.
    #[error("version mismatch for {key_type}: declared {declared}, found {found:?}")]
    VersionMismatch {
        /// Key type name.
        key_type: String,
        /// Version declared in code.
        declared: i32,
        /// Version found on disk, if any.
        found: Option<i32>,
    },

    /// Stored index data is corrupted.
    #[error("storage corruption: {message}")]
    StorageCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A stored position does not fit the live structural tree.
    #[error("reconciliation drift in file {file_id}: position {position}, tree has {tree_len} entries")]
    ReconciliationDrift {
        /// File whose tree drifted.
        file_id: FileId,
        /// Stored position.
        position: u32,
        /// Length of the live tree.
        tree_len: usize,
    },

    /// A collaborator could not supply a resource.
    #[error("resource unavailable: {message}")]
    ResourceUnavailable {
        /// Description of the missing resource.
        message: String,
    },

    /// Another registry holds the index directory.
    #[error("index directory locked: another registry has exclusive access")]
    IndexLocked,

    /// A declared key type is unusable.
    #[error("invalid key type {name:?}: {reason}")]
    InvalidKeyType {
        /// Declared name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A metadata file has an invalid format.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a storage corruption error.
    pub fn storage_corruption(message: impl Into<String>) -> Self {
        Self::StorageCorruption {
            message: message.into(),
        }
    }

    /// Creates a resource unavailable error.
    pub fn resource_unavailable(message: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid key type error.
    pub fn invalid_key_type(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyType {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Classifies this error for remediation.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::VersionMismatch { .. } => FailureKind::VersionMismatch,
            Self::ReconciliationDrift { .. } => FailureKind::ReconciliationDrift,
            Self::ResourceUnavailable { .. } => FailureKind::ResourceUnavailable,
            Self::Storage(_)
            | Self::Codec(_)
            | Self::Io(_)
            | Self::StorageCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::IndexLocked
            | Self::InvalidKeyType { .. }
            | Self::InvalidFormat { .. } => FailureKind::StorageCorruption,
        }
    }
}

/// The error a query caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The caller cancelled the scan.
    #[error("query cancelled")]
    Cancelled,
}
