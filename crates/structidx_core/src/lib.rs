//! # structidx Core
//!
//! Persistent structural index for large codebases.
//!
//! This crate provides:
//! - The index registry with startup version checks and orphan cleanup
//! - Per key type index instances (record log, write buffer, locking)
//! - Reconciliation of stored positions against live file structure
//! - The rebuild controller that recovers from stale or broken data
//!
//! Parsing, file identity and scheduling are supplied by the host through
//! the traits in [`external`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod config;
mod dir;
mod error;
pub mod external;
mod instance;
mod key_type;
mod manifest;
mod rebuild;
pub mod reconcile;
mod registry;
mod stats;
pub mod storage;
mod types;
mod version;

pub use checksum::compute_crc32;
pub use config::{ExecutionMode, IndexConfig, DETERMINISTIC_ENV, FORCE_CLEAN_ENV};
pub use dir::IndexDir;
pub use error::{CoreError, CoreResult, FailureKind, QueryError};
pub use external::{
    CancellationToken, Collaborators, FileHandle, FileRegistry, FileSetScope, GlobalScope,
    IndexingScheduler, SearchScope, StructuralEntry, StructuralParser, StructuralTree,
};
pub use instance::IndexInstance;
pub use key_type::{Declaration, IndexKey, KeyType};
pub use manifest::KeyTypeManifest;
pub use rebuild::{RebuildCause, RebuildController, RebuildState};
pub use reconcile::{Descriptor, ScanOutcome, StructuralPositions};
pub use registry::IndexRegistry;
pub use stats::{IndexStats, IndexStatsSnapshot};
pub use storage::FileMap;
pub use structidx_codec::{IndexValue, ValueList};
pub use types::{EntryTag, FileId};
pub use version::VersionMarker;
