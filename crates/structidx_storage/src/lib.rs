//! # structidx Storage
//!
//! Byte-level storage backends for the structural index.
//!
//! Every key type of the index keeps its key→value map in an append-only
//! record log. This crate provides the stores those logs live in. Backends
//! are **opaque byte stores**: they never interpret the records written to
//! them, the index core owns the record format.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, replace)
//! - No knowledge of index records, keys, or version markers
//! - Must be `Send + Sync` so an index instance can be shared across threads
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and for key types whose on-disk
//!   storage could not be created
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use structidx_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
