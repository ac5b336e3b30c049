//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one key type's record log.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the OS, `sync` makes it durable
/// - `replace_contents` swaps the whole content atomically: a reader of the
///   store after a crash sees either the old bytes or the new bytes
///
/// # Implementors
///
/// - [`super::InMemoryBackend`]
/// - [`super::FileBackend`]
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is also the offset of the
    /// next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to drop a torn tail after a crash and to wipe a key type during
    /// a rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire content with `data`.
    ///
    /// Used by log compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content cannot be written.
    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()>;
}
