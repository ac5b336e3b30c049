//! Core type definitions.

use std::fmt;

/// Stable identifier of a source file.
///
/// File ids are assigned once per file by the external file registry and
/// persisted outside the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a new file ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Type tag of a structural entry (function, class, field, ...).
///
/// Tags are assigned by the parser. The index records which tag a key type
/// expects and checks it against the live tree before yielding a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryTag(pub u16);

impl EntryTag {
    /// Creates a new entry tag.
    #[must_use]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Returns the raw tag value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for EntryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag:{}", self.0)
    }
}
