//! Key types and index keys.
//!
//! A [`KeyType`] names one category of the index ("class names", "function
//! names") and is the typed handle used to reach its instance. Handles are
//! matched by name and version, so two separately built handles with the
//! same declaration reach the same instance.

use crate::error::{CoreError, CoreResult};
use crate::instance::IndexInstance;
use crate::registry::{InstanceContext, OpenedIndex};
use crate::types::EntryTag;
use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use structidx_codec::{IndexValue, ValueList};

/// A key that can be indexed.
///
/// Keys are compared by equality and hash only; the ordering is used to
/// return key listings in a stable order.
pub trait IndexKey: Clone + Eq + Hash + Ord + Send + Sync + 'static {
    /// Serializes the key to bytes.
    fn to_bytes(&self) -> Vec<u8>;

    /// Deserializes the key from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not form a valid key.
    fn from_bytes(bytes: &[u8]) -> CoreResult<Self>;
}

impl IndexKey for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::invalid_format("invalid UTF-8 key"))
    }
}

impl IndexKey for i64 {
    fn to_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_format("expected 8 bytes for i64 key"))?;
        Ok(i64::from_be_bytes(arr))
    }
}

impl IndexKey for u32 {
    fn to_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_format("expected 4 bytes for u32 key"))?;
        Ok(u32::from_be_bytes(arr))
    }
}

impl IndexKey for Vec<u8> {
    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok(bytes.to_vec())
    }
}

struct KeyTypeInner<K: IndexKey, V: IndexValue> {
    name: String,
    version: i32,
    entry_tag: Option<EntryTag>,
    marker: std::marker::PhantomData<fn() -> (K, V)>,
}

/// Typed handle for one index category.
///
/// Cloning is cheap. Any handle with the declared name and version reaches
/// the declared instance.
///
/// ```
/// use structidx_core::{EntryTag, KeyType};
///
/// let functions: KeyType<String> = KeyType::new("fn.names", 2).with_entry_tag(EntryTag::new(1));
/// assert_eq!(functions.name(), "fn.names");
/// assert_eq!(functions.version(), 2);
/// ```
pub struct KeyType<K: IndexKey, V: IndexValue = ValueList> {
    inner: Arc<KeyTypeInner<K, V>>,
}

impl<K: IndexKey, V: IndexValue> KeyType<K, V> {
    /// Creates a key type with a schema version.
    ///
    /// Bump the version whenever the meaning or encoding of stored values
    /// changes; existing on-disk data is then discarded at startup.
    #[must_use]
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Self {
            inner: Arc::new(KeyTypeInner {
                name: name.into(),
                version,
                entry_tag: None,
                marker: std::marker::PhantomData,
            }),
        }
    }

    /// Returns a key type whose entries must carry `tag` in the live tree.
    #[must_use]
    pub fn with_entry_tag(self, tag: EntryTag) -> Self {
        Self {
            inner: Arc::new(KeyTypeInner {
                name: self.inner.name.clone(),
                version: self.inner.version,
                entry_tag: Some(tag),
                marker: std::marker::PhantomData,
            }),
        }
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the declared schema version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.inner.version
    }

    /// Returns the tag indexed entries must carry, if any.
    #[must_use]
    pub fn entry_tag(&self) -> Option<EntryTag> {
        self.inner.entry_tag
    }

    /// Returns the declaration passed to
    /// [`IndexRegistry::initialize`](crate::IndexRegistry::initialize).
    #[must_use]
    pub fn declaration(&self) -> Declaration {
        let key_type = self.clone();
        Declaration {
            name: self.inner.name.clone(),
            version: self.inner.version,
            open: Box::new(move |ctx: &InstanceContext| {
                let opened = IndexInstance::open(ctx, &key_type);
                let typed: Arc<dyn Any + Send + Sync> = opened.instance.clone();
                OpenedIndex {
                    managed: opened.instance,
                    typed,
                    storage_failure: opened.storage_failure,
                }
            }),
        }
    }
}

impl<K: IndexKey, V: IndexValue> Clone for KeyType<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: IndexKey, V: IndexValue> fmt::Debug for KeyType<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyType")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("entry_tag", &self.inner.entry_tag)
            .finish()
    }
}

type Opener = Box<dyn FnOnce(&InstanceContext) -> OpenedIndex + Send>;

/// A key type as declared to the registry.
///
/// Obtained from [`KeyType::declaration`].
pub struct Declaration {
    name: String,
    version: i32,
    open: Opener,
}

impl Declaration {
    /// Returns the declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    pub(crate) fn open(self, ctx: &InstanceContext) -> OpenedIndex {
        (self.open)(ctx)
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
