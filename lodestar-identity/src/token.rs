//! Identity tokens.
//!
//! A [`RecordToken`] is a cheap handle to one shared identity object. Two
//! handles are equal only when they point at the same object, which is the
//! guarantee callers rely on: once the cache hands out a token for a local
//! key, every later resolution of that key returns that very object.

use lodestar_types::ResourceData;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Identifies the cache instance that minted a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CacheId(Uuid);

impl CacheId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

struct TokenInner {
    local_key: String,
    resource_type: String,
    /// Set at most once; later assignments are rejected by the cell.
    external_key: OnceLock<String>,
    client_originated: bool,
    live: AtomicBool,
    owner: CacheId,
}

/// The canonical identity of one resource.
///
/// Fields are read-only from the outside. The local key and type never
/// change; the external key goes from absent to present at most once.
#[derive(Clone)]
pub struct RecordToken(Arc<TokenInner>);

impl RecordToken {
    pub(crate) fn mint(
        owner: CacheId,
        resource_type: String,
        local_key: String,
        external_key: Option<String>,
        client_originated: bool,
    ) -> Self {
        Self(Arc::new(TokenInner {
            local_key,
            resource_type,
            external_key: external_key.map(OnceLock::from).unwrap_or_default(),
            client_originated,
            live: AtomicBool::new(true),
            owner,
        }))
    }

    /// The process-local key. Unique across all types.
    #[must_use]
    pub fn local_key(&self) -> &str {
        &self.0.local_key
    }

    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.0.resource_type
    }

    /// The server-assigned key, once known.
    #[must_use]
    pub fn external_key(&self) -> Option<&str> {
        self.0.external_key.get().map(String::as_str)
    }

    /// True for tokens minted for client-created records.
    #[must_use]
    pub fn is_client_originated(&self) -> bool {
        self.0.client_originated
    }

    /// False once the token has been forgotten, merged away or reset.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::Acquire)
    }

    /// A bare reference carrying this token's keys.
    #[must_use]
    pub fn to_reference(&self) -> ResourceData {
        ResourceData {
            resource_type: Some(self.0.resource_type.clone()),
            id: self.external_key().map(str::to_owned),
            lid: Some(self.0.local_key.clone()),
        }
    }

    pub(crate) fn owner(&self) -> CacheId {
        self.0.owner
    }

    /// Returns the rejected key if an external key is already set.
    pub(crate) fn assign_external_key(&self, key: String) -> Result<(), String> {
        self.0.external_key.set(key)
    }

    pub(crate) fn retire(&self) {
        self.0.live.store(false, Ordering::Release);
    }
}

impl PartialEq for RecordToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RecordToken {}

impl Hash for RecordToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for RecordToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordToken")
            .field("lid", &self.0.local_key)
            .field("type", &self.0.resource_type)
            .field("id", &self.external_key())
            .field("live", &self.is_live())
            .finish()
    }
}

impl fmt::Display for RecordToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.resource_type, self.0.local_key)
    }
}

/// The stable identity of a cacheable request.
#[derive(Clone)]
pub struct DocumentToken(Arc<str>);

impl DocumentToken {
    pub(crate) fn new(key: &str) -> Self {
        Self(Arc::from(key))
    }

    /// The cache key or URL this document is stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DocumentToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DocumentToken {}

impl fmt::Debug for DocumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentToken").field(&&*self.0).finish()
    }
}
