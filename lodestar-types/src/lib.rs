//! Input types for the Lodestar identity cache.
//!
//! This crate defines the plain, collaborator-facing shapes the cache reads:
//! - [`ResourceData`]: a bare reference or a full resource payload (`type`, `id`, `lid`)
//! - [`RequestInfo`]: the parts of an outgoing request that give it a document identity
//! - [`BucketKind`]: the identity namespace a key is generated for
//!
//! Everything the cache ignores (attributes, relationships, meta) is dropped
//! when a payload is parsed into these types.

mod bucket;
mod request;
mod resource;

pub use bucket::BucketKind;
pub use request::RequestInfo;
pub use resource::{ResourceData, coerce_id};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading resource payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid resource: {0}")]
    InvalidResource(String),
}
