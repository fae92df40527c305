//! Local key generation.
//!
//! The cache asks a [`GenerationPolicy`] for a local key whenever it cannot
//! find an existing token. The policy is captured when the cache is built and
//! cannot be swapped afterwards, so key derivation stays fixed for the whole
//! session.

use lodestar_types::{BucketKind, ResourceData};
use uuid::Uuid;

/// Prefix of every key produced by [`DefaultGenerationPolicy`].
pub const LOCAL_KEY_PREFIX: &str = "@lid:";

/// Produces the local key for a piece of resource data.
///
/// Implementations must be pure with respect to the data: a key the caller
/// already supplied has to come back unchanged, or the cache rejects it.
pub trait GenerationPolicy: Send + Sync {
    fn generate(&self, data: &ResourceData, bucket: BucketKind) -> String;
}

impl<F> GenerationPolicy for F
where
    F: Fn(&ResourceData, BucketKind) -> String + Send + Sync,
{
    fn generate(&self, data: &ResourceData, bucket: BucketKind) -> String {
        self(data, bucket)
    }
}

/// Passthrough, then `(type, id)` derivation, then a random key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGenerationPolicy;

impl GenerationPolicy for DefaultGenerationPolicy {
    fn generate(&self, data: &ResourceData, _bucket: BucketKind) -> String {
        if let Some(lid) = data.lid() {
            return lid.to_owned();
        }
        match (data.resource_type(), data.id()) {
            (Some(resource_type), Some(id)) => derived_local_key(resource_type, id),
            _ => fresh_local_key(),
        }
    }
}

/// The deterministic key for a server resource, e.g. `@lid:person-1`.
#[must_use]
pub fn derived_local_key(resource_type: &str, external_key: &str) -> String {
    format!("{LOCAL_KEY_PREFIX}{resource_type}-{external_key}")
}

/// A random key, e.g. `@lid:6f1c…`.
#[must_use]
pub fn fresh_local_key() -> String {
    format!("{LOCAL_KEY_PREFIX}{}", Uuid::new_v4())
}
