//! Identity resolution cache for Lodestar.
//!
//! Every remote resource a client sees, whether as a full payload, a bare
//! `{type, id}` reference or a client-side draft, gets exactly one
//! [`RecordToken`]. The cache reconciles three addressing schemes into that
//! token:
//! - the local key (`lid`), unique across the process
//! - the external key (`id`), assigned by the server and possibly late
//! - the resource type, which scopes external keys
//!
//! # Components
//!
//! - [`RecordToken`]: the identity object handed to every caller
//! - [`TypeIndex`]: per-type local-key and external-key tables
//! - [`GenerationPolicy`]: produces local keys, fixed per cache
//! - [`IdentityCache`]: resolves, creates, updates, merges and forgets tokens
//! - hooks ([`UpdateHook`], [`ForgetHook`], [`ResetHook`], [`MergeHook`]):
//!   let the host observe or steer identity transitions
//!
//! # Example
//!
//! ```
//! use lodestar_identity::{IdentityCache, IdentityConfig};
//! use lodestar_types::ResourceData;
//!
//! let mut cache = IdentityCache::new(IdentityConfig::default());
//!
//! let draft = cache.create_for_new(&ResourceData::new("person")).unwrap();
//! assert_eq!(draft.external_key(), None);
//!
//! cache.update(&draft, &mut ResourceData::with_only_id("42")).unwrap();
//! let resolved = cache
//!     .resolve(ResourceData::reference("person", "42"), false)
//!     .unwrap();
//! assert_eq!(resolved, Some(draft));
//! ```

mod cache;
mod config;
mod error;
mod generation;
mod hooks;
mod token;
mod type_index;

pub use cache::{IdentityCache, ResourceRef};
pub use config::{IdentityConfig, install_global_config};
pub use error::{IdentityError, IdentityResult};
pub use generation::{
    DefaultGenerationPolicy, GenerationPolicy, LOCAL_KEY_PREFIX, derived_local_key,
    fresh_local_key,
};
pub use hooks::{ForgetHook, KeepExisting, MergeHook, NoopHooks, ResetHook, UpdateHook};
pub use token::{DocumentToken, RecordToken};
pub use type_index::TypeIndex;

pub use lodestar_types::{BucketKind, RequestInfo, ResourceData};
