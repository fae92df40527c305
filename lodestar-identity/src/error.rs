//! Error types for the identity cache.
//!
//! Every variant is a contract violation: a programming error on the caller's
//! or a hook's side, reported at the call that triggered it. Recoverable
//! inconsistencies are logged instead, and "no identity yet" is `Ok(None)`.

use thiserror::Error;

/// Result type for identity cache operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur in identity cache operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The token was minted by a different cache instance.
    #[error("token {local_key} belongs to a different identity cache")]
    ForeignToken { local_key: String },

    /// Creation was required but no resource type was supplied.
    #[error("a non-empty resource type is required to create an identity")]
    MissingType,

    /// The generation policy returned a different key than the caller supplied.
    #[error("generation policy rewrote local key {supplied} to {generated}")]
    LocalKeyRewritten { supplied: String, generated: String },

    /// A newly minted local key is already in use.
    #[error("local key {local_key} is already in use")]
    LocalKeyCollision { local_key: String },

    /// An update tried to change a token's local key.
    #[error("cannot change local key of {local_key} to {attempted}")]
    LocalKeyChanged { local_key: String, attempted: String },

    /// An update tried to change a token's resource type.
    #[error("cannot change type of {local_key} from {from} to {to}")]
    TypeChanged {
        local_key: String,
        from: String,
        to: String,
    },

    /// A new record was requested for an external key that is already known.
    #[error("{resource_type}:{external_key} already has an identity")]
    ExternalKeyTaken {
        resource_type: String,
        external_key: String,
    },

    /// The merge hook returned a token that took no part in the merge.
    #[error("merge hook chose {local_key}, which is neither merge participant")]
    UnknownSurvivor { local_key: String },

    /// The process-wide configuration was already installed.
    #[error("identity configuration is already installed")]
    AlreadyConfigured,
}
