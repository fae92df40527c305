//! Lifecycle hooks.
//!
//! Hooks let the host watch identity transitions without the cache knowing
//! anything about the host. Every hook is optional: the update, forget and
//! reset hooks default to [`NoopHooks`], and a cache without a merge hook
//! never merges.
//!
//! Closures with the matching signature implement each trait, so a host can
//! pass `Arc::new(|token: &RecordToken, _| ...)` directly.

use crate::RecordToken;
use lodestar_types::{BucketKind, ResourceData};

/// Called after a token has been updated from incoming data.
pub trait UpdateHook: Send + Sync {
    fn on_update(&self, token: &RecordToken, data: &ResourceData, bucket: BucketKind);
}

/// Called after a token has been removed from the cache.
pub trait ForgetHook: Send + Sync {
    fn on_forget(&self, token: &RecordToken, bucket: BucketKind);
}

/// Called when the whole cache is reset.
pub trait ResetHook: Send + Sync {
    fn on_reset(&self);
}

/// Picks the survivor when two tokens turn out to be the same resource.
pub trait MergeHook: Send + Sync {
    /// Returns the token to keep (either `current` or `candidate`), or
    /// `None` to leave both in place.
    fn merge(
        &self,
        current: &RecordToken,
        candidate: &RecordToken,
        data: &ResourceData,
    ) -> Option<RecordToken>;
}

impl<F> UpdateHook for F
where
    F: Fn(&RecordToken, &ResourceData, BucketKind) + Send + Sync,
{
    fn on_update(&self, token: &RecordToken, data: &ResourceData, bucket: BucketKind) {
        self(token, data, bucket);
    }
}

impl<F> ForgetHook for F
where
    F: Fn(&RecordToken, BucketKind) + Send + Sync,
{
    fn on_forget(&self, token: &RecordToken, bucket: BucketKind) {
        self(token, bucket);
    }
}

impl<F> ResetHook for F
where
    F: Fn() + Send + Sync,
{
    fn on_reset(&self) {
        self();
    }
}

impl<F> MergeHook for F
where
    F: Fn(&RecordToken, &RecordToken, &ResourceData) -> Option<RecordToken> + Send + Sync,
{
    fn merge(
        &self,
        current: &RecordToken,
        candidate: &RecordToken,
        data: &ResourceData,
    ) -> Option<RecordToken> {
        self(current, candidate, data)
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl UpdateHook for NoopHooks {
    fn on_update(&self, _token: &RecordToken, _data: &ResourceData, _bucket: BucketKind) {}
}

impl ForgetHook for NoopHooks {
    fn on_forget(&self, _token: &RecordToken, _bucket: BucketKind) {}
}

impl ResetHook for NoopHooks {
    fn on_reset(&self) {}
}

/// Merge hook that always keeps the token that already held the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepExisting;

impl MergeHook for KeepExisting {
    fn merge(
        &self,
        _current: &RecordToken,
        candidate: &RecordToken,
        _data: &ResourceData,
    ) -> Option<RecordToken> {
        Some(candidate.clone())
    }
}
