//! Per-type lookup tables.

use crate::RecordToken;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Lookup tables for the tokens of one resource type.
///
/// The local-key table doubles as the ordered "all tokens" collection:
/// iteration yields tokens in the order they were minted, and removal keeps
/// that order for the rest.
#[derive(Debug, Default)]
pub struct TypeIndex {
    by_local_key: IndexMap<String, RecordToken>,
    by_external_key: HashMap<String, RecordToken>,
}

impl TypeIndex {
    pub fn get_by_local_key(&self, local_key: &str) -> Option<&RecordToken> {
        self.by_local_key.get(local_key)
    }

    /// Looks up a live token by external key. Entries left behind by merges
    /// for tokens that were later forgotten are skipped.
    pub fn get_by_external_key(&self, external_key: &str) -> Option<&RecordToken> {
        self.by_external_key
            .get(external_key)
            .filter(|token| token.is_live())
    }

    /// Tokens of this type, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RecordToken> {
        self.by_local_key.values()
    }

    pub fn len(&self) -> usize {
        self.by_local_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local_key.is_empty()
    }

    /// Adds a token. Returns the token previously registered under the same
    /// external key, if any.
    pub(crate) fn insert(&mut self, token: RecordToken) -> Option<RecordToken> {
        let displaced = token
            .external_key()
            .map(str::to_owned)
            .and_then(|key| self.set_external_key(key, token.clone()));
        self.by_local_key.insert(token.local_key().to_owned(), token);
        displaced
    }

    /// Points `external_key` at `token`, returning the live token it replaced.
    pub(crate) fn set_external_key(
        &mut self,
        external_key: String,
        token: RecordToken,
    ) -> Option<RecordToken> {
        self.by_external_key
            .insert(external_key, token)
            .filter(|previous| previous.is_live())
    }

    /// Removes a token from both tables. The external-key entry is only
    /// dropped when it still points at this token.
    pub(crate) fn remove(&mut self, token: &RecordToken) -> bool {
        if let Some(key) = token.external_key() {
            if self.by_external_key.get(key) == Some(token) {
                self.by_external_key.remove(key);
            }
        }
        self.by_local_key.shift_remove(token.local_key()).is_some()
    }
}
