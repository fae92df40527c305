//! The identity cache.
//!
//! Resolution order for a reference:
//!
//! 1. A live token of this cache is returned as is.
//! 2. A supplied local key is looked up in the global table (and its aliases).
//! 3. The type index is searched by local key, then by external key.
//! 4. The generation policy is asked for a key; a key it knows is a hit.
//! 5. Otherwise a token is minted, if the caller asked for one.
//!
//! Updates run merge detection before touching any field. When two tokens
//! turn out to name the same resource the merge hook picks a survivor, the
//! other token goes through the forget path, and its local key becomes an
//! alias of the survivor's.
//!
//! All operations are synchronous and take `&mut self`; hosts that share a
//! cache between threads wrap it in a lock.

use crate::config::IdentityConfig;
use crate::error::{IdentityError, IdentityResult};
use crate::hooks::MergeHook;
use crate::token::{CacheId, DocumentToken, RecordToken};
use crate::type_index::TypeIndex;
use lodestar_types::{BucketKind, RequestInfo, ResourceData};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What a caller hands the cache: a bare reference or a token it already holds.
#[derive(Debug, Clone)]
pub enum ResourceRef {
    Bare(ResourceData),
    Token(RecordToken),
}

impl From<ResourceData> for ResourceRef {
    fn from(data: ResourceData) -> Self {
        Self::Bare(data)
    }
}

impl From<&ResourceData> for ResourceRef {
    fn from(data: &ResourceData) -> Self {
        Self::Bare(data.clone())
    }
}

impl From<RecordToken> for ResourceRef {
    fn from(token: RecordToken) -> Self {
        Self::Token(token)
    }
}

impl From<&RecordToken> for ResourceRef {
    fn from(token: &RecordToken) -> Self {
        Self::Token(token.clone())
    }
}

/// Keys for a token that does not exist yet.
struct Vacancy {
    resource_type: String,
    local_key: String,
    external_key: Option<String>,
}

enum Lookup {
    Found(RecordToken),
    Vacant(Vacancy),
    Absent,
}

/// A token that may name the same resource as the one being updated.
enum Candidate {
    Existing(RecordToken),
    /// Minted for the merge hook to consider; discarded unless it survives.
    Provisional {
        token: RecordToken,
        /// Alias the mint displaced, restored on discard.
        alias: Option<String>,
        /// The mint created the type's index.
        new_type: bool,
    },
}

fn ensure_same_type(token: &RecordToken, data: &ResourceData) -> IdentityResult<()> {
    match data.resource_type() {
        Some(resource_type) if resource_type != token.resource_type() => {
            Err(IdentityError::TypeChanged {
                local_key: token.local_key().to_owned(),
                from: token.resource_type().to_owned(),
                to: resource_type.to_owned(),
            })
        }
        _ => Ok(()),
    }
}

/// Assigns one stable token to every distinct resource.
pub struct IdentityCache {
    id: CacheId,
    config: IdentityConfig,
    merge_hook: Option<Arc<dyn MergeHook>>,
    /// Global local-key table.
    local_keys: HashMap<String, RecordToken>,
    /// Local keys of merged-away tokens, mapped to the survivor's key.
    aliases: HashMap<String, String>,
    types: HashMap<String, TypeIndex>,
    documents: HashMap<String, DocumentToken>,
}

impl Default for IdentityCache {
    /// Builds a cache from the process-wide config.
    fn default() -> Self {
        Self::new(IdentityConfig::global())
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("tokens", &self.local_keys.len())
            .field("types", &self.types.len())
            .field("aliases", &self.aliases.len())
            .field("documents", &self.documents.len())
            .field("merge_hook", &self.merge_hook.is_some())
            .finish()
    }
}

impl IdentityCache {
    /// Creates a cache that snapshots `config`.
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            id: CacheId::new(),
            config,
            merge_hook: None,
            local_keys: HashMap::new(),
            aliases: HashMap::new(),
            types: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    /// Sets the hook that decides merges. Without one, duplicates coexist.
    pub fn set_merge_hook(&mut self, hook: Arc<dyn MergeHook>) {
        self.merge_hook = Some(hook);
    }

    #[must_use]
    pub fn with_merge_hook(mut self, hook: Arc<dyn MergeHook>) -> Self {
        self.set_merge_hook(hook);
        self
    }

    // ── Resolution ───────────────────────────────────────────────

    /// Resolves a reference to its token, minting one when `create` is set.
    ///
    /// Returns `Ok(None)` only when `create` is false and nothing matches.
    pub fn resolve(
        &mut self,
        reference: impl Into<ResourceRef>,
        create: bool,
    ) -> IdentityResult<Option<RecordToken>> {
        let reference = reference.into();
        match self.lookup(&reference, create)? {
            Lookup::Found(token) => Ok(Some(token)),
            Lookup::Vacant(vacancy) if create => self.mint(vacancy, false).map(Some),
            Lookup::Vacant(_) | Lookup::Absent => Ok(None),
        }
    }

    /// Resolves a reference, minting a token if none exists.
    pub fn get_or_create(
        &mut self,
        reference: impl Into<ResourceRef>,
    ) -> IdentityResult<RecordToken> {
        let reference = reference.into();
        match self.lookup(&reference, true)? {
            Lookup::Found(token) => Ok(token),
            Lookup::Vacant(vacancy) => self.mint(vacancy, false),
            Lookup::Absent => Err(IdentityError::MissingType),
        }
    }

    /// Resolves a reference without ever minting a token.
    pub fn peek(
        &self,
        reference: impl Into<ResourceRef>,
    ) -> IdentityResult<Option<RecordToken>> {
        match self.lookup(&reference.into(), false)? {
            Lookup::Found(token) => Ok(Some(token)),
            Lookup::Vacant(_) | Lookup::Absent => Ok(None),
        }
    }

    /// Looks up a token by local key, following merge aliases.
    pub fn peek_local_key(&self, local_key: &str) -> Option<&RecordToken> {
        self.local_keys.get(local_key).or_else(|| {
            self.aliases
                .get(local_key)
                .and_then(|canonical| self.local_keys.get(canonical))
        })
    }

    fn lookup(&self, reference: &ResourceRef, create: bool) -> IdentityResult<Lookup> {
        let data = match reference {
            ResourceRef::Token(token) => {
                self.check_owner(token)?;
                if self.contains(token) {
                    trace!(token = %token, "resolved live token");
                    return Ok(Lookup::Found(token.clone()));
                }
                Cow::Owned(token.to_reference())
            }
            ResourceRef::Bare(data) => Cow::Borrowed(data),
        };

        if let Some(lid) = data.lid() {
            if let Some(token) = self.peek_local_key(lid) {
                trace!(lid, "resolved by local key");
                return Ok(Lookup::Found(token.clone()));
            }
        }

        let external_key = data.id();
        if !create && (data.resource_type().is_none() || external_key.is_none()) {
            return Ok(Lookup::Absent);
        }
        let resource_type = data.resource_type().ok_or(IdentityError::MissingType)?;

        let index = self.types.get(resource_type);
        if let Some(index) = index {
            let hit = data
                .lid()
                .and_then(|lid| index.get_by_local_key(lid))
                .or_else(|| external_key.and_then(|id| index.get_by_external_key(id)));
            if let Some(token) = hit {
                return Ok(Lookup::Found(token.clone()));
            }
        }

        let generated = self.config.generation.generate(&data, BucketKind::Record);
        match data.lid() {
            Some(supplied) if supplied != generated => {
                return Err(IdentityError::LocalKeyRewritten {
                    supplied: supplied.to_owned(),
                    generated,
                });
            }
            Some(_) => {}
            None => {
                if let Some(token) = index.and_then(|i| i.get_by_local_key(&generated)) {
                    return Ok(Lookup::Found(token.clone()));
                }
            }
        }

        Ok(Lookup::Vacant(Vacancy {
            resource_type: resource_type.to_owned(),
            local_key: generated,
            external_key: external_key.map(str::to_owned),
        }))
    }

    fn check_owner(&self, token: &RecordToken) -> IdentityResult<()> {
        if token.owner() == self.id {
            Ok(())
        } else {
            Err(IdentityError::ForeignToken {
                local_key: token.local_key().to_owned(),
            })
        }
    }

    // ── Creation ─────────────────────────────────────────────────

    /// Mints a token for a record created on the client.
    ///
    /// The local key comes from the policy's fresh-key path (the data's
    /// external key is not shown to it). A supplied external key is
    /// registered on the new token and must not already be known.
    pub fn create_for_new(&mut self, data: &ResourceData) -> IdentityResult<RecordToken> {
        let resource_type = data.resource_type().ok_or(IdentityError::MissingType)?;
        if let Some(id) = data.id() {
            let taken = self
                .types
                .get(resource_type)
                .and_then(|index| index.get_by_external_key(id))
                .is_some();
            if taken {
                return Err(IdentityError::ExternalKeyTaken {
                    resource_type: resource_type.to_owned(),
                    external_key: id.to_owned(),
                });
            }
        }

        let local_key = self
            .config
            .generation
            .generate(&data.without_id(), BucketKind::Record);
        if let Some(supplied) = data.lid() {
            if supplied != local_key {
                return Err(IdentityError::LocalKeyRewritten {
                    supplied: supplied.to_owned(),
                    generated: local_key,
                });
            }
        }

        let vacancy = Vacancy {
            resource_type: resource_type.to_owned(),
            local_key,
            external_key: data.id().map(str::to_owned),
        };
        self.mint(vacancy, true)
    }

    fn mint(&mut self, vacancy: Vacancy, client_originated: bool) -> IdentityResult<RecordToken> {
        if self.local_keys.contains_key(&vacancy.local_key) {
            return Err(IdentityError::LocalKeyCollision {
                local_key: vacancy.local_key,
            });
        }

        let token = RecordToken::mint(
            self.id,
            vacancy.resource_type,
            vacancy.local_key,
            vacancy.external_key,
            client_originated,
        );
        self.aliases.remove(token.local_key());
        self.local_keys.insert(token.local_key().to_owned(), token.clone());
        let displaced = self
            .types
            .entry(token.resource_type().to_owned())
            .or_default()
            .insert(token.clone());
        if let Some(previous) = displaced {
            warn!(
                token = %token,
                previous = %previous,
                id = ?token.external_key(),
                "external key already mapped to another token; newest token wins"
            );
        }

        debug!(
            token = %token,
            id = ?token.external_key(),
            client_originated,
            "minted record token"
        );
        Ok(token)
    }

    // ── Update & merge ───────────────────────────────────────────

    /// Applies incoming data to a token, merging duplicates first.
    ///
    /// Returns the token that now holds the identity, which differs from the
    /// resolved one when a merge kept the other token. On merge, `data.lid`
    /// is rewritten to the survivor's local key. A merge whose survivor
    /// cannot take `data` is rejected before anything is forgotten.
    pub fn update(
        &mut self,
        reference: impl Into<ResourceRef>,
        data: &mut ResourceData,
    ) -> IdentityResult<RecordToken> {
        let mut token = self.get_or_create(reference)?;

        if let Some(hook) = self.merge_hook.clone() {
            if let Some(candidate) = self.detect_merge(&token, data)? {
                token = self.merge(hook.as_ref(), token, candidate, data)?;
            }
        }

        self.apply_update(&token, data)?;
        Ok(token)
    }

    fn detect_merge(
        &mut self,
        token: &RecordToken,
        data: &ResourceData,
    ) -> IdentityResult<Option<Candidate>> {
        let incoming_type = data.resource_type().unwrap_or(token.resource_type());
        let incoming_id = data.id();
        let current_id = token.external_key();

        // A new external key that some other token already claims. A token
        // with no external key yet falls through to the checks below.
        if let Some(id) = incoming_id.filter(|id| current_id != Some(*id)) {
            let hit = self
                .types
                .get(token.resource_type())
                .and_then(|index| index.get_by_external_key(id))
                .filter(|candidate| *candidate != token)
                .cloned();
            if hit.is_some() || current_id.is_some() {
                return Ok(hit.map(Candidate::Existing));
            }
        }

        let existing = if incoming_type != token.resource_type() {
            let same_keys = current_id.is_some()
                && current_id == incoming_id
                && data.lid() == Some(token.local_key());
            match incoming_id {
                // Reclassified under the same keys: look in the other type's index.
                Some(id) if same_keys => self
                    .types
                    .get(incoming_type)
                    .and_then(|index| index.get_by_external_key(id))
                    .cloned(),
                _ => {
                    let separate = ResourceRef::Bare(data.without_lid().with_type(incoming_type));
                    return match self.lookup(&separate, true)? {
                        Lookup::Found(found) => Ok(Some(Candidate::Existing(found))),
                        Lookup::Vacant(vacancy) => self.mint_provisional(vacancy).map(Some),
                        Lookup::Absent => Ok(None),
                    };
                }
            }
        } else if current_id.is_some() && current_id == incoming_id {
            // Same external key under another local key.
            data.lid()
                .filter(|lid| *lid != token.local_key())
                .and_then(|lid| self.peek_local_key(lid))
                .cloned()
        } else {
            None
        };

        Ok(existing
            .filter(|candidate| candidate != token)
            .map(Candidate::Existing))
    }

    fn mint_provisional(&mut self, vacancy: Vacancy) -> IdentityResult<Candidate> {
        let alias = self.aliases.get(&vacancy.local_key).cloned();
        let new_type = !self.types.contains_key(&vacancy.resource_type);
        let token = self.mint(vacancy, false)?;
        Ok(Candidate::Provisional {
            token,
            alias,
            new_type,
        })
    }

    fn merge(
        &mut self,
        hook: &dyn MergeHook,
        current: RecordToken,
        candidate: Candidate,
        data: &mut ResourceData,
    ) -> IdentityResult<RecordToken> {
        let (candidate, provisional) = match candidate {
            Candidate::Existing(token) => (token, None),
            Candidate::Provisional {
                token,
                alias,
                new_type,
            } => (token, Some((alias, new_type))),
        };

        let decision = Self::decide_merge(hook, &current, &candidate, data);
        if let Some((alias, new_type)) = provisional {
            if !matches!(&decision, Ok(Some(kept)) if *kept == candidate) {
                self.discard(&candidate, alias, new_type);
            }
        }

        match decision? {
            Some(kept) => Ok(self.commit_merge(current, candidate, kept, data)),
            None => Ok(current),
        }
    }

    /// Asks the hook for a survivor and checks that it can take `data`.
    /// Nothing is changed here, so a rejected merge leaves both tokens intact.
    fn decide_merge(
        hook: &dyn MergeHook,
        current: &RecordToken,
        candidate: &RecordToken,
        data: &ResourceData,
    ) -> IdentityResult<Option<RecordToken>> {
        let Some(kept) = hook.merge(current, candidate, data) else {
            debug!(current = %current, candidate = %candidate, "merge declined");
            ensure_same_type(current, data)?;
            return Ok(None);
        };
        if kept != *current && kept != *candidate {
            return Err(IdentityError::UnknownSurvivor {
                local_key: kept.local_key().to_owned(),
            });
        }
        ensure_same_type(&kept, data)?;
        Ok(Some(kept))
    }

    fn commit_merge(
        &mut self,
        current: RecordToken,
        candidate: RecordToken,
        kept: RecordToken,
        data: &mut ResourceData,
    ) -> RecordToken {
        let abandoned = if kept == current {
            candidate.clone()
        } else {
            current.clone()
        };
        debug!(kept = %kept, abandoned = %abandoned, "merging record tokens");

        for target in self.aliases.values_mut() {
            if target.as_str() == abandoned.local_key() {
                *target = kept.local_key().to_owned();
            }
        }
        self.forget_token(&abandoned);
        self.aliases
            .insert(abandoned.local_key().to_owned(), kept.local_key().to_owned());

        let external_key = data.id().or(kept.external_key()).map(str::to_owned);
        if let Some(id) = external_key {
            for resource_type in [current.resource_type(), candidate.resource_type()] {
                self.types
                    .entry(resource_type.to_owned())
                    .or_default()
                    .set_external_key(id.clone(), kept.clone());
            }
        }

        data.lid = Some(kept.local_key().to_owned());
        kept
    }

    /// Drops a token that was minted only to be offered to the merge hook.
    /// The forget hook does not run for it.
    fn discard(&mut self, token: &RecordToken, alias: Option<String>, new_type: bool) {
        if new_type {
            self.types.remove(token.resource_type());
        } else if let Some(index) = self.types.get_mut(token.resource_type()) {
            index.remove(token);
        }
        self.local_keys.remove(token.local_key());
        if let Some(target) = alias {
            self.aliases.insert(token.local_key().to_owned(), target);
        }
        token.retire();
        trace!(token = %token, "discarded unmerged token");
    }

    fn apply_update(&mut self, token: &RecordToken, data: &ResourceData) -> IdentityResult<()> {
        if let Some(lid) = data.lid() {
            let same = lid == token.local_key()
                || self.aliases.get(lid).map(String::as_str) == Some(token.local_key());
            if !same {
                return Err(IdentityError::LocalKeyChanged {
                    local_key: token.local_key().to_owned(),
                    attempted: lid.to_owned(),
                });
            }
        }
        ensure_same_type(token, data)?;

        if let Some(id) = data.id() {
            match token.external_key() {
                None => self.assign_external_key(token, id),
                Some(current) if current != id => {
                    warn!(
                        token = %token,
                        current,
                        attempted = id,
                        "external key of a token cannot be reassigned; keeping the original"
                    );
                }
                Some(_) => {}
            }
        }

        self.config.update.on_update(token, data, BucketKind::Record);
        Ok(())
    }

    fn assign_external_key(&mut self, token: &RecordToken, id: &str) {
        if let Err(rejected) = token.assign_external_key(id.to_owned()) {
            warn!(token = %token, attempted = %rejected, "external key already assigned");
            return;
        }
        let displaced = self
            .types
            .entry(token.resource_type().to_owned())
            .or_default()
            .set_external_key(id.to_owned(), token.clone());
        match displaced {
            Some(previous) if previous != *token => {
                warn!(
                    token = %token,
                    previous = %previous,
                    id,
                    "external key already mapped to another token; newest token wins"
                );
            }
            _ => debug!(token = %token, id, "assigned external key"),
        }
    }

    // ── Forget & reset ───────────────────────────────────────────

    /// Removes a token from every table and retires it.
    ///
    /// Returns `false` when the reference resolves to nothing, including a
    /// token that was already forgotten.
    pub fn forget(&mut self, reference: impl Into<ResourceRef>) -> IdentityResult<bool> {
        let reference = reference.into();
        let token = match &reference {
            ResourceRef::Token(token) => {
                self.check_owner(token)?;
                if !self.contains(token) {
                    return Ok(false);
                }
                token.clone()
            }
            ResourceRef::Bare(_) => match self.lookup(&reference, false)? {
                Lookup::Found(token) => token,
                Lookup::Vacant(_) | Lookup::Absent => return Ok(false),
            },
        };
        self.forget_token(&token);
        Ok(true)
    }

    fn forget_token(&mut self, token: &RecordToken) {
        if let Some(index) = self.types.get_mut(token.resource_type()) {
            index.remove(token);
        }
        if self.local_keys.get(token.local_key()) == Some(token) {
            self.local_keys.remove(token.local_key());
        }
        self.aliases.retain(|_, target| target.as_str() != token.local_key());
        token.retire();

        debug!(token = %token, "forgot record token");
        self.config.forget.on_forget(token, BucketKind::Record);
    }

    /// Discards all state. Every outstanding token stops being live.
    pub fn reset(&mut self) {
        self.config.reset.on_reset();
        for token in self.local_keys.values() {
            token.retire();
        }
        debug!(tokens = self.local_keys.len(), "reset identity cache");
        self.local_keys.clear();
        self.aliases.clear();
        self.types.clear();
        self.documents.clear();
    }

    // ── Documents ────────────────────────────────────────────────

    /// Returns the stable document token for a cacheable request.
    pub fn resolve_document(&mut self, request: &RequestInfo) -> Option<DocumentToken> {
        let key = request.document_key()?;
        let token = self.documents.entry(key.to_owned()).or_insert_with(|| {
            debug!(key, "minted document token");
            DocumentToken::new(key)
        });
        Some(token.clone())
    }

    pub fn peek_document(&self, request: &RequestInfo) -> Option<DocumentToken> {
        request
            .document_key()
            .and_then(|key| self.documents.get(key))
            .cloned()
    }

    // ── Introspection ────────────────────────────────────────────

    /// True if `token` is a live token of this cache.
    pub fn contains(&self, token: &RecordToken) -> bool {
        self.local_keys.get(token.local_key()) == Some(token)
    }

    /// Live tokens of a type, in creation order.
    pub fn tokens_of_type<'a>(
        &'a self,
        resource_type: &str,
    ) -> impl Iterator<Item = &'a RecordToken> + use<'a> {
        self.types
            .get(resource_type)
            .into_iter()
            .flat_map(|index| index.iter())
    }

    /// Read-only view of a type's tables.
    pub fn type_index(&self, resource_type: &str) -> Option<&TypeIndex> {
        self.types.get(resource_type)
    }

    /// Every type seen so far.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of live record tokens.
    pub fn len(&self) -> usize {
        self.local_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_keys.is_empty()
    }
}
