//! Cache configuration.
//!
//! An [`IdentityConfig`] bundles the generation policy and the observer
//! hooks. A cache clones the config when it is built, so nothing done to a
//! config afterwards reaches caches that already exist.
//!
//! Hosts that configure once per process install a config with
//! [`install_global_config`]; [`IdentityCache::default`](crate::IdentityCache)
//! picks it up.

use crate::error::{IdentityError, IdentityResult};
use crate::generation::{DefaultGenerationPolicy, GenerationPolicy};
use crate::hooks::{ForgetHook, NoopHooks, ResetHook, UpdateHook};
use std::fmt;
use std::sync::{Arc, OnceLock};

static GLOBAL_CONFIG: OnceLock<IdentityConfig> = OnceLock::new();

/// Generation policy and lifecycle hooks for an identity cache.
#[derive(Clone)]
pub struct IdentityConfig {
    /// Produces local keys for unknown resources.
    pub generation: Arc<dyn GenerationPolicy>,
    /// Observes token updates.
    pub update: Arc<dyn UpdateHook>,
    /// Observes forgotten tokens.
    pub forget: Arc<dyn ForgetHook>,
    /// Observes cache resets.
    pub reset: Arc<dyn ResetHook>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            generation: Arc::new(DefaultGenerationPolicy),
            update: Arc::new(NoopHooks),
            forget: Arc::new(NoopHooks),
            reset: Arc::new(NoopHooks),
        }
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig").finish_non_exhaustive()
    }
}

impl IdentityConfig {
    /// Returns the installed process-wide config, or the default one.
    pub fn global() -> Self {
        GLOBAL_CONFIG.get().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn with_generation(mut self, policy: Arc<dyn GenerationPolicy>) -> Self {
        self.generation = policy;
        self
    }

    #[must_use]
    pub fn with_update_hook(mut self, hook: Arc<dyn UpdateHook>) -> Self {
        self.update = hook;
        self
    }

    #[must_use]
    pub fn with_forget_hook(mut self, hook: Arc<dyn ForgetHook>) -> Self {
        self.forget = hook;
        self
    }

    #[must_use]
    pub fn with_reset_hook(mut self, hook: Arc<dyn ResetHook>) -> Self {
        self.reset = hook;
        self
    }
}

/// Installs the process-wide config. Only the first call succeeds.
pub fn install_global_config(config: IdentityConfig) -> IdentityResult<()> {
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| IdentityError::AlreadyConfigured)
}
