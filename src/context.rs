//! Provider chain and constructor registry bundled as one explicit context.

use std::sync::{Arc, OnceLock};

use crate::binder::{Binder, Template};
use crate::error::ConfigError;
use crate::provider::{Provider, ProviderChain};
use crate::registry::{Implementation, Registry};

/// Everything a binder resolves against.
///
/// Tests build isolated contexts with [`Context::new`]; applications usually
/// share [`Context::global`].
#[derive(Default)]
pub struct Context {
    providers: ProviderChain,
    registry: Registry,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide default context.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Context>> = OnceLock::new();
        GLOBAL.get_or_init(Context::new).clone()
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.providers
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Append a provider to the chain (no-op if already present).
    pub fn add_provider(&self, provider: Arc<dyn Provider>) {
        self.providers.add(provider);
    }

    /// Register an implementation of a capability.
    pub fn register<I: Implementation>(&self, name: &str) -> Result<(), ConfigError> {
        self.registry.register::<I>(name)
    }

    /// Bind template `T` and run its first load.
    pub fn add<T: Template>(self: &Arc<Self>) -> Result<Binder<T>, ConfigError> {
        Binder::add(self)
    }
}
