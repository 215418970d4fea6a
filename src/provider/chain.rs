//! Ordered provider chain with first-hit resolution.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::ConfigError;
use crate::provider::{Notifier, Provider};
use crate::reference::Reference;

/// A value found by the chain, with the provider that answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub provider: String,
    pub value: Value,
}

/// Ordered, mutable list of providers.
#[derive(Default)]
pub struct ProviderChain {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider unless this exact instance is already in the chain.
    pub fn add(&self, provider: Arc<dyn Provider>) {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        if providers.iter().any(|existing| Arc::ptr_eq(existing, &provider)) {
            return;
        }
        tracing::debug!(
            provider = %provider.name(),
            position = providers.len(),
            "Config source added"
        );
        providers.push(provider);
    }

    /// Remove all providers.
    pub fn reset(&self) {
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!("All config sources removed");
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Provider names in resolution order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name().to_string()).collect()
    }

    /// Resolve a reference against the providers in insertion order.
    ///
    /// Returns:
    /// - `Ok(Some(_))` from the first provider holding a value (later ones are not asked)
    /// - `Ok(None)` when no provider has it
    /// - `Err(_)` as soon as any consulted provider fails
    pub fn resolve(
        &self,
        reference: &Reference,
        notifier: Option<&Arc<dyn Notifier>>,
    ) -> Result<Option<Resolution>, ConfigError> {
        // Providers are queried outside the lock; they may block on I/O.
        for provider in self.snapshot() {
            let value = provider
                .get(reference, notifier.cloned())
                .map_err(|source| ConfigError::Provider {
                    provider: provider.name().to_string(),
                    reference: reference.to_string(),
                    source,
                })?;
            if let Some(value) = value {
                tracing::debug!(
                    provider = %provider.name(),
                    reference = %reference,
                    "Config value resolved"
                );
                return Ok(Some(Resolution {
                    provider: provider.name().to_string(),
                    value,
                }));
            }
        }
        tracing::debug!(reference = %reference, "Config value not found in any source");
        Ok(None)
    }

    fn snapshot(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
