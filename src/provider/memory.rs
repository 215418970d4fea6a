//! In-memory provider, mostly for tests and values set in code.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::coerce;
use crate::error::{BoxError, ConfigError};
use crate::provider::{Notifier, Provider, Watchers};
use crate::reference::Reference;

/// Provider holding values in a map keyed by reference.
///
/// A stored object also answers for references nested inside it, so
/// `with("ms", json!({"server": {...}}))` serves `ms.server`.
pub struct MemoryProvider {
    name: String,
    values: Mutex<BTreeMap<String, Value>>,
    watchers: Watchers,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Mutex::new(BTreeMap::new()),
            watchers: Watchers::default(),
        }
    }

    /// Builder-style insert, without notification.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.into());
        self
    }

    /// Set (`Some`) or delete (`None`) a value.
    ///
    /// Returns whether anything changed. Setting an equal value is a no-op and
    /// notifies nobody; otherwise every notifier registered for an overlapping
    /// reference fires once, after the internal lock is released.
    pub fn set(&self, name: &str, value: Option<Value>) -> Result<bool, ConfigError> {
        let reference = Reference::parse(name)?;
        {
            let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
            let changed = match value {
                Some(value) => {
                    if values.get(name) == Some(&value) {
                        false
                    } else {
                        values.insert(name.to_string(), value);
                        true
                    }
                }
                None => values.remove(name).is_some(),
            };
            if !changed {
                tracing::debug!(
                    provider = %self.name,
                    reference = %reference,
                    "Config value unchanged"
                );
                return Ok(false);
            }
        }

        let taken = self.watchers.take(|watched| watched.overlaps(&reference));
        Watchers::fire(taken);
        Ok(true)
    }

    /// Number of armed notifier registrations.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn find(values: &BTreeMap<String, Value>, reference: &Reference) -> Option<Value> {
        if let Some(value) = values.get(reference.as_str()) {
            return Some(value.clone());
        }
        // Longest stored key that contains the reference.
        let wanted = reference.as_str();
        values
            .iter()
            .filter(|(key, _)| {
                wanted.len() > key.len()
                    && wanted.starts_with(key.as_str())
                    && wanted.as_bytes()[key.len()] == b'.'
            })
            .max_by_key(|(key, _)| key.len())
            .and_then(|(key, value)| coerce::lookup(value, &wanted[key.len() + 1..]).cloned())
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        reference: &Reference,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Option<Value>, BoxError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        // Armed even when absent, so a value appearing later is reported too.
        if let Some(notifier) = notifier {
            self.watchers.register(reference, notifier);
        }
        Ok(Self::find(&values, reference))
    }
}
