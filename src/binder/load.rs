//! One load attempt: resolve, decode, validate, then construct.
//!
//! # Data Flow
//! ```text
//! prepare (every selected field, in declaration order)
//!     → chain.resolve(reference, notifier)
//!     → plain:      decode + validate into the slot
//!     → capability: {"<impl>": payload} → registry lookup
//!                   → nested payload from config(<reference>.<impl>), else embedded
//!                   → decode + validate the implementation template
//! construct (declaration order, only after every field prepared)
//!     → Template::assemble → Template::validate
//!     → any failure destroys what this attempt built
//! ```

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use crate::binder::template::{FieldKind, FieldSpec, Presence, Resolved, Template};
use crate::context::Context;
use crate::error::{ConfigError, RECORD};
use crate::provider::Notifier;
use crate::reference::Reference;
use crate::registry::{Instance, Prepared};

/// Per-field state of a revision.
#[derive(Clone, Default)]
pub(crate) struct Slot {
    /// Value as the provider chain returned it.
    pub(crate) raw: Option<Value>,
    /// Implementation payload actually decoded (capability fields only).
    pub(crate) nested: Option<Value>,
    /// Decoded value, or `Arc<C>` for a capability.
    pub(crate) value: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) instance: Option<Arc<Instance>>,
}

impl Slot {
    fn same_inputs(&self, raw: &Option<Value>, nested: &Option<Value>) -> bool {
        &self.raw == raw && &self.nested == nested
    }
}

enum Pending {
    Ready(Slot),
    Construct {
        raw: Value,
        nested: Value,
        prepared: Box<dyn Prepared>,
    },
}

impl Pending {
    fn same_inputs(&self, slot: &Slot) -> bool {
        match self {
            Pending::Ready(ready) => slot.same_inputs(&ready.raw, &ready.nested),
            Pending::Construct { raw, nested, .. } => {
                slot.same_inputs(&Some(raw.clone()), &Some(nested.clone()))
            }
        }
    }
}

pub(crate) struct Loaded<T> {
    pub(crate) value: T,
    pub(crate) slots: Vec<Slot>,
}

pub(crate) struct Loader<'a> {
    pub(crate) context: &'a Context,
    pub(crate) specs: &'a [FieldSpec],
    pub(crate) notifier: &'a Arc<dyn Notifier>,
    pub(crate) template: &'static str,
}

impl Loader<'_> {
    /// Build a new record.
    ///
    /// With `previous`, only fields picked by `selected` are re-resolved and a
    /// field whose inputs did not change keeps its previous slot (and instance).
    /// Returns `Ok(None)` when nothing changed.
    pub(crate) fn load<T: Template>(
        &self,
        previous: Option<&[Slot]>,
        selected: impl Fn(&FieldSpec) -> bool,
    ) -> Result<Option<Loaded<T>>, ConfigError> {
        let mut pending = Vec::with_capacity(self.specs.len());
        let mut changed = previous.is_none();
        let mut failure = None;

        for (index, spec) in self.specs.iter().enumerate() {
            let kept = previous.map(|slots| &slots[index]);
            if let Some(kept) = kept.filter(|_| !selected(spec)) {
                pending.push(Pending::Ready(kept.clone()));
                continue;
            }
            // Keep resolving after a failure so every selected field re-arms its notifier.
            match self.prepare(spec) {
                Ok(next) => match kept {
                    Some(kept) if next.same_inputs(kept) => {
                        pending.push(Pending::Ready(kept.clone()))
                    }
                    _ => {
                        changed = true;
                        pending.push(next);
                    }
                },
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if !changed {
            return Ok(None);
        }

        let (slots, fresh) = self.construct(pending)?;
        match self.assemble::<T>(&slots) {
            Ok(value) => Ok(Some(Loaded { value, slots })),
            Err(e) => {
                self.rollback(&slots, &fresh);
                Err(e)
            }
        }
    }

    fn prepare(&self, spec: &FieldSpec) -> Result<Pending, ConfigError> {
        let resolution = self
            .context
            .providers()
            .resolve(&spec.reference, Some(self.notifier))?;
        let Some(resolution) = resolution else {
            return match spec.presence {
                Presence::Required => Err(ConfigError::Missing(spec.reference.to_string())),
                Presence::Optional => Ok(Pending::Ready(Slot::default())),
            };
        };
        tracing::trace!(
            reference = %spec.reference,
            provider = %resolution.provider,
            "Resolved config"
        );

        match &spec.kind {
            FieldKind::Plain { decode } => {
                let value = decode(&resolution.value, &spec.reference)?;
                Ok(Pending::Ready(Slot {
                    raw: Some(resolution.value),
                    nested: None,
                    value: Some(value),
                    instance: None,
                }))
            }
            FieldKind::Capability {
                capability,
                capability_name,
            } => {
                let (name, embedded) = discriminator(&spec.reference, &resolution.value)?;
                let factory = self.context.registry().lookup(
                    *capability,
                    *capability_name,
                    name,
                    &spec.reference,
                )?;
                let nested_reference = spec.reference.child(name)?;
                let nested = self
                    .context
                    .providers()
                    .resolve(&nested_reference, Some(self.notifier))?
                    .map_or_else(|| embedded.clone(), |found| found.value);
                let prepared = factory.prepare(name, &nested, &nested_reference)?;
                Ok(Pending::Construct {
                    raw: resolution.value,
                    nested,
                    prepared,
                })
            }
        }
    }

    /// Construct pending capabilities in declaration order. Returns the slots
    /// and the indexes of the instances built by this call.
    fn construct(&self, pending: Vec<Pending>) -> Result<(Vec<Slot>, Vec<usize>), ConfigError> {
        let mut slots = Vec::with_capacity(pending.len());
        let mut fresh = Vec::new();
        for (index, item) in pending.into_iter().enumerate() {
            match item {
                Pending::Ready(slot) => slots.push(slot),
                Pending::Construct {
                    raw,
                    nested,
                    prepared,
                } => match prepared.construct(&self.specs[index].reference) {
                    Ok(instance) => {
                        let instance = Arc::new(instance);
                        slots.push(Slot {
                            raw: Some(raw),
                            nested: Some(nested),
                            value: Some(instance.value().clone()),
                            instance: Some(instance),
                        });
                        fresh.push(index);
                    }
                    Err(e) => {
                        self.rollback(&slots, &fresh);
                        return Err(e);
                    }
                },
            }
        }
        Ok((slots, fresh))
    }

    fn assemble<T: Template>(&self, slots: &[Slot]) -> Result<T, ConfigError> {
        let value = T::assemble(&Resolved::new(self.template, self.specs, slots))?;
        value.validate().map_err(|source| ConfigError::Validation {
            reference: RECORD.to_string(),
            source,
        })?;
        Ok(value)
    }

    /// Destroy instances built by a failed attempt, in declaration order.
    fn rollback(&self, slots: &[Slot], fresh: &[usize]) {
        for &index in fresh {
            if let Some(instance) = &slots[index].instance {
                tracing::debug!(
                    reference = %self.specs[index].reference,
                    implementation = instance.implementation(),
                    "Rolling back constructed config"
                );
                instance.destroy(&self.specs[index].reference);
            }
        }
    }
}

/// Split a capability payload `{"<impl>": {...}}` into name and embedded payload.
fn discriminator<'v>(
    reference: &Reference,
    value: &'v Value,
) -> Result<(&'v str, &'v Value), ConfigError> {
    let Some(map) = value.as_object() else {
        return Err(ConfigError::NoImplementation(reference.to_string()));
    };
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((name, payload)), None) => Ok((name.as_str(), payload)),
        (None, _) => Err(ConfigError::NoImplementation(reference.to_string())),
        (Some(_), Some(_)) => {
            let mut names: Vec<String> = map.keys().cloned().collect();
            names.sort();
            Err(ConfigError::AmbiguousImplementation {
                reference: reference.to_string(),
                names,
            })
        }
    }
}
