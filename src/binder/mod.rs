//! Live binding of a template to the provider chain.
//!
//! # Responsibilities
//! - Validate a template's declarations and run its first load
//! - Re-resolve fields when a provider reports a change
//! - Keep exactly one current revision and retire superseded ones
//!
//! # Data Flow
//! ```text
//! Binder::add(ctx)
//!     → template.rs (Template::describe → field list)
//!     → load.rs     (prepare all → construct all → assemble → validate)
//!     → revision.rs (revision 1 installed, control loop started)
//!
//! Provider change → Notifier::notify(reference)
//!     → load.rs (matching fields only, others copied)
//!     → unchanged inputs: nothing installed
//!     → success: revision n+1 installed, revision n retired
//!     → failure: warn, revision n stays current
//! ```
//!
//! # Design Decisions
//! - One load mutex per binder; loads and notifications never interleave
//! - The current revision lives in an `ArcSwapOption` so `current()` is lock-free
//! - `acquire` and the pointer swap share a short critical section, so an
//!   acquired revision always sees its `Acquire` before its `Supersede`
//! - Failures never retire the current revision

mod load;
mod revision;
mod template;

pub use revision::{ConsumerId, Lease};
pub use template::{Fields, Presence, Resolved, Template};

use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwapOption;

use crate::context::Context;
use crate::error::ConfigError;
use crate::observability::metrics::{self, Outcome, Trigger};
use crate::provider::Notifier;
use crate::reference::Reference;

use load::{Loader, Slot};
use revision::Revision;
use template::FieldSpec;

/// Handle to a bound template. Cheap to clone; all clones share one binding.
pub struct Binder<T: Template> {
    inner: Arc<Inner<T>>,
}

impl<T: Template> Clone for Binder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T: Template> {
    context: Arc<Context>,
    template: &'static str,
    specs: Vec<FieldSpec>,
    has_capabilities: bool,
    notifier: Arc<dyn Notifier>,
    current: ArcSwapOption<Revision<T>>,
    /// Orders lease registration against the current-pointer swap.
    install: Mutex<()>,
    /// Serializes loads; holds the last revision number issued.
    loading: Mutex<u64>,
}

/// Provider-facing notifier; holds the binder weakly.
struct BinderNotifier<T: Template> {
    inner: Weak<Inner<T>>,
}

impl<T: Template> Notifier for BinderNotifier<T> {
    fn notify(&self, reference: &Reference) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.current.load().is_none() {
            return;
        }
        match inner.refresh(Trigger::Notify, |spec| reference.is_within(&spec.reference)) {
            Ok(Some(number)) => {
                tracing::debug!(reference = %reference, revision = number, "Config change applied");
            }
            Ok(None) => {
                tracing::debug!(reference = %reference, "Config change left the record unchanged");
            }
            Err(e) => {
                tracing::warn!(
                    template = inner.template,
                    reference = %reference,
                    "Failed to reload config: {}. Keeping current revision.",
                    e
                );
            }
        }
    }
}

impl<T: Template> Binder<T> {
    /// Validate `T`, run the first load and install revision 1.
    pub fn add(context: &Arc<Context>) -> Result<Self, ConfigError> {
        let template = type_name::<T>();
        let specs = Fields::collect::<T>()?;
        if !specs.is_empty() && context.providers().is_empty() {
            return Err(ConfigError::NoProviders);
        }
        let has_capabilities = specs.iter().any(FieldSpec::is_capability);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| Inner {
            context: context.clone(),
            template,
            specs,
            has_capabilities,
            notifier: Arc::new(BinderNotifier { inner: weak.clone() }),
            current: ArcSwapOption::empty(),
            install: Mutex::new(()),
            loading: Mutex::new(0),
        });
        inner.refresh(Trigger::Initial, |_| true)?;
        tracing::info!(
            template,
            fields = inner.specs.len(),
            providers = ?context.providers().names(),
            "Config bound"
        );
        Ok(Self { inner })
    }

    /// Hold the current revision until the lease is dropped.
    pub fn acquire(&self) -> Result<Lease<T>, ConfigError> {
        let _install = self.inner.install.lock().unwrap_or_else(|e| e.into_inner());
        let revision = self
            .inner
            .current
            .load_full()
            .ok_or(ConfigError::Unbound(self.inner.template))?;
        Ok(Lease::new(revision))
    }

    /// The current record, for templates without constructed fields.
    pub fn current(&self) -> Result<Arc<T>, ConfigError> {
        if self.inner.has_capabilities {
            return Err(ConfigError::CurrentWithCapabilities(self.inner.template));
        }
        self.inner
            .current
            .load_full()
            .map(|revision| revision.value().clone())
            .ok_or(ConfigError::Unbound(self.inner.template))
    }

    /// Re-resolve the fields `reference` belongs to.
    ///
    /// Returns the new revision number, or `None` when nothing changed.
    pub fn notify(&self, reference: &Reference) -> Result<Option<u64>, ConfigError> {
        self.inner
            .refresh(Trigger::Notify, |spec| reference.is_within(&spec.reference))
    }

    /// Re-resolve every field. Unchanged fields keep their instances.
    pub fn reload(&self) -> Result<Option<u64>, ConfigError> {
        self.inner.refresh(Trigger::Reload, |_| true)
    }

    /// Number of the current revision.
    pub fn revision(&self) -> Option<u64> {
        self.inner.current.load_full().map(|revision| revision.number())
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    /// Detach and retire the current revision.
    pub fn shutdown(&self) {
        let _loading = self.inner.loading.lock().unwrap_or_else(|e| e.into_inner());
        let previous = {
            let _install = self.inner.install.lock().unwrap_or_else(|e| e.into_inner());
            self.inner.current.swap(None)
        };
        if let Some(previous) = previous {
            previous.retire();
            tracing::info!(
                template = self.inner.template,
                revision = previous.number(),
                "Config binder shut down"
            );
        }
    }
}

impl<T: Template> fmt::Debug for Binder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("template", &self.inner.template)
            .field("revision", &self.revision())
            .finish()
    }
}

impl<T: Template> Inner<T> {
    fn refresh(
        &self,
        trigger: Trigger,
        selected: impl Fn(&FieldSpec) -> bool,
    ) -> Result<Option<u64>, ConfigError> {
        let mut last = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.current.load_full();
        if trigger != Trigger::Initial && current.is_none() {
            return Err(ConfigError::Unbound(self.template));
        }
        let previous = current.as_deref().map(Revision::slots);

        let loader = Loader {
            context: &self.context,
            specs: &self.specs,
            notifier: &self.notifier,
            template: self.template,
        };
        let loaded = match loader.load::<T>(previous, selected) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                metrics::record_load(self.template, trigger, Outcome::Unchanged);
                return Ok(None);
            }
            Err(e) => {
                metrics::record_load(self.template, trigger, Outcome::Failed);
                return Err(e);
            }
        };

        let number = *last + 1;
        let fresh = fresh_instances(&self.specs, &loaded.slots, previous);
        let started = Revision::start(
            self.template,
            number,
            loaded.value,
            loaded.slots,
            &self.specs,
        );
        let revision = match started {
            Ok(revision) => Arc::new(revision),
            Err(e) => {
                for (reference, instance) in &fresh {
                    instance.destroy(reference);
                }
                metrics::record_load(self.template, trigger, Outcome::Failed);
                return Err(e);
            }
        };
        *last = number;

        let replaced = {
            let _install = self.install.lock().unwrap_or_else(|e| e.into_inner());
            self.current.swap(Some(revision.clone()))
        };
        if let Some(replaced) = replaced {
            replaced.retire();
        }

        metrics::record_load(self.template, trigger, Outcome::Installed);
        metrics::record_revision(self.template, number);
        tracing::info!(
            template = self.template,
            revision = number,
            trigger = trigger.as_str(),
            constructed = fresh.len(),
            "Config revision installed"
        );
        Ok(Some(number))
    }
}

impl<T: Template> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(current) = self.current.swap(None) {
            current.retire();
        }
    }
}

/// Instances in `slots` that were not carried over from `previous`.
fn fresh_instances(
    specs: &[FieldSpec],
    slots: &[Slot],
    previous: Option<&[Slot]>,
) -> revision::Teardown {
    slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| {
            let instance = slot.instance.as_ref()?;
            let carried = previous
                .and_then(|prev| prev.get(index))
                .and_then(|prev| prev.instance.as_ref())
                .is_some_and(|prev| Arc::ptr_eq(prev, instance));
            (!carried).then(|| (specs[index].reference.clone(), instance.clone()))
        })
        .collect()
}
