//! Configuration providers.
//!
//! # Data Flow
//! ```text
//! Binder needs config(ms.server)
//!     → chain.rs (ordered providers, first hit wins)
//!     → Provider::get(reference, notifier)
//!         memory.rs    (values set in code, change notification)
//!         file.rs      (one JSON/TOML document, optional watch)
//!         directory.rs (<dir>/<first segment>.json|toml)
//!
//! On change:
//!     provider fires Notifier::notify(reference) once
//!     → Binder re-resolves the matching field (re-arming the notifier)
//! ```
//!
//! # Design Decisions
//! - "Absent" (`Ok(None)`) and "failed" (`Err`) are different answers
//! - A notifier fires at most once per registration
//! - Providers never call notifiers while holding their own locks

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::BoxError;
use crate::reference::Reference;

pub mod chain;
pub mod directory;
pub mod file;
pub mod memory;
pub mod watcher;

pub use chain::{ProviderChain, Resolution};
pub use directory::DirectoryProvider;
pub use file::FileProvider;
pub use memory::MemoryProvider;
pub use watcher::FileWatcher;

/// A named source of raw configuration values.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Get the value at `reference`.
    ///
    /// When a notifier is given and the provider supports change detection, it
    /// is called once when the value is modified or deleted. The caller must
    /// then `get` again, since the new value may come from another provider.
    fn get(
        &self,
        reference: &Reference,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Option<Value>, BoxError>;
}

/// Receives change notifications from providers.
pub trait Notifier: Send + Sync {
    fn notify(&self, reference: &Reference);
}

/// One-shot notifier registrations keyed by reference.
///
/// Shared by the bundled providers that support change detection.
#[derive(Default)]
pub(crate) struct Watchers {
    entries: Mutex<Vec<(Reference, Arc<dyn Notifier>)>>,
}

impl Watchers {
    pub(crate) fn register(&self, reference: &Reference, notifier: Arc<dyn Notifier>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let duplicate = entries
            .iter()
            .any(|(r, n)| r == reference && Arc::ptr_eq(n, &notifier));
        if !duplicate {
            entries.push((reference.clone(), notifier));
        }
    }

    /// Remove and return the registrations selected by `affected`.
    pub(crate) fn take(
        &self,
        mut affected: impl FnMut(&Reference) -> bool,
    ) -> Vec<(Reference, Arc<dyn Notifier>)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let (taken, kept): (Vec<_>, Vec<_>) = entries.drain(..).partition(|(r, _)| affected(r));
        *entries = kept;
        taken
    }

    /// Fire previously taken registrations. Must be called without provider locks held.
    pub(crate) fn fire(taken: Vec<(Reference, Arc<dyn Notifier>)>) {
        for (reference, notifier) in taken {
            tracing::debug!(reference = %reference, "Notifying config change");
            notifier.notify(&reference);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Notifier for Counter {
        fn notify(&self, _reference: &Reference) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_watchers_fire_once() {
        let watchers = Watchers::default();
        let counter = Arc::new(Counter::default());
        let notifier: Arc<dyn Notifier> = counter.clone();
        let r = Reference::parse("a.b").unwrap();

        watchers.register(&r, notifier.clone());
        watchers.register(&r, notifier);
        assert_eq!(watchers.len(), 1);

        Watchers::fire(watchers.take(|w| w == &r));
        Watchers::fire(watchers.take(|w| w == &r));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(watchers.len(), 0);
    }
}
