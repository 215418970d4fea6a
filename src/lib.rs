//! Live configuration binder.
//!
//! Typed records are declared as [`Template`]s, resolved from an ordered chain
//! of [`Provider`]s, and kept current as providers report changes. Fields may
//! name a pluggable implementation (`{"http": {...}}`) that is constructed
//! through the [`Registry`]; constructed instances are reference counted per
//! revision and destroyed once the last consumer lets go of a superseded one.
//!
//! # Data Flow
//! ```text
//! Context (providers + registry)
//!     → Binder::add::<T>()  first load, revision 1
//!     → Binder::acquire()   Lease<T> for the current revision
//!     → provider change     field re-resolved, revision n+1
//!     → last lease on n dropped → instances of n destroyed
//! ```

pub mod binder;
pub mod coerce;
pub mod context;
pub mod error;
pub mod observability;
pub mod provider;
pub mod reference;
pub mod registry;

use std::sync::Arc;

pub use binder::{Binder, ConsumerId, Fields, Lease, Presence, Resolved, Template};
pub use coerce::Validate;
pub use context::Context;
pub use error::{BoxError, ConfigError, ProviderError, Result};
pub use provider::{
    DirectoryProvider, FileProvider, FileWatcher, MemoryProvider, Notifier, Provider,
};
pub use reference::Reference;
pub use registry::{Implementation, Registry};

/// Bind `T` against the process-wide context.
pub fn add<T: Template>() -> Result<Binder<T>> {
    Context::global().add::<T>()
}

/// Register an implementation in the process-wide context.
pub fn register<I: Implementation>(name: &str) -> Result<()> {
    Context::global().register::<I>(name)
}

/// Append a provider to the process-wide context.
pub fn add_provider(provider: Arc<dyn Provider>) {
    Context::global().add_provider(provider);
}
