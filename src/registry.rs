//! Constructor registry for pluggable capabilities.
//!
//! # Responsibilities
//! - Map (capability type, implementation name) to an implementation template
//! - Decode and validate an implementation's payload before anything is built
//! - Build instances and keep their teardown next to them
//!
//! # Design Decisions
//! - A capability is a trait object type (`dyn Server`), keyed by `TypeId`
//! - The construction contract is the [`Implementation`] trait, so a template
//!   with the wrong constructor shape is rejected by the compiler
//! - Factories are `Arc`ed out of the table; nothing is built under a map lock

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::coerce;
use crate::error::{BoxError, ConfigError};
use crate::reference::{is_valid_name, Reference};

/// Construction contract of one implementation of a capability.
///
/// The implementing type is the implementation's configuration template: it is
/// decoded from the payload under `<reference>.<name>`, validated, then asked
/// to build the instance.
pub trait Implementation: DeserializeOwned + Send + Sync + 'static {
    /// The capability this implementation provides, usually `dyn SomeTrait`.
    type Capability: ?Sized + Send + Sync + 'static;

    fn construct(&self) -> Result<Arc<Self::Capability>, BoxError>;

    /// Reject invalid configuration before anything is constructed.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release resources held by an instance this template built.
    ///
    /// Called at most once, after the last consumer of a superseded revision
    /// released it. Failures are logged, never retried.
    fn destroy(&self, instance: &Self::Capability) -> Result<(), BoxError> {
        let _ = instance;
        Ok(())
    }
}

/// A constructed capability instance and its pending teardown.
pub(crate) struct Instance {
    implementation: String,
    /// Holds an `Arc<C>` for the capability `C`.
    value: Arc<dyn Any + Send + Sync>,
    /// Revisions currently built on this instance.
    holders: AtomicUsize,
    teardown: Mutex<Option<Teardown>>,
}

type Teardown = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

impl Instance {
    #[cfg(test)]
    pub(crate) fn with_teardown(
        implementation: &str,
        teardown: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) -> Self {
        Self {
            implementation: implementation.to_string(),
            value: Arc::new(()),
            holders: AtomicUsize::new(0),
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub(crate) fn implementation(&self) -> &str {
        &self.implementation
    }

    pub(crate) fn value(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.value
    }

    /// Record one more revision built on this instance.
    pub(crate) fn hold(&self) {
        self.holders.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one revision's hold. Returns `true` when it was the last one.
    pub(crate) fn unhold(&self) -> bool {
        self.holders.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Run the teardown if it has not run yet. Errors are logged only.
    pub(crate) fn destroy(&self, reference: &Reference) -> bool {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(teardown) = teardown else {
            return true;
        };
        match teardown() {
            Ok(()) => {
                tracing::debug!(
                    reference = %reference,
                    implementation = %self.implementation,
                    "Destroyed constructed config"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    reference = %reference,
                    implementation = %self.implementation,
                    "Failed to destroy constructed config: {}",
                    e
                );
                false
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("implementation", &self.implementation)
            .finish_non_exhaustive()
    }
}

/// A decoded and validated implementation template, ready to construct.
pub(crate) trait Prepared: Send {
    fn implementation(&self) -> &str;

    fn construct(self: Box<Self>, reference: &Reference) -> Result<Instance, ConfigError>;
}

struct PreparedImplementation<I> {
    name: String,
    template: I,
}

impl<I: Implementation> Prepared for PreparedImplementation<I> {
    fn implementation(&self) -> &str {
        &self.name
    }

    fn construct(self: Box<Self>, reference: &Reference) -> Result<Instance, ConfigError> {
        let PreparedImplementation { name, template } = *self;
        let instance = template
            .construct()
            .map_err(|source| ConfigError::Construction {
                reference: reference.to_string(),
                implementation: name.clone(),
                source,
            })?;
        tracing::debug!(reference = %reference, implementation = %name, "Constructed config");

        let value: Arc<dyn Any + Send + Sync> = Arc::new(instance.clone());
        Ok(Instance {
            implementation: name,
            value,
            holders: AtomicUsize::new(0),
            teardown: Mutex::new(Some(Box::new(move || template.destroy(&instance)))),
        })
    }
}

/// Type-erased entry point for one registered implementation.
pub(crate) trait Factory: Send + Sync {
    fn prepare(
        &self,
        name: &str,
        payload: &Value,
        reference: &Reference,
    ) -> Result<Box<dyn Prepared>, ConfigError>;
}

struct TypedFactory<I>(PhantomData<fn() -> I>);

impl<I: Implementation> Factory for TypedFactory<I> {
    fn prepare(
        &self,
        name: &str,
        payload: &Value,
        reference: &Reference,
    ) -> Result<Box<dyn Prepared>, ConfigError> {
        let template: I = coerce::decode(payload, reference.as_str())?;
        template
            .validate()
            .map_err(|source| ConfigError::Validation {
                reference: reference.to_string(),
                source,
            })?;
        Ok(Box::new(PreparedImplementation {
            name: name.to_string(),
            template,
        }))
    }
}

struct CapabilityTable {
    factories: BTreeMap<String, Arc<dyn Factory>>,
}

/// Implementations per capability type.
#[derive(Default)]
pub struct Registry {
    tables: DashMap<TypeId, CapabilityTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register implementation `I` under `name` for its capability.
    ///
    /// Call this at process start, before any binder that needs it is added.
    /// A type that does not fulfil the construction contract cannot be
    /// registered at all:
    ///
    /// ```compile_fail
    /// use config_binder::Registry;
    ///
    /// #[derive(serde::Deserialize)]
    /// struct NoConstructor {
    ///     addr: String,
    /// }
    ///
    /// Registry::new().register::<NoConstructor>("http").unwrap();
    /// ```
    ///
    /// and neither can a constructor taking extra arguments:
    ///
    /// ```compile_fail
    /// use std::sync::Arc;
    /// use config_binder::{BoxError, Implementation};
    ///
    /// trait Server: Send + Sync {}
    ///
    /// #[derive(serde::Deserialize)]
    /// struct Http {
    ///     addr: String,
    /// }
    ///
    /// impl Implementation for Http {
    ///     type Capability = dyn Server;
    ///
    ///     fn construct(&self, port: u16) -> Result<Arc<dyn Server>, BoxError> {
    ///         unimplemented!()
    ///     }
    /// }
    /// ```
    pub fn register<I: Implementation>(&self, name: &str) -> Result<(), ConfigError> {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        let capability = type_name::<I::Capability>();
        let mut table = self
            .tables
            .entry(TypeId::of::<I::Capability>())
            .or_insert_with(|| CapabilityTable {
                factories: BTreeMap::new(),
            });
        if table.factories.contains_key(name) {
            return Err(ConfigError::DuplicateImplementation {
                capability,
                name: name.to_string(),
            });
        }
        table
            .factories
            .insert(name.to_string(), Arc::new(TypedFactory::<I>(PhantomData)));
        tracing::debug!(
            capability,
            name,
            implementation = type_name::<I>(),
            "Registered constructor"
        );
        Ok(())
    }

    /// Names registered for capability `C`, sorted.
    pub fn names<C: ?Sized + 'static>(&self) -> Vec<String> {
        self.names_for(TypeId::of::<C>())
    }

    pub fn contains<C: ?Sized + 'static>(&self, name: &str) -> bool {
        self.tables
            .get(&TypeId::of::<C>())
            .is_some_and(|table| table.factories.contains_key(name))
    }

    fn names_for(&self, capability: TypeId) -> Vec<String> {
        self.tables
            .get(&capability)
            .map(|table| table.factories.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Find the factory for `name`, or explain which names would have worked.
    pub(crate) fn lookup(
        &self,
        capability: TypeId,
        capability_name: &'static str,
        name: &str,
        reference: &Reference,
    ) -> Result<Arc<dyn Factory>, ConfigError> {
        let Some(table) = self.tables.get(&capability) else {
            return Err(ConfigError::NoImplementations {
                reference: reference.to_string(),
                capability: capability_name,
            });
        };
        if table.factories.is_empty() {
            return Err(ConfigError::NoImplementations {
                reference: reference.to_string(),
                capability: capability_name,
            });
        }
        match table.factories.get(name) {
            Some(factory) => Ok(factory.clone()),
            None => Err(ConfigError::UnknownImplementation {
                reference: reference.to_string(),
                name: name.to_string(),
                known: table.factories.keys().cloned().collect(),
            }),
        }
    }
}
