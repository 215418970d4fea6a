//! Template declarations: which references a record needs and how each is typed.

use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::binder::load::Slot;
use crate::coerce::{self, Validate};
use crate::error::{BoxError, ConfigError};
use crate::reference::Reference;

/// A record bound to configuration.
///
/// `describe` lists the fields in declaration order; `assemble` builds the
/// record from resolved fields. Both run on every load, so `assemble` should
/// only copy values out of [`Resolved`].
///
/// ```
/// use std::sync::Arc;
/// use config_binder::{ConfigError, Fields, Presence, Resolved, Template};
///
/// trait Server: Send + Sync {}
///
/// struct Service {
///     name: String,
///     port: u16,
///     server: Arc<dyn Server>,
/// }
///
/// impl Template for Service {
///     fn describe(fields: &mut Fields) {
///         fields
///             .value::<String>("name", Presence::Required)
///             .value::<u16>("port", Presence::Required)
///             .construct::<dyn Server>("ms.server", Presence::Required);
///     }
///
///     fn assemble(resolved: &Resolved<'_>) -> Result<Self, ConfigError> {
///         Ok(Self {
///             name: resolved.value("name")?,
///             port: resolved.value("port")?,
///             server: resolved.capability("ms.server")?,
///         })
///     }
/// }
/// ```
pub trait Template: Send + Sync + Sized + 'static {
    fn describe(fields: &mut Fields);

    fn assemble(resolved: &Resolved<'_>) -> Result<Self, ConfigError>;

    /// Record-level validation, run after every field resolved.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Whether a field must be present in some provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
}

pub(crate) type Decoder = fn(&Value, &Reference) -> Result<Arc<dyn Any + Send + Sync>, ConfigError>;

pub(crate) enum FieldKind {
    Plain {
        decode: Decoder,
    },
    Capability {
        capability: TypeId,
        capability_name: &'static str,
    },
}

pub(crate) struct FieldSpec {
    pub(crate) reference: Reference,
    pub(crate) presence: Presence,
    pub(crate) kind: FieldKind,
    pub(crate) type_name: &'static str,
}

impl FieldSpec {
    pub(crate) fn is_capability(&self) -> bool {
        matches!(self.kind, FieldKind::Capability { .. })
    }
}

/// Field descriptor list filled in by [`Template::describe`].
#[derive(Default)]
pub struct Fields {
    specs: Vec<FieldSpec>,
    error: Option<ConfigError>,
}

impl Fields {
    /// A plain value decoded from the provider's value tree.
    pub fn value<V>(&mut self, reference: &str, presence: Presence) -> &mut Self
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        self.push(
            reference,
            presence,
            type_name::<V>(),
            FieldKind::Plain {
                decode: decode_plain::<V>,
            },
        )
    }

    /// A plain value that is validated after decoding.
    pub fn validated<V>(&mut self, reference: &str, presence: Presence) -> &mut Self
    where
        V: DeserializeOwned + Validate + Send + Sync + 'static,
    {
        self.push(
            reference,
            presence,
            type_name::<V>(),
            FieldKind::Plain {
                decode: decode_checked::<V>,
            },
        )
    }

    /// A capability built by whichever implementation the payload names.
    pub fn construct<C>(&mut self, reference: &str, presence: Presence) -> &mut Self
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.push(
            reference,
            presence,
            type_name::<C>(),
            FieldKind::Capability {
                capability: TypeId::of::<C>(),
                capability_name: type_name::<C>(),
            },
        )
    }

    fn push(
        &mut self,
        reference: &str,
        presence: Presence,
        type_name: &'static str,
        kind: FieldKind,
    ) -> &mut Self {
        match Reference::parse(reference) {
            Ok(reference) => self.specs.push(FieldSpec {
                reference,
                presence,
                kind,
                type_name,
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Run `T::describe` and check the declarations.
    pub(crate) fn collect<T: Template>() -> Result<Vec<FieldSpec>, ConfigError> {
        let mut fields = Fields::default();
        T::describe(&mut fields);
        if let Some(e) = fields.error {
            return Err(e);
        }
        let mut seen = HashSet::new();
        for spec in &fields.specs {
            if !seen.insert(spec.reference.as_str()) {
                return Err(ConfigError::DuplicateReference {
                    template: type_name::<T>(),
                    reference: spec.reference.to_string(),
                });
            }
        }
        Ok(fields.specs)
    }
}

fn decode_plain<V>(
    value: &Value,
    reference: &Reference,
) -> Result<Arc<dyn Any + Send + Sync>, ConfigError>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Arc::new(coerce::decode::<V>(value, reference.as_str())?))
}

fn decode_checked<V>(
    value: &Value,
    reference: &Reference,
) -> Result<Arc<dyn Any + Send + Sync>, ConfigError>
where
    V: DeserializeOwned + Validate + Send + Sync + 'static,
{
    Ok(Arc::new(coerce::decode_validated::<V>(value, reference.as_str())?))
}

/// Resolved fields handed to [`Template::assemble`].
pub struct Resolved<'a> {
    template: &'static str,
    specs: &'a [FieldSpec],
    slots: &'a [Slot],
}

impl<'a> Resolved<'a> {
    pub(crate) fn new(template: &'static str, specs: &'a [FieldSpec], slots: &'a [Slot]) -> Self {
        Self { template, specs, slots }
    }

    /// A required plain value.
    pub fn value<V: Clone + 'static>(&self, reference: &str) -> Result<V, ConfigError> {
        self.optional_value(reference)?
            .ok_or_else(|| ConfigError::Missing(reference.to_string()))
    }

    /// An optional plain value; `None` when absent everywhere.
    pub fn optional_value<V: Clone + 'static>(
        &self,
        reference: &str,
    ) -> Result<Option<V>, ConfigError> {
        let Some(value) = self.slot(reference, false)?.value.as_ref() else {
            return Ok(None);
        };
        value
            .downcast_ref::<V>()
            .cloned()
            .map(Some)
            .ok_or_else(|| self.mistyped(reference, type_name::<V>()))
    }

    /// A required constructed capability.
    pub fn capability<C: ?Sized + 'static>(&self, reference: &str) -> Result<Arc<C>, ConfigError> {
        self.optional_capability(reference)?
            .ok_or_else(|| ConfigError::Missing(reference.to_string()))
    }

    /// An optional constructed capability; `None` when not configured.
    pub fn optional_capability<C: ?Sized + 'static>(
        &self,
        reference: &str,
    ) -> Result<Option<Arc<C>>, ConfigError> {
        let Some(value) = self.slot(reference, true)?.value.as_ref() else {
            return Ok(None);
        };
        value
            .downcast_ref::<Arc<C>>()
            .cloned()
            .map(Some)
            .ok_or_else(|| self.mistyped(reference, type_name::<C>()))
    }

    fn slot(&self, reference: &str, capability: bool) -> Result<&'a Slot, ConfigError> {
        let index = self
            .specs
            .iter()
            .position(|spec| spec.reference.as_str() == reference)
            .ok_or_else(|| ConfigError::Template {
                template: self.template,
                message: format!("config({reference}) is not declared"),
            })?;
        if self.specs[index].is_capability() != capability {
            let kind = if capability { "a constructed field" } else { "a plain value" };
            return Err(ConfigError::Template {
                template: self.template,
                message: format!("config({reference}) is not {kind}"),
            });
        }
        Ok(&self.slots[index])
    }

    fn mistyped(&self, reference: &str, requested: &'static str) -> ConfigError {
        let declared = self
            .specs
            .iter()
            .find(|spec| spec.reference.as_str() == reference)
            .map_or("?", |spec| spec.type_name);
        ConfigError::Template {
            template: self.template,
            message: format!("config({reference}) is declared as {declared}, not {requested}"),
        }
    }
}
