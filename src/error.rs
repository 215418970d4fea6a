//! Error definitions shared by every layer of the binder.

use thiserror::Error;

/// Boxed error used at trait seams (providers, implementations, validators).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for binder operations.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Reference used in errors raised by record-level validation.
pub const RECORD: &str = "<record>";

/// Errors that can occur while declaring, loading or using configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A reference does not follow the dotted-name grammar.
    #[error("Invalid config reference \"{0}\", expecting dot-notation of names")]
    InvalidReference(String),

    /// An implementation name does not follow the name grammar.
    #[error("Invalid implementation name \"{0}\"")]
    InvalidName(String),

    /// A provider failed to answer (I/O, auth, parse).
    #[error("Source({provider}) failed to get config({reference}): {source}")]
    Provider {
        provider: String,
        reference: String,
        #[source]
        source: BoxError,
    },

    /// A required reference is absent from every provider.
    #[error("Missing required configuration({0}): not found in any source")]
    Missing(String),

    /// A value does not have the shape of its target type.
    #[error("Cannot decode config({reference}): {source}")]
    Decode {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    /// A decoded value (or the assembled record) rejected itself.
    #[error("Invalid config({reference}): {source}")]
    Validation {
        reference: String,
        #[source]
        source: BoxError,
    },

    /// A capability payload does not name an implementation.
    #[error("Config({0}) does not identify an implementation as {{\"<impl>\":{{...}}}}")]
    NoImplementation(String),

    /// A capability payload names more than one implementation.
    #[error("Config({reference}) identifies multiple implementations ({}) instead of just one", .names.join("|"))]
    AmbiguousImplementation { reference: String, names: Vec<String> },

    /// The named implementation is not registered for the capability.
    #[error("Config({reference}) has no constructor for \"{name}\", only for {}", .known.join("|"))]
    UnknownImplementation {
        reference: String,
        name: String,
        known: Vec<String>,
    },

    /// Nothing at all is registered for the capability of a field.
    #[error("Config({reference}) cannot load without any registered constructors for {capability}")]
    NoImplementations {
        reference: String,
        capability: &'static str,
    },

    /// An implementation failed to build its instance.
    #[error("Failed to construct config({reference}) with \"{implementation}\": {source}")]
    Construction {
        reference: String,
        implementation: String,
        #[source]
        source: BoxError,
    },

    /// The (capability, name) pair is already registered.
    #[error("{capability} constructor(name=\"{name}\") is already registered")]
    DuplicateImplementation {
        capability: &'static str,
        name: String,
    },

    /// A template declares the same reference twice.
    #[error("Template {template} declares config({reference}) more than once")]
    DuplicateReference {
        template: &'static str,
        reference: String,
    },

    /// No providers were added before loading a template with fields.
    #[error("No sources of config were added")]
    NoProviders,

    /// The template is internally inconsistent (undeclared or mistyped field access).
    #[error("Template {template}: {message}")]
    Template {
        template: &'static str,
        message: String,
    },

    /// The binder has no current revision (shut down).
    #[error("Binder for {0} has no current revision")]
    Unbound(&'static str),

    /// `current()` was called on a template that owns constructed fields.
    #[error("Template {0} has constructed fields, acquire a lease instead of calling current()")]
    CurrentWithCapabilities(&'static str),

    /// The revision control loop could not be started.
    #[error("Failed to start revision control: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised by the bundled providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backing file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not valid JSON.
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing file is not valid TOML.
    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// The backing file's root is not a table/object.
    #[error("Config file {0} must contain an object at the top level")]
    NotAnObject(String),
}
