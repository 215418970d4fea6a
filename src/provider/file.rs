//! Single-document file provider (JSON or TOML).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::coerce;
use crate::error::{BoxError, ProviderError};
use crate::provider::{Notifier, Provider, Watchers};
use crate::reference::Reference;

/// Serves references as dotted paths into one configuration document.
///
/// The format is chosen by extension: `.toml` is parsed as TOML, anything
/// else as JSON. Call [`FileProvider::refresh`] (or run a
/// [`FileWatcher`](crate::provider::FileWatcher)) to pick up edits.
pub struct FileProvider {
    name: String,
    path: PathBuf,
    document: RwLock<Value>,
    watchers: Watchers,
}

impl FileProvider {
    /// Load the document at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref().to_path_buf();
        let document = read_document(&path)?;
        tracing::info!(path = ?path, "Config file loaded");
        Ok(Self {
            name: format!("file({})", path.display()),
            path,
            document: RwLock::new(document),
            watchers: Watchers::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and notify watchers whose value changed.
    ///
    /// On error the previous document stays in place. Returns the number of
    /// notifications sent.
    pub fn refresh(&self) -> Result<usize, ProviderError> {
        let fresh = read_document(&self.path)?;
        let previous = {
            let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *document, fresh.clone())
        };
        let taken = self.watchers.take(|watched| {
            coerce::lookup(&previous, watched.as_str()) != coerce::lookup(&fresh, watched.as_str())
        });
        let count = taken.len();
        Watchers::fire(taken);
        Ok(count)
    }
}

impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        reference: &Reference,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Option<Value>, BoxError> {
        let document = self.document.read().unwrap_or_else(|e| e.into_inner());
        if let Some(notifier) = notifier {
            self.watchers.register(reference, notifier);
        }
        Ok(coerce::lookup(&document, reference.as_str()).cloned())
    }
}

/// Read a JSON or TOML document whose root must be an object.
pub(crate) fn read_document(path: &Path) -> Result<Value, ProviderError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| ProviderError::Io {
        path: display.clone(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let document: Value = if is_toml {
        toml::from_str(&content).map_err(|source| ProviderError::Toml {
            path: display.clone(),
            source,
        })?
    } else if content.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&content).map_err(|source| ProviderError::Json {
            path: display.clone(),
            source,
        })?
    };

    if !document.is_object() {
        return Err(ProviderError::NotAnObject(display));
    }
    Ok(document)
}
