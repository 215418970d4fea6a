//! Directory-of-files provider.
//!
//! The first reference segment names a file in the directory
//! (`<dir>/<segment>.json`, else `<dir>/<segment>.toml`) and the remaining
//! segments are a path inside that document: `db.primary.url` reads
//! `primary.url` from `db.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::coerce;
use crate::error::{BoxError, ProviderError};
use crate::provider::file::read_document;
use crate::provider::{Notifier, Provider, Watchers};
use crate::reference::Reference;

const EXTENSIONS: [&str; 2] = ["json", "toml"];

pub struct DirectoryProvider {
    name: String,
    dir: PathBuf,
    /// Documents loaded so far, by file stem. Missing files are not cached.
    files: Mutex<HashMap<String, Arc<Value>>>,
    watchers: Watchers,
}

impl DirectoryProvider {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            name: format!("files({})", dir.display()),
            dir,
            files: Mutex::new(HashMap::new()),
            watchers: Watchers::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop cached documents, reload on demand and notify watchers whose value changed.
    pub fn refresh(&self) -> Result<usize, ProviderError> {
        let previous = std::mem::take(&mut *self.files.lock().unwrap_or_else(|e| e.into_inner()));

        let mut failure = None;
        let taken = self.watchers.take(|watched| {
            let (stem, rest) = watched.split_first();
            let before = previous
                .get(stem)
                .and_then(|doc| coerce::lookup(doc, rest.unwrap_or("")).cloned());
            match self.document(stem) {
                Ok(after) => {
                    let after =
                        after.and_then(|doc| coerce::lookup(&doc, rest.unwrap_or("")).cloned());
                    before != after
                }
                Err(e) => {
                    // Let the binder observe the broken file on its next get.
                    failure.get_or_insert(e);
                    true
                }
            }
        });
        let count = taken.len();
        Watchers::fire(taken);
        match failure {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Load (or reuse) the document for a file stem. `Ok(None)` when no file exists.
    fn document(&self, stem: &str) -> Result<Option<Arc<Value>>, ProviderError> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(doc) = files.get(stem) {
            return Ok(Some(doc.clone()));
        }
        let Some(path) = self.locate(stem) else {
            return Ok(None);
        };
        let doc = Arc::new(read_document(&path)?);
        tracing::debug!(path = ?path, "Config file loaded");
        files.insert(stem.to_string(), doc.clone());
        Ok(Some(doc))
    }

    fn locate(&self, stem: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{stem}.{ext}")))
            .find(|path| path.is_file())
    }
}

impl Provider for DirectoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        reference: &Reference,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Option<Value>, BoxError> {
        if let Some(notifier) = notifier {
            self.watchers.register(reference, notifier);
        }
        let (stem, rest) = reference.split_first();
        let Some(doc) = self.document(stem)? else {
            return Ok(None);
        };
        Ok(coerce::lookup(&doc, rest.unwrap_or("")).cloned())
    }
}
