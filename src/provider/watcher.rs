//! Filesystem watcher driving provider refreshes for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::ProviderError;
use crate::provider::{DirectoryProvider, FileProvider};

/// A provider whose backing files can be re-read on demand.
pub trait Refresh: Send + Sync + 'static {
    /// Path to watch (a file or a directory).
    fn watch_path(&self) -> &Path;

    /// Re-read and notify; returns the number of notifications sent.
    fn refresh(&self) -> Result<usize, ProviderError>;
}

impl Refresh for FileProvider {
    fn watch_path(&self) -> &Path {
        self.path()
    }

    fn refresh(&self) -> Result<usize, ProviderError> {
        FileProvider::refresh(self)
    }
}

impl Refresh for DirectoryProvider {
    fn watch_path(&self) -> &Path {
        self.dir()
    }

    fn refresh(&self) -> Result<usize, ProviderError> {
        DirectoryProvider::refresh(self)
    }
}

/// Watches a provider's files and refreshes it on change.
pub struct FileWatcher {
    path: PathBuf,
    provider: Arc<dyn Refresh>,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(provider: Arc<dyn Refresh>) -> Self {
        Self {
            path: provider.watch_path().to_path_buf(),
            provider,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Poll interval for backends that cannot receive OS events.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start watching. Events are handled on the watcher's own thread; keep
    /// the returned handle alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let provider = self.provider.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        tracing::info!(path = ?path, "Config file change detected, refreshing...");
                        match provider.refresh() {
                            Ok(notified) => tracing::debug!(notified, "Config source refreshed"),
                            Err(e) => tracing::error!(
                                "Failed to refresh config source: {}. Keeping current configuration.",
                                e
                            ),
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
