//! config-binder demo daemon.
//!
//! Binds a small service record to configuration files and logs what the
//! service would announce, following every change until Ctrl-C.
//!
//! ```text
//! config-binder --file service.toml --watch
//! ```
//!
//! with `service.toml`:
//!
//! ```toml
//! [service]
//! name = "billing"
//! interval = 5
//!
//! [service.announcer.prefix]
//! text = "hello from"
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use config_binder::observability::logging;
use config_binder::provider::watcher::Refresh;
use config_binder::{
    BoxError, ConfigError, DirectoryProvider, FileProvider, FileWatcher, Fields, Implementation,
    Presence, Resolved, Template,
};

#[derive(Parser)]
#[command(name = "config-binder")]
#[command(about = "Bind a sample service record to config files and follow changes", long_about = None)]
struct Cli {
    /// JSON or TOML document; repeat to layer files, earlier ones win
    #[arg(short, long)]
    file: Vec<PathBuf>,

    /// Directory of <name>.json / <name>.toml documents, consulted after files
    #[arg(short, long)]
    dir: Vec<PathBuf>,

    /// Reload when any of the files change
    #[arg(short, long)]
    watch: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log: Option<String>,
}

/// What the sample service says on every tick.
trait Announcer: Send + Sync {
    fn announce(&self, name: &str) -> String;
}

struct Prefixed(String);

impl Announcer for Prefixed {
    fn announce(&self, name: &str) -> String {
        format!("{} {}", self.0, name)
    }
}

struct Suffixed(String);

impl Announcer for Suffixed {
    fn announce(&self, name: &str) -> String {
        format!("{} {}", name, self.0)
    }
}

#[derive(Deserialize)]
struct PrefixConfig {
    text: String,
}

impl Implementation for PrefixConfig {
    type Capability = dyn Announcer;

    fn construct(&self) -> Result<Arc<dyn Announcer>, BoxError> {
        tracing::info!(text = %self.text, "Starting prefix announcer");
        Ok(Arc::new(Prefixed(self.text.clone())))
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.text.trim().is_empty() {
            return Err("text must not be blank".into());
        }
        Ok(())
    }

    fn destroy(&self, _instance: &dyn Announcer) -> Result<(), BoxError> {
        tracing::info!(text = %self.text, "Stopped prefix announcer");
        Ok(())
    }
}

#[derive(Deserialize)]
struct SuffixConfig {
    text: String,
}

impl Implementation for SuffixConfig {
    type Capability = dyn Announcer;

    fn construct(&self) -> Result<Arc<dyn Announcer>, BoxError> {
        tracing::info!(text = %self.text, "Starting suffix announcer");
        Ok(Arc::new(Suffixed(self.text.clone())))
    }

    fn destroy(&self, _instance: &dyn Announcer) -> Result<(), BoxError> {
        tracing::info!(text = %self.text, "Stopped suffix announcer");
        Ok(())
    }
}

struct Service {
    name: String,
    interval: Duration,
    announcer: Arc<dyn Announcer>,
}

impl Template for Service {
    fn describe(fields: &mut Fields) {
        fields
            .value::<String>("service.name", Presence::Required)
            .value::<u64>("service.interval", Presence::Optional)
            .construct::<dyn Announcer>("service.announcer", Presence::Required);
    }

    fn assemble(resolved: &Resolved<'_>) -> Result<Self, ConfigError> {
        let seconds = resolved.optional_value::<u64>("service.interval")?.unwrap_or(5);
        Ok(Self {
            name: resolved.value("service.name")?,
            interval: Duration::from_secs(seconds),
            announcer: resolved.capability("service.announcer")?,
        })
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.interval.is_zero() {
            return Err("service.interval must be at least 1 second".into());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref());

    tracing::info!("config-binder v{} starting", env!("CARGO_PKG_VERSION"));

    config_binder::register::<PrefixConfig>("prefix")?;
    config_binder::register::<SuffixConfig>("suffix")?;

    let mut watched: Vec<Arc<dyn Refresh>> = Vec::new();
    for path in &cli.file {
        let provider = Arc::new(FileProvider::open(path)?);
        config_binder::add_provider(provider.clone());
        watched.push(provider);
    }
    for dir in &cli.dir {
        let provider = Arc::new(DirectoryProvider::new(dir));
        config_binder::add_provider(provider.clone());
        watched.push(provider);
    }

    let binder = config_binder::add::<Service>()?;

    // Watchers stop when dropped.
    let mut watchers = Vec::new();
    if cli.watch {
        for provider in watched {
            watchers.push(FileWatcher::new(provider).run()?);
        }
    }

    let mut last_seen = None;
    loop {
        let interval = {
            let service = binder.acquire()?;
            if last_seen != Some(service.number()) {
                tracing::info!(
                    revision = service.number(),
                    name = %service.name,
                    interval_secs = service.interval.as_secs(),
                    "Service config active"
                );
                last_seen = Some(service.number());
            }
            tracing::info!("{}", service.announcer.announce(&service.name));
            service.interval
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = hangup() => {
                tracing::info!("SIGHUP received, reloading config");
                let reloading = binder.clone();
                match tokio::task::spawn_blocking(move || reloading.reload()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Reload failed: {}. Keeping current revision.", e);
                    }
                    Err(e) => tracing::error!("Reload task failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    drop(watchers);
    binder.shutdown();
    // Give the retired revision's control thread a moment to tear down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGHUP: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn hangup() {
    std::future::pending::<()>().await;
}
