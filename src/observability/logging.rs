//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber for the daemon
//! - Take the filter from `RUST_LOG`, then the command line, then a default
//!
//! # Design Decisions
//! - Library code only emits events; it never installs a subscriber
//! - `try_init` so tests and embedders that already installed one keep theirs

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor `--log` is given.
pub const DEFAULT_FILTER: &str = "config_binder=info";

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(fallback: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| fallback.unwrap_or(DEFAULT_FILTER).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
