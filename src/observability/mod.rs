//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Binder and revision control produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout subscriber installed by the daemon
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing a subscriber or recorder is the binary's job
//! - Without a recorder every metric call is a no-op

pub mod logging;
pub mod metrics;
