//! Metrics emitted by binders and revision control.
//!
//! # Metrics
//! - `config_loads_total` (counter): load attempts by template, trigger, outcome
//! - `config_revision` (gauge): current revision number per template
//! - `config_teardowns_total` (counter): instance teardowns by outcome
//! - `config_unknown_releases_total` (counter): releases for consumers never acquired
//!
//! # Design Decisions
//! - Emitted through the `metrics` facade; the recorder is chosen by the application
//! - Labels are static strings so no allocation happens per update

use metrics::{counter, gauge};

/// What started a load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    Notify,
    Reload,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Initial => "initial",
            Trigger::Notify => "notify",
            Trigger::Reload => "reload",
        }
    }
}

/// Result of a load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    Unchanged,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Installed => "installed",
            Outcome::Unchanged => "unchanged",
            Outcome::Failed => "failed",
        }
    }
}

pub fn record_load(template: &'static str, trigger: Trigger, outcome: Outcome) {
    counter!(
        "config_loads_total",
        "template" => template,
        "trigger" => trigger.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_revision(template: &'static str, number: u64) {
    gauge!("config_revision", "template" => template).set(number as f64);
}

pub fn record_teardown(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("config_teardowns_total", "outcome" => outcome).increment(1);
}

pub fn record_unknown_release(template: &'static str) {
    counter!("config_unknown_releases_total", "template" => template).increment(1);
}
