//! Revisions, their consumer tracking and teardown.
//!
//! # Responsibilities
//! - Hold one immutable record value and the instances it was built from
//! - Track which consumers hold the revision
//! - Destroy instances once no revision built on them has consumers left
//!
//! # Design Decisions
//! - Each revision owns a control loop fed by an unbounded channel, so
//!   acquire/release never block and never run teardown on the caller
//! - The loop runs on its own named thread, so it outlives whichever
//!   runtime the revision was installed from
//! - Instances shared between revisions count their holders; the last
//!   revision to drain destroys them
//! - The binder itself holds the revision as a consumer (the creator) until
//!   it installs a successor

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::binder::load::Slot;
use crate::binder::template::FieldSpec;
use crate::error::ConfigError;
use crate::observability::metrics;
use crate::reference::Reference;
use crate::registry::Instance;

/// Identity of one holder of a revision.
pub type ConsumerId = Uuid;

/// Instances with the reference each was built for.
pub(crate) type Teardown = Vec<(Reference, Arc<Instance>)>;

#[derive(Debug)]
pub(crate) enum Signal {
    Acquire(ConsumerId),
    Release(ConsumerId),
    Supersede,
}

pub(crate) struct Revision<T> {
    number: u64,
    created_at: SystemTime,
    value: Arc<T>,
    slots: Vec<Slot>,
    creator: ConsumerId,
    control: mpsc::UnboundedSender<Signal>,
}

impl<T> Revision<T> {
    /// Start the control loop, register the creator as first consumer and
    /// take a hold on every instance in `slots`.
    pub(crate) fn start(
        template: &'static str,
        number: u64,
        value: T,
        slots: Vec<Slot>,
        specs: &[FieldSpec],
    ) -> Result<Self, ConfigError> {
        let instances: Teardown = slots
            .iter()
            .zip(specs)
            .filter_map(|(slot, spec)| {
                let instance = slot.instance.as_ref()?;
                Some((spec.reference.clone(), instance.clone()))
            })
            .collect();

        let (control, signals) = mpsc::unbounded_channel();
        let creator = Uuid::new_v4();
        let mut drain = Drain::new(template, number, instances.clone());
        drain.apply(Signal::Acquire(creator));
        spawn(drain, signals)?;
        for (_, instance) in &instances {
            instance.hold();
        }

        Ok(Self {
            number,
            created_at: SystemTime::now(),
            value: Arc::new(value),
            slots,
            creator,
            control,
        })
    }

    pub(crate) fn number(&self) -> u64 {
        self.number
    }

    pub(crate) fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn acquire(&self) -> ConsumerId {
        let consumer = Uuid::new_v4();
        self.signal(Signal::Acquire(consumer));
        consumer
    }

    pub(crate) fn release(&self, consumer: ConsumerId) {
        self.signal(Signal::Release(consumer));
    }

    /// Mark the revision superseded and drop the creator's hold.
    pub(crate) fn retire(&self) {
        tracing::debug!(revision = self.number, "Retiring config revision");
        self.signal(Signal::Supersede);
        self.signal(Signal::Release(self.creator));
    }

    fn signal(&self, signal: Signal) {
        if let Err(e) = self.control.send(signal) {
            tracing::warn!(
                revision = self.number,
                "Revision control already stopped, dropping {:?}",
                e.0
            );
        }
    }
}

/// State of one revision's control loop.
pub(crate) struct Drain {
    template: &'static str,
    number: u64,
    instances: Teardown,
    consumers: HashSet<ConsumerId>,
    superseded: bool,
    unknown_releases: usize,
}

impl Drain {
    pub(crate) fn new(template: &'static str, number: u64, instances: Teardown) -> Self {
        Self {
            template,
            number,
            instances,
            consumers: HashSet::new(),
            superseded: false,
            unknown_releases: 0,
        }
    }

    /// Apply one signal. Returns `true` once the revision is torn down.
    pub(crate) fn apply(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Acquire(consumer) => {
                self.consumers.insert(consumer);
            }
            Signal::Release(consumer) => {
                if !self.consumers.remove(&consumer) {
                    self.unknown_releases += 1;
                    metrics::record_unknown_release(self.template);
                    tracing::error!(
                        template = self.template,
                        revision = self.number,
                        consumer = %consumer,
                        "Release of config revision by a consumer that never acquired it"
                    );
                }
            }
            Signal::Supersede => {
                if self.superseded {
                    tracing::warn!(revision = self.number, "Config revision superseded twice");
                }
                self.superseded = true;
            }
        }

        if !self.superseded || !self.consumers.is_empty() {
            return false;
        }
        self.teardown();
        true
    }

    /// Drop this revision's hold on its instances, destroying those no
    /// other revision still holds.
    fn teardown(&mut self) {
        let (mut destroyed, mut failures, mut shared) = (0, 0, 0);
        for (reference, instance) in self.instances.drain(..) {
            if !instance.unhold() {
                shared += 1;
                continue;
            }
            let ok = instance.destroy(&reference);
            metrics::record_teardown(ok);
            if ok {
                destroyed += 1;
            } else {
                failures += 1;
            }
        }
        tracing::info!(
            template = self.template,
            revision = self.number,
            destroyed,
            failures,
            shared,
            "Config revision destroyed"
        );
    }

    #[cfg(test)]
    fn consumers(&self) -> usize {
        self.consumers.len()
    }

    #[cfg(test)]
    fn unknown_releases(&self) -> usize {
        self.unknown_releases
    }

    fn run(mut self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = signals.blocking_recv() {
            if self.apply(signal) {
                return;
            }
        }
        tracing::debug!(revision = self.number, "Revision control closed before teardown");
    }
}

fn spawn(drain: Drain, signals: mpsc::UnboundedReceiver<Signal>) -> Result<(), ConfigError> {
    std::thread::Builder::new()
        .name(format!("config-revision-{}", drain.number))
        .spawn(move || drain.run(signals))?;
    Ok(())
}

/// A consumer's hold on one revision.
///
/// Dereferences to the record. The revision's constructed instances stay
/// alive until every lease on it is released, even after a newer revision
/// is installed. Dropping the lease releases it.
pub struct Lease<T> {
    revision: Arc<Revision<T>>,
    consumer: ConsumerId,
}

impl<T> Lease<T> {
    pub(crate) fn new(revision: Arc<Revision<T>>) -> Self {
        let consumer = revision.acquire();
        Self { revision, consumer }
    }

    /// Revision number, starting at 1 for the first load.
    pub fn number(&self) -> u64 {
        self.revision.number()
    }

    pub fn created_at(&self) -> SystemTime {
        self.revision.created_at()
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// The record as a shared pointer.
    pub fn value(&self) -> &Arc<T> {
        self.revision.value()
    }

    /// Release explicitly. Same as dropping the lease.
    pub fn release(self) {}
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.revision.value()
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.revision.release(self.consumer);
    }
}

impl<T: fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("revision", &self.number())
            .field("consumer", &self.consumer)
            .field("value", &**self.value())
            .finish()
    }
}
