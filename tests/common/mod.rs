//! Shared fixtures for integration testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use config_binder::{
    BoxError, ConfigError, Context, Fields, Implementation, MemoryProvider, Notifier, Presence,
    Provider, Reference, Resolved, Template,
};
use serde::Deserialize;
use serde_json::Value;

/// Capability used throughout the tests.
pub trait Server: Send + Sync {
    fn addr(&self) -> String;
    fn is_stopped(&self) -> bool;
    fn stop(&self);
}

pub struct RunningServer {
    addr: String,
    stopped: AtomicBool,
}

impl Server for RunningServer {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Every server ever constructed, by address. Tests use distinct addresses.
fn ledger() -> &'static Mutex<HashMap<String, Vec<Arc<RunningServer>>>> {
    static LEDGER: OnceLock<Mutex<HashMap<String, Vec<Arc<RunningServer>>>>> = OnceLock::new();
    LEDGER.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Number of servers constructed for `addr`.
pub fn constructed(addr: &str) -> usize {
    ledger().lock().unwrap().get(addr).map_or(0, Vec::len)
}

/// Number of servers for `addr` that have been stopped.
pub fn stopped(addr: &str) -> usize {
    ledger()
        .lock()
        .unwrap()
        .get(addr)
        .map_or(0, |servers| servers.iter().filter(|s| s.is_stopped()).count())
}

#[derive(Deserialize)]
pub struct HttpConfig {
    pub addr: String,
}

impl Implementation for HttpConfig {
    type Capability = dyn Server;

    fn construct(&self) -> Result<Arc<dyn Server>, BoxError> {
        let server = Arc::new(RunningServer {
            addr: self.addr.clone(),
            stopped: AtomicBool::new(false),
        });
        ledger()
            .lock()
            .unwrap()
            .entry(self.addr.clone())
            .or_default()
            .push(server.clone());
        Ok(server)
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.addr.is_empty() {
            return Err("addr must not be empty".into());
        }
        Ok(())
    }

    fn destroy(&self, instance: &dyn Server) -> Result<(), BoxError> {
        instance.stop();
        Ok(())
    }
}

/// Always fails to construct.
#[derive(Deserialize)]
pub struct FailingConfig {
    pub reason: String,
}

impl Implementation for FailingConfig {
    type Capability = dyn Server;

    fn construct(&self) -> Result<Arc<dyn Server>, BoxError> {
        Err(self.reason.clone().into())
    }
}

/// Constructs fine, fails to tear down (after stopping).
#[derive(Deserialize)]
pub struct StubbornConfig {
    pub addr: String,
}

impl Implementation for StubbornConfig {
    type Capability = dyn Server;

    fn construct(&self) -> Result<Arc<dyn Server>, BoxError> {
        HttpConfig {
            addr: self.addr.clone(),
        }
        .construct()
    }

    fn destroy(&self, instance: &dyn Server) -> Result<(), BoxError> {
        instance.stop();
        Err("socket still in use".into())
    }
}

/// A record with a name and a required server.
pub struct Service {
    pub name: String,
    pub server: Arc<dyn Server>,
}

impl Template for Service {
    fn describe(fields: &mut Fields) {
        fields
            .value::<String>("ms.name", Presence::Required)
            .construct::<dyn Server>("ms.server", Presence::Required);
    }

    fn assemble(resolved: &Resolved<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: resolved.value("ms.name")?,
            server: resolved.capability("ms.server")?,
        })
    }
}

/// Two servers, constructed in declaration order.
pub struct Pair {
    pub public: Arc<dyn Server>,
    pub admin: Arc<dyn Server>,
}

impl Template for Pair {
    fn describe(fields: &mut Fields) {
        fields
            .construct::<dyn Server>("pair.public", Presence::Required)
            .construct::<dyn Server>("pair.admin", Presence::Required);
    }

    fn assemble(resolved: &Resolved<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            public: resolved.capability("pair.public")?,
            admin: resolved.capability("pair.admin")?,
        })
    }
}

/// Context with `http`, `failing` and `stubborn` registered and the given providers.
pub fn context(providers: Vec<Arc<dyn Provider>>) -> Arc<Context> {
    let context = Context::new();
    context.register::<HttpConfig>("http").unwrap();
    context.register::<FailingConfig>("failing").unwrap();
    context.register::<StubbornConfig>("stubborn").unwrap();
    for provider in providers {
        context.add_provider(provider);
    }
    context
}

/// Memory provider wrapper that counts `get` calls.
pub struct CountingProvider {
    inner: MemoryProvider,
    gets: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: MemoryProvider) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl Provider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(
        &self,
        reference: &Reference,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Option<Value>, BoxError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(reference, notifier)
    }
}

/// Poll `condition` from a plain thread until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Poll `condition` from async code, yielding to the runtime between checks.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
