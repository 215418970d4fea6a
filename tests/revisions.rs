//! Revision lifecycle: leases, drain-then-destroy, failed reloads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use config_binder::{ConfigError, MemoryProvider, Reference};
use serde_json::json;

mod common;
use common::{constructed, stopped, wait_for, wait_until, Pair, Service};

fn service_provider(addr: &str) -> Arc<MemoryProvider> {
    Arc::new(
        MemoryProvider::new()
            .with("ms.name", "orders")
            .with("ms.server", json!({"http": {"addr": addr}})),
    )
}

#[tokio::test]
async fn test_reload_drains_then_destroys() {
    let memory = service_provider("localhost:9001");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    let first = binder.acquire().unwrap();
    assert_eq!(first.number(), 1);

    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9002"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(2));

    // Revision 1 stays usable while leased.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.server.addr(), "localhost:9001");
    assert!(!first.server.is_stopped());
    assert_eq!(stopped("localhost:9001"), 0);

    let second = binder.acquire().unwrap();
    assert_eq!(second.number(), 2);
    assert_eq!(second.server.addr(), "localhost:9002");

    first.release();
    assert!(wait_for(Duration::from_secs(2), || stopped("localhost:9001") == 1).await);
    assert_eq!(stopped("localhost:9002"), 0);
}

#[test]
fn test_reload_drains_then_destroys_without_runtime() {
    let memory = service_provider("localhost:9011");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    let first = binder.acquire().unwrap();
    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9012"}})))
        .unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(!first.server.is_stopped());

    drop(first);
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9011") == 1));
}

#[test]
fn test_unleased_revision_destroyed_on_reload() {
    let memory = service_provider("localhost:9021");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9022"}})))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9021") == 1));
    assert_eq!(binder.acquire().unwrap().server.addr(), "localhost:9022");
}

#[test]
fn test_equal_value_does_not_reload() {
    let memory = service_provider("localhost:9031");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    let changed = memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9031"}})))
        .unwrap();
    assert!(!changed);
    assert_eq!(binder.revision(), Some(1));
    assert_eq!(binder.reload().unwrap(), None);
    assert_eq!(constructed("localhost:9031"), 1);
}

#[test]
fn test_unrelated_change_shares_instances() {
    let memory = service_provider("localhost:9041");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();
    let first = binder.acquire().unwrap();

    memory.set("ms.name", Some(json!("payments"))).unwrap();
    let second = binder.acquire().unwrap();
    assert_eq!(second.number(), 2);
    assert_eq!(second.name, "payments");
    assert!(Arc::ptr_eq(&first.server, &second.server));

    // Tearing down revision 1 must not stop the server revision 2 still uses.
    drop(first);
    thread::sleep(Duration::from_millis(100));
    assert!(!second.server.is_stopped());
    assert_eq!(constructed("localhost:9041"), 1);
}

#[test]
fn test_shared_instance_outlives_oldest_lease() {
    let memory = service_provider("localhost:9131");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();
    let first = binder.acquire().unwrap();

    // Revision 2 shares the server, revision 3 replaces it.
    memory.set("ms.name", Some(json!("payments"))).unwrap();
    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9132"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(3));

    // Revision 2 drains right away; revision 1 is still leased.
    thread::sleep(Duration::from_millis(200));
    assert!(!first.server.is_stopped());
    assert_eq!(stopped("localhost:9131"), 0);

    drop(first);
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9131") == 1));
    assert_eq!(stopped("localhost:9132"), 0);
    assert_eq!(constructed("localhost:9131"), 1);
}

#[tokio::test]
async fn test_shared_instance_outlives_middle_lease() {
    let memory = service_provider("localhost:9141");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    memory.set("ms.name", Some(json!("payments"))).unwrap();
    let second = binder.acquire().unwrap();
    assert_eq!(second.number(), 2);
    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9142"}})))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.server.is_stopped());

    second.release();
    assert!(wait_for(Duration::from_secs(2), || stopped("localhost:9141") == 1).await);
}

#[test]
fn test_revision_outlives_startup_runtime() {
    let memory = service_provider("localhost:9151");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let binder = runtime
        .block_on(async { common::context(vec![memory.clone()]).add::<Service>() })
        .unwrap();
    drop(runtime);

    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9152"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(2));
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9151") == 1));
    assert_eq!(stopped("localhost:9152"), 0);
}

#[test]
fn test_notify_targets_matching_fields_only() {
    let memory = Arc::new(
        MemoryProvider::new()
            .with("pair.public", json!({"http": {"addr": "localhost:9051"}}))
            .with("pair.admin", json!({"http": {"addr": "localhost:9052"}})),
    );
    let binder = common::context(vec![memory.clone()]).add::<Pair>().unwrap();
    let before = binder.acquire().unwrap();

    memory
        .set("pair.admin", Some(json!({"http": {"addr": "localhost:9053"}})))
        .unwrap();
    let after = binder.acquire().unwrap();
    assert_eq!(after.number(), 2);
    assert!(Arc::ptr_eq(&before.public, &after.public));
    assert_eq!(after.admin.addr(), "localhost:9053");

    drop(before);
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9052") == 1));
    assert_eq!(stopped("localhost:9051"), 0);

    // Explicit notify for an unchanged field installs nothing.
    let public = Reference::parse("pair.public").unwrap();
    assert_eq!(binder.notify(&public).unwrap(), None);
}

#[test]
fn test_failed_reload_keeps_current_revision() {
    let memory = service_provider("localhost:9061");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    memory
        .set("ms.server", Some(json!({"failing": {"reason": "no route"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(1));
    assert!(matches!(
        binder.reload(),
        Err(ConfigError::Construction { .. })
    ));

    let lease = binder.acquire().unwrap();
    assert_eq!(lease.number(), 1);
    assert!(!lease.server.is_stopped());

    // The binder is still listening: a fixed value is picked up.
    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9062"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(2));
}

#[test]
fn test_teardown_failure_is_not_fatal() {
    let memory = Arc::new(
        MemoryProvider::new()
            .with("ms.name", "orders")
            .with("ms.server", json!({"stubborn": {"addr": "localhost:9071"}})),
    );
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9072"}})))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9071") == 1));

    memory
        .set("ms.server", Some(json!({"http": {"addr": "localhost:9073"}})))
        .unwrap();
    assert_eq!(binder.revision(), Some(3));
}

#[test]
fn test_shutdown_destroys_after_last_lease() {
    let memory = service_provider("localhost:9081");
    let binder = common::context(vec![memory]).add::<Service>().unwrap();
    let lease = binder.acquire().unwrap();

    binder.shutdown();
    assert!(matches!(binder.acquire(), Err(ConfigError::Unbound(_))));
    thread::sleep(Duration::from_millis(50));
    assert!(!lease.server.is_stopped());

    drop(lease);
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9081") == 1));
}

#[test]
fn test_dropping_binder_retires_revision() {
    let memory = service_provider("localhost:9091");
    let binder = common::context(vec![memory]).add::<Service>().unwrap();
    drop(binder);
    assert!(wait_until(Duration::from_secs(2), || stopped("localhost:9091") == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_during_reloads() {
    let memory = service_provider("localhost:9100");
    let binder = common::context(vec![memory.clone()])
        .add::<Service>()
        .unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let binder = binder.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let lease = binder.acquire().unwrap();
                assert!(!lease.server.is_stopped());
                tokio::task::yield_now().await;
            }
        }));
    }

    for port in 9101..9111 {
        let memory = memory.clone();
        tokio::task::spawn_blocking(move || {
            memory
                .set("ms.server", Some(json!({"http": {"addr": format!("localhost:{port}")}})))
                .unwrap();
        })
        .await
        .unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(binder.revision(), Some(11));
    assert!(wait_for(Duration::from_secs(2), || {
        (9100..9110).all(|port| stopped(&format!("localhost:{port}")) == 1)
    })
    .await);
    assert_eq!(stopped("localhost:9110"), 0);
}
