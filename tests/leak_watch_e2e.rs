//! End-to-end tests: watch -> idle executor -> check -> capture -> analysis

mod common;

use common::{collecting_registry, snapshot_files, test_config, wait_until};
use leakwatch_core::{
    ExclusionPolicy, LeakWatcherBuilder, PlatformDefaults, WatchConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Session {
    _id: u64,
}

#[test]
fn test_leaked_object_is_reported_and_snapshot_removed() {
    let dir = TempDir::new().unwrap();
    let (registry, rx) = collecting_registry();

    let watcher = LeakWatcherBuilder::new()
        .defaults(PlatformDefaults::new(test_config(dir.path(), 50)).result_handlers(registry))
        .build()
        .unwrap();

    let session = Arc::new(Session { _id: 7 });
    watcher.watch(&session, "session-7").unwrap();
    let key = watcher.retained_keys().pop().unwrap();

    let (metadata, result) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(metadata.reference_key, key);
    assert_eq!(metadata.reference_name, "session-7");
    assert!(metadata.watch_duration_ms >= 50);
    assert!(result.leak_found);
    assert!(!result.excluded_leak);
    assert!(result.class_name.unwrap().ends_with("Session"));

    assert!(wait_until(Duration::from_secs(2), || !metadata
        .snapshot_file
        .exists()));
    assert!(watcher.is_retained(&key));

    let stats = watcher.stats();
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.dispatched, 1);

    // A sustained leak is reported once.
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    drop(session);
}

#[test]
fn test_released_object_is_not_reported() {
    let dir = TempDir::new().unwrap();
    let (registry, rx) = collecting_registry();

    let watcher = LeakWatcherBuilder::new()
        .defaults(PlatformDefaults::new(test_config(dir.path(), 50)).result_handlers(registry))
        .build()
        .unwrap();

    let session = Arc::new(Session { _id: 8 });
    watcher.watch(&session, "session-8").unwrap();
    drop(session);

    assert!(wait_until(Duration::from_secs(5), || watcher
        .retained_keys()
        .is_empty()));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert!(snapshot_files(dir.path()).is_empty());

    let stats = watcher.stats();
    assert_eq!(stats.collected, 1);
    assert_eq!(stats.captures, 0);
}

#[test]
fn test_excluded_leak_is_flagged() {
    let dir = TempDir::new().unwrap();
    let (registry, rx) = collecting_registry();

    let watcher = LeakWatcherBuilder::new()
        .defaults(PlatformDefaults::new(test_config(dir.path(), 20)).result_handlers(registry))
        .exclusion_policy(
            ExclusionPolicy::builder()
                .reference_name("^cache-", "caches live for the whole process")
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let cache = Arc::new(vec![1u32, 2, 3]);
    watcher.watch(&cache, "cache-users").unwrap();

    let (metadata, result) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(metadata.exclusion_policy.rules().len(), 1);
    assert!(result.leak_found);
    assert!(result.excluded_leak);
}

#[test]
fn test_disabled_watcher_does_nothing() {
    let dir = TempDir::new().unwrap();
    let config = WatchConfig {
        enabled: false,
        ..test_config(dir.path(), 10)
    };

    let watcher = LeakWatcherBuilder::from_config(config).build().unwrap();
    assert!(watcher.is_disabled());

    let session = Arc::new(Session { _id: 9 });
    watcher.watch(&session, "ignored").unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert!(watcher.retained_keys().is_empty());
    assert!(snapshot_files(dir.path()).is_empty());
}

#[test]
fn test_many_watches_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let (registry, _rx) = collecting_registry();

    let watcher = LeakWatcherBuilder::new()
        .defaults(PlatformDefaults::new(test_config(dir.path(), 30)).result_handlers(registry))
        .build()
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let watcher = watcher.clone();
            std::thread::spawn(move || {
                for j in 0..10 {
                    let object = Arc::new(Session { _id: i * 100 + j });
                    watcher.watch(&object, "short-lived").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(watcher.stats().watched, 80);
    assert!(wait_until(Duration::from_secs(10), || watcher
        .retained_keys()
        .is_empty()));
    assert_eq!(watcher.stats().collected, 80);
}
