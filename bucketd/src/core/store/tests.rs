use super::{MemoryStore, Store};
use crate::core::bucket::BucketState;
use std::time::{Duration, SystemTime};

fn state(tokens: f64, at: SystemTime) -> BucketState {
    BucketState {
        tokens,
        last_drip: at,
        before_drop: None,
    }
}

#[test]
fn test_set_get_round_trip() {
    let mut store = MemoryStore::new();
    let now = SystemTime::now();

    store
        .set("a/1", state(3.5, now), now + Duration::from_secs(60), now)
        .unwrap();

    let got = store.get("a/1", now).unwrap().unwrap();
    assert_eq!(got.tokens, 3.5);
    assert!(store.get("a/2", now).unwrap().is_none());
}

#[test]
fn test_expired_entry_reads_absent() {
    let mut store = MemoryStore::new();
    let now = SystemTime::now();

    store
        .set("a/1", state(1.0, now), now + Duration::from_millis(100), now)
        .unwrap();

    let later = now + Duration::from_millis(200);
    assert!(store.get("a/1", later).unwrap().is_none());
}

#[test]
fn test_remove_reports_existence() {
    let mut store = MemoryStore::new();
    let now = SystemTime::now();

    store
        .set("a/1", state(1.0, now), now + Duration::from_secs(60), now)
        .unwrap();

    assert!(store.remove("a/1").unwrap());
    assert!(!store.remove("a/1").unwrap());
}

#[test]
fn test_scan_prefix_bounded_and_sorted() {
    let mut store = MemoryStore::new();
    let now = SystemTime::now();
    let exp = now + Duration::from_secs(60);

    store.set("ip/3", state(3.0, now), exp, now).unwrap();
    store.set("ip/1", state(1.0, now), exp, now).unwrap();
    store.set("ip/2", state(2.0, now), exp, now).unwrap();
    store.set("user/1", state(9.0, now), exp, now).unwrap();

    let all = store.scan_prefix("ip/", 100, now).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].0, "ip/1");
    assert_eq!(all[2].0, "ip/3");

    let bounded = store.scan_prefix("ip/", 2, now).unwrap();
    assert_eq!(bounded.len(), 2);
}

#[test]
fn test_periodic_sweep_drops_expired() {
    let mut store = MemoryStore::builder()
        .cleanup_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let now = SystemTime::now();

    store
        .set("a/1", state(1.0, now), now + Duration::from_millis(5), now)
        .unwrap();
    assert_eq!(store.len(), 1);

    // Next write past the sweep deadline reclaims the expired entry
    let later = now + Duration::from_millis(20);
    store
        .set("a/2", state(2.0, later), later + Duration::from_secs(60), later)
        .unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get("a/2", later).unwrap().is_some());
}

#[test]
fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buckets.db");
    let now = SystemTime::now();

    {
        let mut store = MemoryStore::builder().path(&path).build().unwrap();
        store
            .set("a/1", state(4.25, now), now + Duration::from_secs(60), now)
            .unwrap();
        store
            .set("a/2", state(0.5, now), now + Duration::from_millis(1), now)
            .unwrap();
        store.persist().unwrap();
    }

    // Reload drops the entry that expired in the meantime
    std::thread::sleep(Duration::from_millis(5));
    let store = MemoryStore::builder().path(&path).build().unwrap();
    let got = store.get("a/1", SystemTime::now()).unwrap().unwrap();
    assert_eq!(got.tokens, 4.25);
    assert!(store.get("a/2", SystemTime::now()).unwrap().is_none());
}

#[test]
fn test_missing_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db");

    let store = MemoryStore::builder().path(&path).build().unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_persist_without_path_is_noop() {
    let store = MemoryStore::new();
    store.persist().unwrap();
}
