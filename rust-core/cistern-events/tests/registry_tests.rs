// SPDX-License-Identifier: PMPL-1.0-or-later
//! Registry-level tests: persistence across restarts and concurrent writers.

use std::sync::Arc;
use std::thread;

use cistern_events::{CisternConfig, CollectionRegistry, Event, EventKey, TAG_FIELD, TIMESTAMP_FIELD};
use tempfile::TempDir;

fn config(dir: &TempDir) -> CisternConfig {
    CisternConfig {
        data_dir: dir.path().join("data"),
        ..CisternConfig::default()
    }
}

fn event(second: u32, tag: &str) -> Event {
    Event::new()
        .with(TIMESTAMP_FIELD, format!("2021-06-01T12:{:02}:{:02}Z", second / 60, second % 60))
        .with(TAG_FIELD, tag)
        .with("second", second)
}

fn stored_keys(registry: &CollectionRegistry, name: &str) -> Vec<EventKey> {
    let collection = registry.open(name).unwrap();
    collection
        .with_collection(|c| {
            c.cursor()
                .unwrap()
                .map(|item| EventKey::decode(&item.unwrap().0).unwrap())
                .collect()
        })
        .unwrap()
}

#[test]
fn test_events_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let registry = CollectionRegistry::new(config(&dir)).unwrap();
        let flows = registry.open_or_create("flows").unwrap();
        flows.store_events((0..50).map(|s| event(s, "router-1"))).unwrap();
    }

    let registry = CollectionRegistry::new(config(&dir)).unwrap();
    let keys = stored_keys(&registry, "flows");
    assert_eq!(keys.len(), 50);
    assert!(keys.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(keys.iter().all(|k| k.tag == "router-1"));
}

#[test]
fn test_same_key_overwrites() {
    let dir = TempDir::new().unwrap();
    let registry = CollectionRegistry::new(config(&dir)).unwrap();
    let c = registry.open_or_create("dupes").unwrap();
    c.store_events(vec![event(1, "a")]).unwrap();
    c.store_events(vec![event(1, "a").with("second", 99)]).unwrap();
    c.store_events(vec![event(1, "a").with("_hash", "other")]).unwrap();

    let keys = stored_keys(&registry, "dupes");
    assert_eq!(keys.len(), 2, "The hash distinguishes otherwise equal keys");
}

#[test]
fn test_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(CollectionRegistry::new(config(&dir)).unwrap());
    registry.open_or_create("shared").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let collection = registry.open("shared").unwrap();
                for batch in 0..10u32 {
                    let tag = format!("writer-{writer}");
                    let events = (0..10u32).map(|i| event(batch * 10 + i, &tag));
                    collection.store_events(events).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let keys = stored_keys(&registry, "shared");
    assert_eq!(keys.len(), 400);
    assert_eq!(registry.open("shared").unwrap().stats().unwrap().records_written, 400);
}
