//! Credit flow and backpressure tests.

use std::time::Duration;
use tablefeed::{FeedStore, StoreConfig, StreamState};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(2);
const IDLE: Duration = Duration::from_millis(100);

fn store_with_credit(dir: &TempDir, initial: u64, max: u64) -> FeedStore {
    let store = FeedStore::create(StoreConfig {
        path: dir.path().join("store"),
        initial_credit: initial,
        max_credit: max,
        ..Default::default()
    })
    .unwrap();
    store.create_table("users").unwrap();
    store
}

#[test]
fn test_paused_consumer_receives_at_most_initial_credit() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 1, 16);

    let mut feed = store.watch("users", b"", store.current_cursor()).unwrap();
    feed.pause();

    // Commit far more than the producer has credit for.
    for i in 0..20u32 {
        store
            .put("users", format!("k{:02}", i).as_bytes(), b"v")
            .unwrap();
    }

    // Exactly one entry was granted before the pause; it still arrives.
    let entry = feed.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(entry.key, b"k00");

    // Zero further entries, no matter how long we wait or how many
    // more mutations commit.
    assert!(feed.recv_timeout(IDLE).is_none());
    store.put("users", b"k99", b"v").unwrap();
    assert!(feed.recv_timeout(IDLE).is_none());
    assert_eq!(feed.state(), StreamState::Paused);
}

#[test]
fn test_no_loss_across_pause_resume() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 1, 16);

    let mut feed = store.watch("users", b"", store.current_cursor()).unwrap();
    feed.pause();

    for i in 0..100u32 {
        store
            .put("users", format!("k{:03}", i).as_bytes(), b"v")
            .unwrap();
    }

    // Drain whatever was already in flight, then resume.
    let mut received = Vec::new();
    while let Some(entry) = feed.recv_timeout(IDLE) {
        received.push(entry.unwrap());
    }
    feed.resume();

    while received.len() < 100 {
        let entry = feed
            .recv_timeout(WAIT)
            .expect("every entry committed during the pause must arrive")
            .unwrap();
        received.push(entry);
    }

    // All 100, in commit order, none dropped or duplicated.
    for (i, entry) in received.iter().enumerate() {
        assert_eq!(entry.key, format!("k{:03}", i).as_bytes());
    }
    for pair in received.windows(2) {
        assert!(pair[0].cursor < pair[1].cursor);
    }
    assert!(feed.recv_timeout(IDLE).is_none());
}

#[test]
fn test_in_flight_bounded_by_credit_window() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 4, 4);

    let mut feed = store.watch("users", b"", store.current_cursor()).unwrap();
    feed.pause();

    for i in 0..20u32 {
        store
            .put("users", format!("k{:02}", i).as_bytes(), b"v")
            .unwrap();
    }

    // At most `granted - consumed` entries can ever be in flight.
    let mut in_flight = 0;
    while feed.recv_timeout(IDLE).is_some() {
        in_flight += 1;
    }
    assert_eq!(in_flight, 4);
}

#[test]
fn test_stalled_subscription_does_not_block_others() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 1, 16);

    let mut stalled = store.watch("users", b"", store.current_cursor()).unwrap();
    stalled.pause();
    let mut active = store.watch("users", b"", store.current_cursor()).unwrap();

    for i in 0..50u32 {
        store
            .put("users", format!("k{:02}", i).as_bytes(), b"v")
            .unwrap();
    }

    // The active subscription streams everything while the paused one
    // sits on its single in-flight entry.
    for i in 0..50u32 {
        let entry = active.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(entry.key, format!("k{:02}", i).as_bytes());
    }

    assert!(stalled.recv_timeout(IDLE).unwrap().is_ok());
    assert!(stalled.recv_timeout(IDLE).is_none());
}

#[test]
fn test_resume_pays_grants_owed_for_paused_deliveries() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 1, 16);

    let mut feed = store.watch("users", b"", store.current_cursor()).unwrap();
    feed.pause();

    store.put("users", b"a", b"1").unwrap();
    store.put("users", b"b", b"2").unwrap();
    store.put("users", b"c", b"3").unwrap();

    // Consume the in-flight entry while paused; no credit goes back.
    assert_eq!(feed.recv_timeout(WAIT).unwrap().unwrap().key, b"a");
    assert!(feed.recv_timeout(IDLE).is_none());

    // Resuming settles the owed grant and the stream continues.
    feed.resume();
    assert_eq!(feed.recv_timeout(WAIT).unwrap().unwrap().key, b"b");
    assert_eq!(feed.recv_timeout(WAIT).unwrap().unwrap().key, b"c");
}

#[test]
fn test_pause_resume_cycles() {
    let dir = TempDir::new().unwrap();
    let store = store_with_credit(&dir, 1, 16);

    let mut feed = store.watch("users", b"", store.current_cursor()).unwrap();

    for round in 0..5u32 {
        store
            .put("users", format!("k{}", round).as_bytes(), b"v")
            .unwrap();
        feed.pause();
        let entry = feed.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(entry.key, format!("k{}", round).as_bytes());
        feed.resume();
    }
    assert_eq!(feed.state(), StreamState::Active);
}
