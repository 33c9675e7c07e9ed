/// Property and concurrency tests for `Cache`, covering the invariants listed
/// in spec.md §8.
use bytes::Bytes;
use proptest::prelude::*;
use relaycache::cache::{Cache, MAX_ENTRY_SIZE};
use relaycache::create_cache_key;
use std::sync::Arc;

proptest! {
    // Invariant 1: total_bytes never exceeds capacity while non-empty.
    #[test]
    fn total_bytes_bounded(sizes in prop::collection::vec(1usize..200, 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let cache = Cache::with_capacity(500);
            for (i, size) in sizes.iter().enumerate() {
                let url = format!("host{i}.test");
                let key = create_cache_key(&url, "/");
                cache.insert(&url, key, Bytes::from(vec![0u8; *size]), None).await;
                if !cache.is_empty().await {
                    prop_assert!(cache.total_bytes() <= cache.capacity_bytes());
                }
            }
            Ok(())
        })?;
    }

    // Invariant: an entry larger than MAX_ENTRY_SIZE is never admitted.
    #[test]
    fn oversized_entries_always_rejected(extra in 1usize..1_000_000usize) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let cache = Cache::new();
            let key = create_cache_key("big.test", "/");
            let accepted = cache
                .insert("big.test", key, Bytes::from(vec![0u8; MAX_ENTRY_SIZE + extra]), None)
                .await;
            prop_assert!(!accepted);
            prop_assert_eq!(cache.len().await, 0);
            Ok(())
        })?;
    }
}

// Invariant 3 / round-trip 6: insert-then-lookup returns exactly what was
// stored, and re-inserting the same (url, bytes) leaves exactly one copy.
#[tokio::test]
async fn insert_lookup_roundtrip_and_idempotence() {
    let cache = Cache::new();
    let key = create_cache_key("example.test", "/hello");
    let body = Bytes::from_static(b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    assert!(cache.insert("example.test/hello", key, body.clone(), None).await);
    assert_eq!(cache.lookup(key).await, Some(body.clone()));

    let size_after_first = cache.total_bytes();
    assert!(cache.insert("example.test/hello", key, body.clone(), None).await);
    assert_eq!(cache.total_bytes(), size_after_first);
    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.lookup(key).await, Some(body));
}

// Scenario 3: with a small capacity, a touched entry survives eviction in
// favor of an older, untouched one. Capacity holds exactly two 60-byte
// entries, so a third forces a choice between the two already held.
#[tokio::test]
async fn eviction_spares_most_recently_used() {
    let cache = Cache::with_capacity(150);
    let a_key = create_cache_key("a.test", "/");
    let b_key = create_cache_key("b.test", "/");
    let c_key = create_cache_key("c.test", "/");

    assert!(cache.insert("a.test/", a_key, Bytes::from(vec![0u8; 60]), None).await);
    assert!(cache.insert("b.test/", b_key, Bytes::from(vec![0u8; 60]), None).await);
    assert!(cache.lookup(a_key).await.is_some());
    assert!(cache.insert("c.test/", c_key, Bytes::from(vec![0u8; 60]), None).await);

    assert!(cache.lookup(a_key).await.is_some());
    assert!(cache.lookup(c_key).await.is_some());
    assert!(cache.lookup(b_key).await.is_none());
}

// Invariant 5 / scenario 6: 50 concurrent lookups of a populated key all see
// the same bytes, and the cache ends up with exactly one entry for it.
#[tokio::test]
async fn fifty_concurrent_clients_see_identical_bytes() {
    let cache = Arc::new(Cache::new());
    let key = create_cache_key("shared.test", "/page");
    let body = Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nshared");
    cache.insert("shared.test/page", key, body.clone(), None).await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            assert_eq!(cache.lookup(key).await, Some(body));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.total_bytes(), body.len() + relaycache::cache::ENTRY_OVERHEAD_BYTES);
}

// Interleaved concurrent inserts/lookups across many distinct keys never
// corrupt accounting or produce duplicate URLs for one key.
#[tokio::test]
async fn concurrent_mixed_workload_preserves_invariants() {
    let cache = Arc::new(Cache::with_capacity(64 * 1024));
    let mut handles = Vec::new();

    for i in 0..64u64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let url = format!("host{i}.test/p");
            let key = create_cache_key(&url, "");
            for _ in 0..20 {
                cache
                    .insert(&url, key, Bytes::from(format!("body-{i}")), None)
                    .await;
                cache.lookup(key).await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(cache.total_bytes() <= cache.capacity_bytes());
    assert!(cache.len().await <= 64);
}
