//! In-process cache store expiry.

use std::time::Duration;

use endpoint_cache::{CacheStore, MemoryStore};

#[tokio::test]
async fn entries_expire_after_their_own_lifetime() {
    let store = MemoryStore::new();

    store.set_ex("rpc;1;status;", b"short", 1).await.unwrap();
    store.set_ex("rpc;1;genesis;", b"long", 60).await.unwrap();

    assert_eq!(store.get("rpc;1;status;").await.unwrap(), Some(b"short".to_vec()));

    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert_eq!(store.get("rpc;1;status;").await.unwrap(), None);
    assert_eq!(store.get("rpc;1;genesis;").await.unwrap(), Some(b"long".to_vec()));
}

#[tokio::test]
async fn overwrite_replaces_value_and_lifetime() {
    let store = MemoryStore::new();

    store.set_ex("k", b"first", 60).await.unwrap();
    store.set_ex("k", b"second", 1).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"second".to_vec()));

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn missing_key_is_none() {
    let store = MemoryStore::with_max_entries(10);
    assert_eq!(store.get("absent").await.unwrap(), None);
}
