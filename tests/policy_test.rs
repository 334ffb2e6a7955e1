//! Policy loading and reload from local and remote documents.

use std::sync::Arc;

use endpoint_cache::{GatewayError, PolicySource, PolicyStore, Protocol, Ttl};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INITIAL: &str = r#"{
    "DEFAULT": 6,
    "rpc": {"^abci_info$": 30, "genesis*": -1, "block*": 3},
    "rest": {"cosmos/staking/v1beta1/validators": 300}
}"#;

#[tokio::test]
async fn load_and_resolve_from_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cache_times.json");
    std::fs::write(&file, INITIAL).unwrap();

    let store = PolicyStore::load(PolicySource::local(&file)).await.unwrap();

    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));
    assert_eq!(store.resolve("/abci_info", Protocol::Rpc), Ttl::Seconds(30));
    assert_eq!(store.resolve("genesis_chunked", Protocol::Rpc), Ttl::Disabled);
    assert_eq!(store.resolve("block_results", Protocol::Rpc), Ttl::Seconds(3));
    // `block*` needs at least one character after the literal.
    assert_eq!(store.resolve("block", Protocol::Rpc), Ttl::Seconds(6));
    // Anchored: no partial matches.
    assert_eq!(store.resolve("x_abci_info", Protocol::Rpc), Ttl::Seconds(6));
    assert_eq!(
        store.resolve("cosmos/staking/v1beta1/validators", Protocol::Rest),
        Ttl::Seconds(300)
    );
    // Protocols are partitioned.
    assert_eq!(store.resolve("abci_info", Protocol::Rest), Ttl::Seconds(6));
}

#[tokio::test]
async fn reload_swaps_in_the_edited_document() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cache_times.json");
    std::fs::write(&file, INITIAL).unwrap();

    let store = PolicyStore::load(PolicySource::local(&file)).await.unwrap();
    let before = store.snapshot();

    std::fs::write(&file, r#"{"DEFAULT": 12, "rpc": {"abci_info": -1}}"#).unwrap();
    store.reload().await.unwrap();

    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Disabled);
    assert_eq!(store.resolve("status", Protocol::Rpc), Ttl::Seconds(12));
    assert_eq!(store.document().default, 12);

    // Snapshots taken earlier are unaffected.
    assert_eq!(before.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));
}

#[tokio::test]
async fn failed_reload_keeps_the_previous_table() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cache_times.json");
    std::fs::write(&file, INITIAL).unwrap();

    let store = PolicyStore::load(PolicySource::local(&file)).await.unwrap();

    std::fs::write(&file, "{ not json").unwrap();
    let err = store.reload().await.unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));

    std::fs::write(&file, r#"{"rpc": {"status": 0}}"#).unwrap();
    assert!(store.reload().await.is_err());
    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));
}

#[tokio::test]
async fn missing_document_is_fatal_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let result = PolicyStore::load(PolicySource::local(dir.path().join("absent.json"))).await;
    assert!(matches!(result, Err(GatewayError::Configuration(_))));
}

#[tokio::test]
async fn remote_document_is_downloaded_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cache_times.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INITIAL))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config").join("cache_times.json");
    let source =
        PolicySource::local(&file).with_remote(format!("{}/cache_times.json", server.uri()));

    let store = PolicyStore::load(source).await.unwrap();
    assert!(file.exists());
    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));

    // Reload reads the local copy.
    store.reload().await.unwrap();
}

#[tokio::test]
async fn invalid_remote_document_is_not_saved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cache_times.json");
    let source = PolicySource::local(&file).with_remote(server.uri());

    assert!(PolicyStore::load(source).await.is_err());
    assert!(!file.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resolvers_never_observe_a_mixed_table() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cache_times.json");
    let doc = |n: i64| format!(r#"{{"DEFAULT": {n}, "rpc": {{"a": {n}, "b": {n}}}}}"#);
    std::fs::write(&file, doc(10)).unwrap();

    let store = Arc::new(PolicyStore::load(PolicySource::local(&file)).await.unwrap());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..2000 {
                    let table = store.snapshot();
                    let a = table.resolve("a", Protocol::Rpc);
                    let b = table.resolve("b", Protocol::Rpc);
                    let other = table.resolve("c", Protocol::Rpc);
                    assert_eq!(a, b);
                    assert_eq!(a, other);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for n in 11..40 {
        std::fs::write(&file, doc(n)).unwrap();
        store.reload().await.unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(store.resolve("a", Protocol::Rpc), Ttl::Seconds(39));
}

#[tokio::test]
async fn bundled_policy_disables_exact_and_suffixed_paths() {
    let file = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("cache_times.json");
    let store = PolicyStore::load(PolicySource::local(file)).await.unwrap();

    for path in ["genesis", "/genesis", "genesis_chunked"] {
        assert_eq!(store.resolve(path, Protocol::Rpc), Ttl::Disabled, "{path}");
    }
    assert_eq!(store.resolve("block", Protocol::Rpc), Ttl::Seconds(3));
    assert_eq!(store.resolve("block_results", Protocol::Rpc), Ttl::Seconds(3));
    assert_eq!(store.resolve("abci_info", Protocol::Rpc), Ttl::Seconds(30));

    for path in ["cosmos/tx/v1beta1/txs", "cosmos/tx/v1beta1/txs/ABCDEF"] {
        assert_eq!(store.resolve(path, Protocol::Rest), Ttl::Disabled, "{path}");
    }
    assert_eq!(
        store.resolve("cosmos/bank/v1beta1/supply", Protocol::Rest),
        Ttl::Seconds(60)
    );
}
