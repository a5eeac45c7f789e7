//! Tests for builder modules

use apply_governor::builders::build_store;
use apply_governor::config::StoreBackendConfig;
use apply_governor::util::serde::IdentityId;

#[test]
fn test_build_in_memory_store() {
    let store = build_store(&StoreBackendConfig::InMemory, 32).unwrap();
    let id = IdentityId::from("acct-1");
    store.register(&id, Some("vault://acct-1")).unwrap();
    assert_eq!(
        store.get(&id).unwrap().unwrap().credentials_ref.as_deref(),
        Some("vault://acct-1")
    );
}

#[test]
fn test_build_sqlite_store_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("governor.db");
    let store = build_store(&StoreBackendConfig::Sqlite { path: path.clone() }, 32).unwrap();
    assert!(store.conditional_set_running(&IdentityId::from("a"), 1).unwrap());
    assert!(path.exists());
}
