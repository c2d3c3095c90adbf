use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::common::create_test_db;
use crate::models::{ConnectionResponse, CreateConnectionRequest, DriverKind};
use crate::services::{ConnectionRegistry, MySQLPoolManager};
use crate::utils::ApiError;

fn request(name: &str, max_handles: Option<u32>) -> CreateConnectionRequest {
    CreateConnectionRequest {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port: 3306,
        database_name: "testdb".to_string(),
        driver: DriverKind::MySql,
        username: "scanner".to_string(),
        password: "hunter2".to_string(),
        enable_ssl: false,
        max_handles,
    }
}

async fn registry_with_timeout(acquire_timeout: Duration) -> ConnectionRegistry {
    let pool = create_test_db().await;
    ConnectionRegistry::new(pool, Arc::new(MySQLPoolManager::new()), 10, acquire_timeout)
}

#[tokio::test]
async fn register_lookup_and_list_round_trip() {
    let registry = registry_with_timeout(Duration::from_secs(1)).await;

    let created = registry.register(request("orders-db", None)).await.unwrap();
    let found = registry.lookup(created.id).await.unwrap();

    assert_eq!(found.name, "orders-db");
    assert_eq!(found.host, "127.0.0.1");
    assert_eq!(found.max_handles, 10);

    let all = registry.list().await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let registry = registry_with_timeout(Duration::from_secs(1)).await;

    registry.register(request("dup", None)).await.unwrap();
    let err = registry.register(request("dup", None)).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn lookup_of_unknown_id_is_not_found() {
    let registry = registry_with_timeout(Duration::from_secs(1)).await;
    let err = registry.lookup(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn handle_ceiling_blocks_then_fails_with_resource_exhausted() {
    let registry = registry_with_timeout(Duration::from_millis(150)).await;
    let id = registry.register(request("small-pool", Some(2))).await.unwrap().id;

    let first = registry.borrow(id).await.unwrap();
    let _second = registry.borrow(id).await.unwrap();
    assert_eq!(registry.live_handles(id), 2);

    // Ceiling reached: the next borrow waits out the timeout and fails
    let err = registry.borrow(id).await.unwrap_err();
    assert!(matches!(err, ApiError::ResourceExhausted(_)));

    // Releasing a handle frees a slot
    drop(first);
    let _third = registry.borrow(id).await.unwrap();
    assert_eq!(registry.live_handles(id), 2);
}

#[tokio::test]
async fn unregister_with_live_handles_is_busy() {
    let registry = registry_with_timeout(Duration::from_millis(150)).await;
    let id = registry.register(request("busy-db", Some(2))).await.unwrap().id;

    let handle = registry.borrow(id).await.unwrap();

    let err = registry.unregister(id).await.unwrap_err();
    assert!(matches!(err, ApiError::Busy(_)));

    // Descriptor must still be there after the refused unregister
    registry.lookup(id).await.unwrap();

    drop(handle);
    registry.unregister(id).await.unwrap();

    let err = registry.lookup(id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn borrow_after_unregister_is_not_found() {
    let registry = registry_with_timeout(Duration::from_millis(150)).await;
    let id = registry.register(request("gone-db", None)).await.unwrap().id;

    registry.unregister(id).await.unwrap();

    let err = registry.borrow(id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn read_paths_never_expose_credentials() {
    let registry = registry_with_timeout(Duration::from_secs(1)).await;
    let descriptor = registry.register(request("masked", None)).await.unwrap();

    let response = ConnectionResponse::from(&descriptor);
    let json = serde_json::to_string(&response).unwrap();
    assert!(!json.contains("hunter2"));

    let debug = format!("{:?}", descriptor);
    assert!(!debug.contains("hunter2"));
}
