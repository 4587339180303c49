use std::sync::Arc;
use std::time::Duration;

use managed_blob::config::HttpStoreConfig;
use managed_blob::{
    BlobError, BlobKey, BlobStore, FilesystemBlobStore, HttpBlobStore, ManagedBlob,
    TracingReporter,
};
use managed_blob_test::{AUTH_TOKEN, BlobServer};

use crate::{Settings, options, raw, settings, settings_key};

fn http_store(config: &HttpStoreConfig) -> HttpBlobStore {
    HttpBlobStore::new(config).unwrap()
}

#[tokio::test]
async fn test_http_round_trip() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    let store = http_store(&server.store_config("blobs/"));
    let key = settings_key();

    assert_eq!(store.read(&key).await, Err(BlobError::NotFound));

    store.write(&key, raw(&settings(14))).await.unwrap();
    assert_eq!(server.blob("chat-1", "settings"), Some(raw(&settings(14))));
    assert_eq!(store.read(&key).await, Ok(raw(&settings(14))));

    store.remove(&key).await.unwrap();
    assert_eq!(server.blob("chat-1", "settings"), None);
    // removing twice is fine
    store.remove(&key).await.unwrap();

    assert_eq!(server.accesses(), 5);
}

#[tokio::test]
async fn test_http_status_mapping() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    let key = settings_key();

    let store = http_store(&server.store_config("status/404/"));
    assert_eq!(store.read(&key).await, Err(BlobError::NotFound));

    for code in [401, 403] {
        let store = http_store(&server.store_config(&format!("status/{code}/")));
        let result = store.read(&key).await;
        assert!(
            matches!(result, Err(BlobError::PermissionDenied(_))),
            "{code}: {result:?}"
        );
        let result = store.write(&key, "{}".into()).await;
        assert!(matches!(result, Err(BlobError::PermissionDenied(_))));
    }

    let store = http_store(&server.store_config("status/500/"));
    let result = store.read(&key).await;
    assert_eq!(
        result,
        Err(BlobError::Transport("500 Internal Server Error".into()))
    );
    let result = store.remove(&key).await;
    assert!(matches!(result, Err(BlobError::Transport(_))));
}

#[tokio::test]
async fn test_http_auth_token() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    server.insert("chat-1", "settings", &raw(&settings(14)));
    let key = settings_key();

    let anonymous = http_store(&server.store_config("private/"));
    let result = anonymous.read(&key).await;
    assert!(matches!(result, Err(BlobError::PermissionDenied(_))));

    let wrong = http_store(&HttpStoreConfig {
        auth_token: Some("guess".into()),
        ..server.store_config("private/")
    });
    let result = wrong.read(&key).await;
    assert!(matches!(result, Err(BlobError::PermissionDenied(_))));

    let authorized = http_store(&HttpStoreConfig {
        auth_token: Some(AUTH_TOKEN.into()),
        ..server.store_config("private/")
    });
    assert_eq!(authorized.read(&key).await, Ok(raw(&settings(14))));
}

#[tokio::test]
async fn test_http_timeout() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    let timeout = Duration::from_millis(100);
    let store = http_store(&HttpStoreConfig {
        timeout,
        ..server.store_config("delay/5s/")
    });

    let result = store.read(&settings_key()).await;
    assert_eq!(result, Err(BlobError::Timeout(timeout)));
}

#[tokio::test]
async fn test_http_escapes_key() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    let store = http_store(&server.store_config("blobs/"));
    let key = BlobKey::new("chat 1", "notes");

    store.write(&key, "[]".into()).await.unwrap();

    assert_eq!(server.blob("chat 1", "notes"), Some("[]".into()));
    assert_eq!(
        server.all_hits(),
        vec![("/blobs/chat%201/notes".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_managed_blob_over_http() {
    managed_blob_test::setup();

    let server = BlobServer::new();
    let store: Arc<dyn BlobStore> = Arc::new(http_store(&server.store_config("blobs/")));

    let writer: ManagedBlob<Settings> = ManagedBlob::new(
        settings_key(),
        Arc::clone(&store),
        Arc::new(TracingReporter),
        options(),
    );
    assert_eq!(writer.get().await, Ok(None));
    writer.save(settings(18)).await.unwrap();

    let reader: ManagedBlob<Settings> =
        ManagedBlob::new(settings_key(), store, Arc::new(TracingReporter), options());
    assert_eq!(reader.get().await, Ok(Some(settings(18))));
}

#[tokio::test]
async fn test_filesystem_round_trip() {
    managed_blob_test::setup();

    let dir = managed_blob_test::tempdir();
    let store = FilesystemBlobStore::new(dir.path());
    let key = settings_key();

    assert_eq!(store.read(&key).await, Err(BlobError::NotFound));

    store.write(&key, raw(&settings(14))).await.unwrap();
    let path = dir.path().join("chat-1").join("settings.json");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), raw(&settings(14)));
    assert_eq!(store.read(&key).await, Ok(raw(&settings(14))));

    store.write(&key, raw(&settings(16))).await.unwrap();
    assert_eq!(store.read(&key).await, Ok(raw(&settings(16))));

    store.remove(&key).await.unwrap();
    assert!(!path.exists());
    store.remove(&key).await.unwrap();
    assert_eq!(store.read(&key).await, Err(BlobError::NotFound));
}

#[tokio::test]
async fn test_filesystem_rejects_invalid_keys() {
    managed_blob_test::setup();

    let dir = managed_blob_test::tempdir();
    let store = FilesystemBlobStore::new(dir.path());
    let key = BlobKey::new("..", "settings");

    let result = store.write(&key, "{}".into()).await;
    assert!(matches!(result, Err(BlobError::InvalidKey(_))));
    let result = store.read(&key).await;
    assert!(matches!(result, Err(BlobError::InvalidKey(_))));
}
