use std::sync::Arc;

use managed_blob::{BlobError, BlobKey, BlobRegistry, OwnerId};
use managed_blob_test::{MockStore, RecordingReporter};

use crate::{DEBOUNCE, Settings, options, raw, settings};

fn registry(store: &Arc<MockStore>) -> BlobRegistry<Settings> {
    BlobRegistry::new("settings", store.clone(), RecordingReporter::new(), options())
}

#[tokio::test(start_paused = true)]
async fn test_registry_memoizes_per_owner() {
    managed_blob_test::setup();

    let store = MockStore::new();
    let registry = registry(&store);
    assert!(registry.is_empty());

    let first = registry.get("chat-1");
    let again = registry.get(OwnerId::new("chat-1"));
    let other = registry.get("chat-2");

    assert!(first.same_blob(&again));
    assert!(!first.same_blob(&other));
    assert_eq!(first.key(), &BlobKey::new("chat-1", "settings"));
    assert_eq!(other.key(), &BlobKey::new("chat-2", "settings"));
    assert_eq!(registry.len(), 2);

    // state is shared between handles
    first.save_debounced(settings(1));
    assert_eq!(again.peek(), Some(settings(1)));
    assert_eq!(other.peek(), None);
}

#[tokio::test(start_paused = true)]
async fn test_forget() {
    managed_blob_test::setup();

    let store = MockStore::new();
    let registry = registry(&store);

    let first = registry.get("chat-1");
    first.save_debounced(settings(1));
    registry.forget(&OwnerId::new("chat-1"));
    assert!(registry.is_empty());

    let fresh = registry.get("chat-1");
    assert!(!first.same_blob(&fresh));
    assert!(!fresh.is_initialized());

    // the forgotten blob still writes its pending change
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(store.write_contents(), vec![raw(&settings(1))]);
}

#[tokio::test(start_paused = true)]
async fn test_save_all_pending() {
    managed_blob_test::setup();

    let store = MockStore::new();
    let registry = registry(&store);

    registry.get("chat-1").save_debounced(settings(1));
    registry.get("chat-2").save_debounced(settings(2));
    registry.get("chat-3");

    registry.save_all_pending().await.unwrap();

    let mut written: Vec<_> = store
        .writes()
        .into_iter()
        .map(|call| (call.key.owner.to_string(), call.content))
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec![
            ("chat-1".to_owned(), raw(&settings(1))),
            ("chat-2".to_owned(), raw(&settings(2))),
        ]
    );
    assert!(!registry.get("chat-1").has_pending_changes());
    assert!(!registry.get("chat-2").has_pending_changes());

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(store.writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_save_all_pending_flushes_everything_on_failure() {
    managed_blob_test::setup();

    let store = MockStore::new();
    store.fail_all_writes();
    let registry = registry(&store);

    registry.get("chat-1").save_debounced(settings(1));
    registry.get("chat-2").save_debounced(settings(2));

    let result = registry.save_all_pending().await;

    assert!(matches!(result, Err(BlobError::Transport(_))));
    // both blobs went through all attempts
    assert_eq!(store.writes().len(), 6);
    assert!(!registry.get("chat-1").has_pending_changes());
    assert!(!registry.get("chat-2").has_pending_changes());
}
