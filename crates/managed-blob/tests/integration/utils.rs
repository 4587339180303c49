use std::sync::{Arc, Mutex};
use std::time::Duration;

use managed_blob::{BlobKey, BlobOptions, BlobSnapshot, ManagedBlob, RetryPolicy, Subscription};
use managed_blob_test::{MockStore, RecordingReporter};
use serde::{Deserialize, Serialize};

pub const DEBOUNCE: Duration = Duration::from_millis(500);
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub theme: String,
    pub font_size: u32,
}

pub fn settings(font_size: u32) -> Settings {
    Settings {
        theme: "dark".into(),
        font_size,
    }
}

pub fn raw(value: &Settings) -> String {
    serde_json::to_string(value).unwrap()
}

pub fn options() -> BlobOptions {
    BlobOptions {
        debounce_interval: DEBOUNCE,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: RETRY_BASE_DELAY,
        },
    }
}

pub fn settings_key() -> BlobKey {
    BlobKey::new("chat-1", "settings")
}

pub fn managed(
    store: &Arc<MockStore>,
    reporter: &Arc<RecordingReporter>,
) -> ManagedBlob<Settings> {
    ManagedBlob::new(settings_key(), store.clone(), reporter.clone(), options())
}

/// Records every snapshot a subscriber receives.
pub fn record_snapshots<T: managed_blob::BlobValue>(
    blob: &ManagedBlob<T>,
) -> (Arc<Mutex<Vec<BlobSnapshot<T>>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = blob.subscribe({
        let seen = Arc::clone(&seen);
        move |snapshot: &BlobSnapshot<T>| seen.lock().unwrap().push(snapshot.clone())
    });
    (seen, subscription)
}
