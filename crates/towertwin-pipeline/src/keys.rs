use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use uuid::Uuid;

static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp forced strictly monotonic within the process, so
/// two uploads in the same millisecond still get distinct storage keys.
fn next_upload_millis() -> i64 {
    let now = Utc::now().timestamp_millis();
    LAST_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .map(|last| now.max(last + 1))
        .unwrap_or(now)
}

/// Storage key for an uploaded source file: per-user prefix plus a
/// timestamp-qualified filename, e.g. `{user_id}/{millis}_{name}`.
pub fn source_object_key(user_id: Uuid, file_name: &str) -> String {
    format!("{user_id}/{}_{file_name}", next_upload_millis())
}
