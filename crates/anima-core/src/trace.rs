//! Trace id generation
//!
//! Trace ids key queue state and tag every log line for one request or job,
//! so they must be globally unique and sortable by creation time.

use uuid::Uuid;

/// Generate a sortable, globally unique trace id.
///
/// Layout: 16 hex chars of millisecond timestamp followed by a 32-char
/// random tail. Lexicographic order matches creation order at millisecond
/// granularity.
pub fn generate() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{:016x}{}", now, Uuid::new_v4().simple())
}
