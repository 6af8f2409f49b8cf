//! Registry of live collector sessions.
//!
//! Lookup and diagnostics only; data flow does not depend on it.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

/// Snapshot of one session's identity and activity.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Server-assigned stream id.
    pub stream_id: String,
    /// Hostname announced by the client, once `INIT` was seen.
    pub hostname: Option<String>,
    /// Remote file path announced by the client.
    pub remote_path: Option<String>,
    /// When the connection was accepted.
    pub connected_at: Instant,
    /// Last time bytes or a command arrived.
    pub last_activity: Instant,
}

impl SessionInfo {
    fn new(stream_id: String) -> Self {
        let now = Instant::now();
        Self {
            stream_id,
            hostname: None,
            remote_path: None,
            connected_at: now,
            last_activity: now,
        }
    }
}

/// Live sessions keyed by stream id.
///
/// Stream ids are unique among open sessions; callers ensure uniqueness
/// before inserting, duplicates are not rejected here.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted session.
    pub async fn insert(&self, stream_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(stream_id.to_string(), SessionInfo::new(stream_id.to_string()));
    }

    /// Remove a session on teardown.
    pub async fn remove(&self, stream_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(stream_id);
    }

    /// Look up a session by id.
    pub async fn get(&self, stream_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.get(stream_id).cloned()
    }

    /// Whether a session with this id is currently open.
    pub async fn contains(&self, stream_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.contains_key(stream_id)
    }

    /// Record the announced identity after a successful `INIT`.
    pub async fn set_target(&self, stream_id: &str, hostname: &str, remote_path: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(info) = sessions.get_mut(stream_id) {
            info.hostname = Some(hostname.to_string());
            info.remote_path = Some(remote_path.to_string());
            info.last_activity = Instant::now();
        }
    }

    /// Bump the activity timestamp.
    pub async fn touch(&self, stream_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(info) = sessions.get_mut(stream_id) {
            info.last_activity = Instant::now();
        }
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.len()
    }

    /// Whether no session is open.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = SessionRegistry::new();
        registry.insert("ab12cd").await;

        let info = registry.get("ab12cd").await.unwrap();
        assert_eq!(info.stream_id, "ab12cd");
        assert!(info.hostname.is_none());
        assert_eq!(registry.len().await, 1);

        registry.remove("ab12cd").await;
        assert!(registry.get("ab12cd").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_target_records_identity() {
        let registry = SessionRegistry::new();
        registry.insert("ab12cd").await;
        registry
            .set_target("ab12cd", "web01", "/var/log/auth.log")
            .await;

        let info = registry.get("ab12cd").await.unwrap();
        assert_eq!(info.hostname.as_deref(), Some("web01"));
        assert_eq!(info.remote_path.as_deref(), Some("/var/log/auth.log"));
    }

    #[tokio::test]
    async fn test_touch_advances_activity() {
        let registry = SessionRegistry::new();
        registry.insert("ab12cd").await;
        let before = registry.get("ab12cd").await.unwrap().last_activity;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.touch("ab12cd").await;

        let after = registry.get("ab12cd").await.unwrap().last_activity;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_contains() {
        let registry = SessionRegistry::new();
        assert!(!registry.contains("ab12cd").await);
        registry.insert("ab12cd").await;
        assert!(registry.contains("ab12cd").await);
    }
}
