//! In-memory session storage.
//!
//! Suitable for development, testing, and single-instance deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::record::{SessionPayload, SessionRecord};
use super::store::SessionStore;
use crate::StoreError;

/// In-memory session storage.
///
/// Sessions are kept as serialized JSON in a `HashMap` behind a `RwLock`, so
/// every `get` hands out a fresh, detached copy. Expired sessions are dropped
/// lazily when read and in bulk by [`prune_expired`](Self::prune_expired).
///
/// # Note
///
/// Sessions are lost when the process restarts and are not shared between
/// processes. Memory grows with the number of sessions until they are pruned.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired sessions and returns how many were dropped.
    pub fn prune_expired(&self) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| lock_poisoned())?;

        let before_count = sessions.len();
        sessions.retain(|_, raw| decode(raw).is_some_and(|payload| !is_expired(&payload)));

        let pruned = before_count.saturating_sub(sessions.len());
        Ok(u64::try_from(pruned).unwrap_or(u64::MAX))
    }

    fn read_live(&self, session_id: &str) -> Result<Option<SessionPayload>, StoreError> {
        let raw = {
            let sessions = self.sessions.read().map_err(|_| lock_poisoned())?;
            match sessions.get(session_id) {
                Some(raw) => raw.clone(),
                None => return Ok(None),
            }
        };

        let payload = decode(&raw).ok_or_else(|| {
            StoreError::Serialization(format!("corrupt session {session_id}"))
        })?;

        if is_expired(&payload) {
            self.sessions
                .write()
                .map_err(|_| lock_poisoned())?
                .remove(session_id);
            return Ok(None);
        }

        Ok(Some(payload))
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Backend("Lock poisoned".to_owned())
}

fn decode(raw: &str) -> Option<SessionPayload> {
    serde_json::from_str(raw).ok()
}

fn encode(payload: &SessionPayload) -> Result<String, StoreError> {
    serde_json::to_string(payload).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn is_expired(payload: &SessionPayload) -> bool {
    payload
        .get("cookie")
        .and_then(|cookie| cookie.get("expires"))
        .and_then(|expires| expires.as_str())
        .and_then(|expires| chrono::DateTime::parse_from_rfc3339(expires).ok())
        .is_some_and(|expires| expires <= chrono::Utc::now())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, StoreError> {
        self.read_live(session_id)
    }

    async fn set(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let raw = encode(&record.to_payload())?;
        self.sessions
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(session_id.to_owned(), raw);
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(|_| lock_poisoned())?
            .remove(session_id);
        Ok(())
    }

    async fn touch(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let Some(mut payload) = self.read_live(session_id)? else {
            return Ok(());
        };

        let cookie = serde_json::to_value(record.cookie())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        payload.insert("cookie".to_owned(), cookie);

        let raw = encode(&payload)?;
        self.sessions
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(session_id.to_owned(), raw);
        Ok(())
    }

    fn supports_touch(&self) -> bool {
        true
    }

    fn production_ready(&self) -> bool {
        false
    }

    async fn all(&self) -> Result<Vec<(String, SessionPayload)>, StoreError> {
        let ids: Vec<String> = self
            .sessions
            .read()
            .map_err(|_| lock_poisoned())?
            .keys()
            .cloned()
            .collect();

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(payload) = self.read_live(&id)? {
                sessions.push((id, payload));
            }
        }
        Ok(sessions)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.sessions.write().map_err(|_| lock_poisoned())?.clear();
        Ok(())
    }

    async fn length(&self) -> Result<usize, StoreError> {
        Ok(self.all().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::session::cookie::{CookieOptions, SessionCookie};

    fn create_test_record(id: &str, views: i64) -> SessionRecord {
        let options = CookieOptions {
            max_age: Some(Duration::hours(2)),
            ..Default::default()
        };
        let mut record = SessionRecord::new(id.to_owned(), SessionCookie::new(&options));
        record.set("views", views).unwrap();
        record
    }

    fn expired_record(id: &str) -> SessionRecord {
        let mut record = create_test_record(id, 0);
        record.cookie_mut().expires = Some(Utc::now() - Duration::hours(1));
        record
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemorySessionStore::new();
        store.set("s1", &create_test_record("s1", 1)).await.unwrap();

        let payload = store.get("s1").await.unwrap().unwrap();
        assert_eq!(payload["views"], json!(1));
        assert!(payload.contains_key("cookie"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_returns_detached_copy() {
        let store = InMemorySessionStore::new();
        let mut record = create_test_record("s1", 1);
        store.set("s1", &record).await.unwrap();

        record.set("views", 2).unwrap();
        let payload = store.get("s1").await.unwrap().unwrap();
        assert_eq!(payload["views"], json!(1));
    }

    #[tokio::test]
    async fn test_destroy() {
        let store = InMemorySessionStore::new();
        store.set("s1", &create_test_record("s1", 1)).await.unwrap();
        assert!(!store.is_empty());

        store.destroy("s1").await.unwrap();
        assert!(store.is_empty());
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_dropped_on_read() {
        let store = InMemorySessionStore::new();
        store.set("old", &expired_record("old")).await.unwrap();
        assert_eq!(store.len(), 1);

        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_touch_rewrites_cookie_only() {
        let store = InMemorySessionStore::new();
        let mut record = create_test_record("s1", 1);
        store.set("s1", &record).await.unwrap();

        record.set("views", 99).unwrap();
        record.cookie_mut().path = "/touched".to_owned();
        store.touch("s1", &record).await.unwrap();

        let payload = store.get("s1").await.unwrap().unwrap();
        assert_eq!(payload["views"], json!(1));
        assert_eq!(payload["cookie"]["path"], json!("/touched"));
    }

    #[tokio::test]
    async fn test_touch_missing_session_is_noop() {
        let store = InMemorySessionStore::new();
        store.touch("ghost", &create_test_record("ghost", 1)).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_all_length_and_clear() {
        let store = InMemorySessionStore::new();
        store.set("a", &create_test_record("a", 1)).await.unwrap();
        store.set("b", &create_test_record("b", 2)).await.unwrap();
        store.set("old", &expired_record("old")).await.unwrap();

        assert_eq!(store.length().await.unwrap(), 2);
        let mut ids: Vec<String> = store.all().await.unwrap().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_owned(), "b".to_owned()]);

        store.clear().await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let store = InMemorySessionStore::new();
        store.set("old", &expired_record("old")).await.unwrap();
        store.set("new", &create_test_record("new", 1)).await.unwrap();
        assert_eq!(store.len(), 2);

        let pruned = store.prune_expired().unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_len_counts_through_poisoned_lock() {
        let store = InMemorySessionStore::new();
        store.set("s1", &create_test_record("s1", 1)).await.unwrap();

        let sessions = std::sync::Arc::clone(&store.sessions);
        let _ = std::thread::spawn(move || {
            let _guard = sessions.write().unwrap();
            panic!("writer panicked");
        })
        .join();

        assert!(store.sessions.is_poisoned());
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_not_production_ready() {
        let store = InMemorySessionStore::new();
        assert!(!store.production_ready());
        assert!(store.supports_touch());
    }
}
