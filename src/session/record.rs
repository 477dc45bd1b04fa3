use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::cookie::SessionCookie;
use crate::SessionError;

/// Raw session as persisted by a store: the cookie under `"cookie"` plus the
/// application fields at the top level.
pub type SessionPayload = Map<String, Value>;

/// Keys a store payload can never write into the session data.
pub const RESERVED_KEYS: [&str; 2] = ["id", "cookie"];

/// A detached snapshot of one session.
///
/// The record is owned by the request for its duration; the store owns the
/// durable copy and the two are synchronized explicitly through save and
/// reload. The ID never changes for the life of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    id: String,
    cookie: SessionCookie,
    data: Map<String, Value>,
}

impl SessionRecord {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: String, cookie: SessionCookie) -> Self {
        Self {
            id,
            cookie,
            data: Map::new(),
        }
    }

    /// Materializes a record from a store payload.
    ///
    /// The payload's `cookie` object becomes the record cookie, falling back
    /// to `default_cookie` when it is missing or unreadable. Every other
    /// top-level field is merged into the data except the reserved keys.
    #[must_use]
    pub fn from_payload(id: String, mut payload: SessionPayload, default_cookie: SessionCookie) -> Self {
        let cookie = payload
            .remove("cookie")
            .and_then(|raw| match serde_json::from_value::<SessionCookie>(raw) {
                Ok(cookie) => Some(cookie),
                Err(e) => {
                    log::warn!(target: "enclave_session", "msg=\"stored cookie unreadable\" error=\"{e}\"");
                    None
                }
            })
            .unwrap_or(default_cookie);

        let mut record = Self::new(id, cookie);
        for (key, value) in payload {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            record.data.entry(key).or_insert(value);
        }
        record
    }

    /// Serializes the record for a store. The ID is not part of the payload.
    #[must_use]
    pub fn to_payload(&self) -> SessionPayload {
        let mut payload = self.data.clone();
        // SessionCookie serialization cannot fail: all fields are plain values
        let cookie = serde_json::to_value(&self.cookie).unwrap_or(Value::Null);
        payload.insert("cookie".to_owned(), cookie);
        payload
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    pub fn cookie_mut(&mut self) -> &mut SessionCookie {
        &mut self.cookie
    }

    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Reads a field, deserializing it into `T`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores a raw JSON value under `key`. Reserved keys are ignored.
    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        if RESERVED_KEYS.contains(&key) {
            log::warn!(target: "enclave_session", "msg=\"reserved session key ignored\" key=\"{key}\"");
            return None;
        }
        self.data.insert(key.to_owned(), value)
    }

    /// Serializes `value` and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Serialization` if `value` cannot be represented as JSON.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<Option<Value>, SessionError> {
        let value = serde_json::to_value(value)?;
        Ok(self.insert(key, value))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Removes every application field. The cookie is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Refreshes the cookie expiry to its original lifetime.
    pub fn touch(&mut self) -> &mut Self {
        self.cookie.touch();
        self
    }
}

/// Whether `id` can name a session. Empty IDs come only from a broken custom generator.
#[must_use]
pub fn is_well_formed_id(id: &str) -> bool {
    !id.is_empty()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::cookie::CookieSecure;

    #[test]
    fn test_set_and_get() {
        let mut record = SessionRecord::new("abc".to_owned(), SessionCookie::default());
        record.set("views", 3).unwrap();
        record.set("user", json!({"name": "ann"})).unwrap();

        assert_eq!(record.get::<i64>("views"), Some(3));
        assert_eq!(record.get::<String>("views"), None);
        assert_eq!(record.get_value("user"), Some(&json!({"name": "ann"})));
        assert!(record.get::<i64>("missing").is_none());
    }

    #[test]
    fn test_reserved_keys_never_written() {
        let mut record = SessionRecord::new("abc".to_owned(), SessionCookie::default());
        assert!(record.insert("id", json!("evil")).is_none());
        assert!(record.insert("cookie", json!({})).is_none());
        assert!(record.is_empty());
        assert_eq!(record.id(), "abc");
    }

    #[test]
    fn test_from_payload_merges_fields() {
        let payload = json!({
            "cookie": {"originalMaxAge": null, "expires": null, "secure": "auto", "httpOnly": false, "path": "/app"},
            "id": "other",
            "views": 1,
            "cart": [1, 2]
        });
        let Value::Object(payload) = payload else { unreachable!() };

        let record = SessionRecord::from_payload("A1".to_owned(), payload, SessionCookie::default());

        assert_eq!(record.id(), "A1");
        assert_eq!(record.cookie().path, "/app");
        assert_eq!(record.cookie().secure, CookieSecure::Auto);
        assert!(!record.cookie().http_only);
        assert_eq!(record.get::<i64>("views"), Some(1));
        assert_eq!(record.get::<Vec<i64>>("cart"), Some(vec![1, 2]));
        assert!(record.get_value("id").is_none());
        assert!(record.get_value("cookie").is_none());
    }

    #[test]
    fn test_from_payload_without_cookie_uses_default() {
        let mut payload = SessionPayload::new();
        payload.insert("views".to_owned(), json!(2));
        let default_cookie = SessionCookie {
            path: "/default".to_owned(),
            ..Default::default()
        };

        let record = SessionRecord::from_payload("A1".to_owned(), payload, default_cookie);
        assert_eq!(record.cookie().path, "/default");
        assert_eq!(record.get::<i64>("views"), Some(2));
    }

    #[test]
    fn test_payload_roundtrip_keeps_fields() {
        let mut record = SessionRecord::new("abc".to_owned(), SessionCookie::default());
        record.set("views", 7).unwrap();

        let payload = record.to_payload();
        assert!(payload.contains_key("cookie"));
        assert!(!payload.contains_key("id"));

        let restored = SessionRecord::from_payload("abc".to_owned(), payload, SessionCookie::default());
        assert_eq!(restored, record);
    }

    #[test]
    fn test_well_formed_id() {
        assert!(is_well_formed_id("abc"));
        assert!(!is_well_formed_id(""));
    }
}
