//! Session store contract.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::record::{SessionPayload, SessionRecord};
use crate::StoreError;

/// Storage back-end for sessions.
///
/// Implementations persist [`SessionPayload`]s keyed by session ID and are
/// responsible for their own concurrency safety. Only `get`, `set` and
/// `destroy` are required; everything else is optional.
///
/// - [`InMemorySessionStore`](super::InMemorySessionStore): in-process storage for development and tests
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetches a session. A missing session is `Ok(None)` or `Err(StoreError::NotFound)`.
    async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, StoreError>;

    /// Creates or replaces a session.
    async fn set(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError>;

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError>;

    /// Refreshes a session's expiry without rewriting its data.
    ///
    /// Only called when [`supports_touch`](Self::supports_touch) returns true.
    async fn touch(&self, _session_id: &str, _record: &SessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("touch"))
    }

    fn supports_touch(&self) -> bool {
        false
    }

    /// Hands the store the readiness flag shared with the middleware.
    ///
    /// Stores with a remote connection call
    /// [`StoreReadiness::disconnect`] when it drops and
    /// [`StoreReadiness::connect`] once it is back.
    fn register_readiness(&self, _readiness: StoreReadiness) {}

    /// False for stores that must not be used in production.
    fn production_ready(&self) -> bool {
        true
    }

    async fn all(&self) -> Result<Vec<(String, SessionPayload)>, StoreError> {
        Err(StoreError::Unsupported("all"))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("clear"))
    }

    async fn length(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unsupported("length"))
    }
}

/// Connected/disconnected state of a store, shared by every in-flight request.
///
/// While disconnected, requests proceed without a session.
#[derive(Debug, Clone)]
pub struct StoreReadiness(Arc<AtomicBool>);

impl StoreReadiness {
    /// A flag in the connected state.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn connect(&self) {
        log::info!(target: "enclave_session", "msg=\"store connected\"");
        self.0.store(true, Ordering::Release);
    }

    pub fn disconnect(&self) {
        log::warn!(target: "enclave_session", "msg=\"store disconnected\"");
        self.0.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for StoreReadiness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalStore;

    #[async_trait]
    impl SessionStore for MinimalStore {
        async fn get(&self, _session_id: &str) -> Result<Option<SessionPayload>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _session_id: &str, _record: &SessionRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn destroy(&self, _session_id: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_optional_capabilities_default_to_unsupported() {
        let store = MinimalStore;
        assert!(!store.supports_touch());
        assert!(store.production_ready());
        assert_eq!(store.length().await, Err(StoreError::Unsupported("length")));
        assert_eq!(store.clear().await, Err(StoreError::Unsupported("clear")));
        assert!(store.all().await.is_err());
    }

    #[test]
    fn test_readiness_shared_between_clones() {
        let readiness = StoreReadiness::new();
        let observer = readiness.clone();
        assert!(observer.is_ready());

        readiness.disconnect();
        assert!(!observer.is_ready());

        readiness.connect();
        assert!(observer.is_ready());
    }
}
