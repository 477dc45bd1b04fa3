//! Middleware-side wrapper around a [`SessionStore`].

use std::sync::Arc;

use super::config::GenerateId;
use super::cookie::{CookieOptions, SessionCookie};
use super::record::{SessionPayload, SessionRecord};
use super::request::RequestContext;
use super::store::{SessionStore, StoreReadiness};
use crate::StoreError;

const MEMORY_STORE_WARNING: &str = "Warning: the in-memory session store is not designed for a \
production environment, as it will leak memory, and will not scale past a single process.";

/// Owns the store together with everything needed to mint session records:
/// the ID generator, the cookie template and the readiness flag.
pub struct StoreAdapter {
    store: Arc<dyn SessionStore>,
    readiness: StoreReadiness,
    supports_touch: bool,
    genid: GenerateId,
    cookie: CookieOptions,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn SessionStore>, genid: GenerateId, cookie: CookieOptions) -> Self {
        let readiness = StoreReadiness::new();
        store.register_readiness(readiness.clone());

        if cfg!(not(debug_assertions)) && !store.production_ready() {
            log::warn!(target: "enclave_session", "msg=\"{MEMORY_STORE_WARNING}\"");
        }

        let supports_touch = store.supports_touch();

        Self {
            store,
            readiness,
            supports_touch,
            genid,
            cookie,
        }
    }

    /// Whether the store is connected. Readers always see the latest state.
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn readiness(&self) -> &StoreReadiness {
        &self.readiness
    }

    /// Whether the store implements `touch`, detected once at construction.
    pub fn supports_touch(&self) -> bool {
        self.supports_touch
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cookie_options(&self) -> &CookieOptions {
        &self.cookie
    }

    /// Mints a fresh, empty session with a new ID.
    pub fn generate(&self, request: &RequestContext) -> SessionRecord {
        let id = (self.genid)(request);
        SessionRecord::new(id, SessionCookie::new(&self.cookie))
    }

    /// Builds a session from a store payload.
    pub fn create_session(&self, session_id: String, payload: SessionPayload) -> SessionRecord {
        SessionRecord::from_payload(session_id, payload, SessionCookie::new(&self.cookie))
    }

    /// Fetches and materializes a session, folding `NotFound` into `None`.
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        match self.get(session_id).await {
            Ok(Some(payload)) => Ok(Some(self.create_session(session_id.to_owned(), payload))),
            Ok(None) | Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Destroys `session_id` and mints a replacement.
    ///
    /// The replacement is generated even if the destroy fails; the destroy
    /// error is returned next to it.
    pub async fn regenerate(
        &self,
        session_id: &str,
        request: &RequestContext,
    ) -> (SessionRecord, Result<(), StoreError>) {
        let destroyed = self.destroy(session_id).await;
        (self.generate(request), destroyed)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_store_get", skip_all, err))]
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, StoreError> {
        log::debug!(target: "enclave_session", "msg=\"fetching session\"");
        self.store.get(session_id).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_store_set", skip_all, err))]
    pub async fn set(&self, record: &SessionRecord) -> Result<(), StoreError> {
        log::debug!(target: "enclave_session", "msg=\"saving session\"");
        self.store.set(record.id(), record).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_store_destroy", skip_all, err))]
    pub async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        log::debug!(target: "enclave_session", "msg=\"destroying session\"");
        self.store.destroy(session_id).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_store_touch", skip_all, err))]
    pub async fn touch(&self, record: &SessionRecord) -> Result<(), StoreError> {
        log::debug!(target: "enclave_session", "msg=\"touching session\"");
        self.store.touch(record.id(), record).await
    }
}
