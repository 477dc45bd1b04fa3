//! Per-request session negotiation.
//!
//! [`SessionNegotiator::begin`] turns an incoming request into a
//! [`Negotiation`]: it reads the signed cookie, loads or generates the
//! session and snapshots its fingerprint. The framework glue then hands the
//! [`Session`] handle to application code, and once the handler has produced
//! a response it calls the two commit phases exactly once each:
//!
//! 1. [`Negotiation::commit_headers`] decides whether a `Set-Cookie` header is
//!    emitted.
//! 2. [`Negotiation::complete`] decides between destroy, save, touch or
//!    nothing, and performs the store round-trip before the response is
//!    released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::adapter::StoreAdapter;
use super::config::{SessionConfig, Settings, UnsetBehavior};
use super::cookie::SessionCookie;
use super::fingerprint::digest;
use super::memory_store::InMemorySessionStore;
use super::record::{SessionRecord, is_well_formed_id};
use super::request::RequestContext;
use super::signature::{decode_session_cookie, encode_session_cookie};
use super::store::SessionStore;
use crate::{SecretList, SessionError, StoreError};

/// Session middleware core, shared by every request.
pub struct SessionNegotiator {
    settings: Arc<Settings>,
    adapter: Arc<StoreAdapter>,
}

impl SessionNegotiator {
    /// Validates `config` and binds it to `store`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` for invalid configuration.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Result<Self, SessionError> {
        let (settings, genid) = config.resolve()?;
        let adapter = StoreAdapter::new(store, genid, settings.cookie.clone());

        Ok(Self {
            settings: Arc::new(settings),
            adapter: Arc::new(adapter),
        })
    }

    /// Same as [`new`](Self::new) with an [`InMemorySessionStore`].
    pub fn with_memory_store(config: SessionConfig) -> Result<Self, SessionError> {
        Self::new(Arc::new(InMemorySessionStore::new()), config)
    }

    pub fn adapter(&self) -> &StoreAdapter {
        &self.adapter
    }

    pub fn cookie_name(&self) -> &str {
        &self.settings.cookie_name
    }

    /// Starts negotiating the session of one request.
    ///
    /// Returns `Ok(None)` when the request proceeds without a session: the
    /// store is disconnected or the path is outside the cookie path.
    ///
    /// # Errors
    ///
    /// - `SessionError::MissingSecret` if no secret is configured or supplied upstream
    /// - `SessionError::Store` if the lookup fails for any reason other than not found
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_begin", skip_all, err))]
    pub async fn begin(&self, request: RequestContext) -> Result<Option<Negotiation>, SessionError> {
        if !self.adapter.is_ready() {
            log::debug!(target: "enclave_session", "msg=\"store is disconnected\"");
            return Ok(None);
        }

        if !request.path.starts_with(&self.settings.cookie.cookie_path) {
            log::debug!(target: "enclave_session", "msg=\"path outside cookie path\"");
            return Ok(None);
        }

        let secrets = match (&self.settings.secrets, &request.upstream_secret) {
            (Some(secrets), _) => secrets.clone(),
            (None, Some(secret)) if !secret.is_empty() => SecretList::from(secret.clone()),
            _ => return Err(SessionError::MissingSecret),
        };

        let cookie_id = request
            .cookie_header
            .as_deref()
            .and_then(|header| decode_session_cookie(header, &self.settings.cookie_name, &secrets));

        let mut state = NegotiationState {
            cookie_id: cookie_id.clone(),
            ..Default::default()
        };

        match cookie_id {
            None => {
                log::debug!(target: "enclave_session", "msg=\"no SID sent, generating session\"");
                state.install_generated(self.adapter.generate(&request));
            }
            Some(id) => match self.adapter.get(&id).await {
                Ok(Some(payload)) => {
                    log::debug!(target: "enclave_session", "msg=\"session found\"");
                    let record = self.adapter.create_session(id, payload);
                    state.install_loaded(record, self.settings.resave);
                }
                Ok(None) | Err(StoreError::NotFound) => {
                    log::debug!(target: "enclave_session", "msg=\"no session found\"");
                    state.install_generated(self.adapter.generate(&request));
                }
                Err(e) => {
                    log::error!(target: "enclave_session", "msg=\"session lookup failed\" error=\"{e}\"");
                    return Err(e.into());
                }
            },
        }

        Ok(Some(Negotiation {
            shared: Arc::new(Shared {
                settings: Arc::clone(&self.settings),
                adapter: Arc::clone(&self.adapter),
                request,
                secrets,
                state: Mutex::new(state),
            }),
        }))
    }
}

impl fmt::Debug for SessionNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionNegotiator")
            .field("settings", &self.settings)
            .field("store_ready", &self.adapter.is_ready())
            .finish_non_exhaustive()
    }
}

struct Shared {
    settings: Arc<Settings>,
    adapter: Arc<StoreAdapter>,
    request: RequestContext,
    secrets: SecretList,
    state: Mutex<NegotiationState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, NegotiationState> {
        // state is plain data updated in single assignments, a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request-scoped decision state. Never persisted.
#[derive(Debug, Default)]
struct NegotiationState {
    /// Current session ID. Survives `destroy`/`unset` so an unset session can still be destroyed.
    session_id: Option<String>,
    record: Option<SessionRecord>,
    /// ID read from the request cookie.
    cookie_id: Option<String>,
    original_id: Option<String>,
    original_hash: Option<String>,
    saved_hash: Option<String>,
    touched: bool,
    headers_committed: bool,
    ended: bool,
}

enum Commit {
    Destroy(String),
    Save(SessionRecord),
    Touch(SessionRecord),
    Nothing,
}

impl NegotiationState {
    fn install_generated(&mut self, record: SessionRecord) {
        self.original_id = Some(record.id().to_owned());
        self.original_hash = Some(digest(&record));
        self.session_id = Some(record.id().to_owned());
        self.record = Some(record);
    }

    fn install_loaded(&mut self, record: SessionRecord, resave: bool) {
        self.install_generated(record);
        if !resave {
            self.saved_hash = self.original_hash.clone();
        }
    }

    fn is_modified(&self, record: &SessionRecord) -> bool {
        self.original_id.as_deref() != Some(record.id())
            || self.original_hash.as_deref() != Some(digest(record).as_str())
    }

    fn is_saved(&self, record: &SessionRecord) -> bool {
        self.original_id.as_deref() == Some(record.id())
            && self.saved_hash.as_deref() == Some(digest(record).as_str())
    }

    fn cookie_matches(&self, record: &SessionRecord) -> bool {
        self.cookie_id.as_deref() == Some(record.id())
    }

    fn active_record(&self) -> Option<&SessionRecord> {
        let record = self.record.as_ref()?;
        if is_well_formed_id(record.id()) {
            Some(record)
        } else {
            log::debug!(target: "enclave_session", "msg=\"session ignored because of bogus session id\"");
            None
        }
    }

    fn should_destroy(&self, settings: &Settings) -> bool {
        self.session_id.is_some() && settings.unset == UnsetBehavior::Destroy && self.record.is_none()
    }

    fn should_save(&self, settings: &Settings) -> bool {
        let Some(record) = self.active_record() else {
            return false;
        };

        if !settings.save_uninitialized && !self.cookie_matches(record) {
            self.is_modified(record)
        } else {
            !self.is_saved(record)
        }
    }

    fn should_touch(&self, settings: &Settings) -> bool {
        let Some(record) = self.active_record() else {
            return false;
        };

        self.cookie_matches(record) && !self.should_save(settings)
    }

    fn should_set_cookie(&self, settings: &Settings) -> bool {
        let Some(record) = self.active_record() else {
            return false;
        };

        if self.cookie_matches(record) {
            settings.rolling || (record.cookie().has_expiry() && self.is_modified(record))
        } else {
            settings.save_uninitialized || self.is_modified(record)
        }
    }

    fn ensure_touched(&mut self) {
        if self.touched {
            return;
        }
        if let Some(record) = self.record.as_mut() {
            record.touch();
            self.touched = true;
        }
    }
}

/// One request's negotiation, driven by the framework glue.
pub struct Negotiation {
    shared: Arc<Shared>,
}

impl Negotiation {
    /// Handle to expose to application code.
    pub fn session(&self) -> Session {
        Session {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Header phase. Returns the `Set-Cookie` value to append, if any.
    ///
    /// Runs once; later calls return `None`.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_commit_headers", skip_all))]
    pub fn commit_headers(&self) -> Option<String> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.headers_committed {
            return None;
        }
        state.headers_committed = true;

        if state.record.is_none() {
            log::debug!(target: "enclave_session", "msg=\"no session\"");
            return None;
        }

        if !state.should_set_cookie(&shared.settings) {
            return None;
        }

        let request_secure = shared.request.is_secure(shared.settings.trust_proxy);
        let secure = state
            .record
            .as_ref()
            .is_some_and(|record| record.cookie().secure.resolve(request_secure));

        // a secure cookie is never sent over plaintext
        if secure && !request_secure {
            log::debug!(target: "enclave_session", "msg=\"not secured\"");
            return None;
        }

        state.ensure_touched();

        let record = state.record.as_ref()?;
        Some(encode_session_cookie(
            &shared.settings.cookie_name,
            record.id(),
            shared.secrets.primary(),
            record.cookie(),
            secure,
        ))
    }

    /// Completion phase: destroys, saves or touches the session as needed.
    ///
    /// Runs once; later calls return `Ok(())` without touching the store.
    ///
    /// # Errors
    ///
    /// Returns the store error, which the caller reports without failing the response.
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "session_complete", skip_all, err))]
    pub async fn complete(&self) -> Result<(), SessionError> {
        let shared = &self.shared;

        let commit = {
            let mut state = shared.lock();
            if state.ended {
                return Ok(());
            }
            state.ended = true;

            if state.should_destroy(&shared.settings) {
                state.session_id.clone().map_or(Commit::Nothing, Commit::Destroy)
            } else if state.record.is_none() {
                log::debug!(target: "enclave_session", "msg=\"no session\"");
                Commit::Nothing
            } else {
                state.ensure_touched();

                if state.should_save(&shared.settings) {
                    match state.record.clone() {
                        Some(record) => {
                            state.saved_hash = Some(digest(&record));
                            Commit::Save(record)
                        }
                        None => Commit::Nothing,
                    }
                } else if shared.adapter.supports_touch() && state.should_touch(&shared.settings) {
                    state.record.clone().map_or(Commit::Nothing, Commit::Touch)
                } else {
                    Commit::Nothing
                }
            }
        };

        match commit {
            Commit::Destroy(session_id) => {
                shared.adapter.destroy(&session_id).await?;
                log::debug!(target: "enclave_session", "msg=\"destroyed\"");
            }
            Commit::Save(record) => shared.adapter.set(&record).await?,
            Commit::Touch(record) => {
                shared.adapter.touch(&record).await?;
                log::debug!(target: "enclave_session", "msg=\"touched\"");
            }
            Commit::Nothing => {}
        }

        Ok(())
    }
}

/// Application-facing handle to the current request's session.
///
/// Clones share the same underlying session. Mutations are synchronous; the
/// store round-trips (`save`, `reload`, `destroy`, `regenerate`) are async.
/// Once the session is destroyed or unset, accessors return `None` and
/// mutations fail with `SessionError::NoActiveSession`.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Current session ID, if the session is active.
    pub fn id(&self) -> Option<String> {
        self.shared.lock().record.as_ref().map(|record| record.id().to_owned())
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().record.is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.shared.lock().record.as_ref()?.get(key)
    }

    /// Serializes `value` under `key`.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` after destroy/unset, `Serialization` if `value` is not JSON-representable.
    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        let mut state = self.shared.lock();
        let record = state.record.as_mut().ok_or(SessionError::NoActiveSession)?;
        record.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.shared.lock().record.as_mut()?.remove(key)
    }

    /// Removes every application field.
    pub fn clear(&self) {
        if let Some(record) = self.shared.lock().record.as_mut() {
            record.clear();
        }
    }

    pub fn cookie(&self) -> Option<SessionCookie> {
        self.shared.lock().record.as_ref().map(|record| record.cookie().clone())
    }

    /// Adjusts the cookie of the current session.
    pub fn update_cookie(&self, f: impl FnOnce(&mut SessionCookie)) {
        if let Some(record) = self.shared.lock().record.as_mut() {
            f(record.cookie_mut());
        }
    }

    /// Runs `f` against a read-only view of the record.
    pub fn with_record<R>(&self, f: impl FnOnce(&SessionRecord) -> R) -> Option<R> {
        self.shared.lock().record.as_ref().map(f)
    }

    /// Resets the cookie expiry to its original lifetime.
    pub fn touch(&self) -> &Self {
        if let Some(record) = self.shared.lock().record.as_mut() {
            record.touch();
        }
        self
    }

    /// Persists the session now.
    ///
    /// An explicit save marks the current content as saved, so the same
    /// content is not written again when the response completes.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` after destroy/unset, or the store error.
    pub async fn save(&self) -> Result<&Self, SessionError> {
        let record = {
            let mut state = self.shared.lock();
            let record = state.record.clone().ok_or(SessionError::NoActiveSession)?;
            state.saved_hash = Some(digest(&record));
            record
        };

        log::debug!(target: "enclave_session", "msg=\"saving\"");
        self.shared.adapter.set(&record).await?;
        Ok(self)
    }

    /// Replaces the session content with the stored copy.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the store no longer holds the session,
    /// `NoActiveSession` after destroy/unset, or the store error.
    pub async fn reload(&self) -> Result<&Self, SessionError> {
        let session_id = self.id().ok_or(SessionError::NoActiveSession)?;
        log::debug!(target: "enclave_session", "msg=\"reloading\"");

        let record = self
            .shared
            .adapter
            .load(&session_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        let mut state = self.shared.lock();
        state.session_id = Some(session_id);
        state.record = Some(record);
        Ok(self)
    }

    /// Detaches the session from the request and deletes it from the store.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` if already gone, or the store error.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        let record = self
            .shared
            .lock()
            .record
            .take()
            .ok_or(SessionError::NoActiveSession)?;

        self.shared.adapter.destroy(record.id()).await?;
        Ok(())
    }

    /// Replaces the session with a fresh one under a new ID.
    ///
    /// The old ID is destroyed in the store. The replacement is installed even
    /// when that destroy fails.
    ///
    /// # Errors
    ///
    /// The store error from destroying the old ID.
    pub async fn regenerate(&self) -> Result<&Self, SessionError> {
        let old_id = self.shared.lock().session_id.clone();
        let shared = &self.shared;

        let (fresh, destroyed) = match old_id {
            Some(old_id) => shared.adapter.regenerate(&old_id, &shared.request).await,
            None => (shared.adapter.generate(&shared.request), Ok(())),
        };

        {
            let mut state = shared.lock();
            state.session_id = Some(fresh.id().to_owned());
            state.record = Some(fresh);
        }

        destroyed?;
        Ok(self)
    }

    /// Drops the session from this request without touching the store.
    ///
    /// With `UnsetBehavior::Destroy` the stored session is deleted when the
    /// response completes.
    pub fn unset(&self) {
        self.shared.lock().record = None;
    }

    /// The store behind this session.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.shared.adapter.store()
    }
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation").finish_non_exhaustive()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::cookie::CookieOptions;

    fn settings(save_uninitialized: bool, rolling: bool, unset: UnsetBehavior) -> Settings {
        Settings {
            cookie_name: "connect.sid".to_owned(),
            cookie: CookieOptions::default(),
            trust_proxy: None,
            resave: false,
            rolling,
            save_uninitialized,
            unset,
            secrets: None,
        }
    }

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(id.to_owned(), SessionCookie::default())
    }

    fn generated(id: &str) -> NegotiationState {
        let mut state = NegotiationState::default();
        state.install_generated(record(id));
        state
    }

    fn loaded(id: &str, resave: bool) -> NegotiationState {
        let mut rec = record(id);
        rec.insert("views", json!(1));
        let mut state = NegotiationState {
            cookie_id: Some(id.to_owned()),
            ..Default::default()
        };
        state.install_loaded(rec, resave);
        state
    }

    fn mutate(state: &mut NegotiationState) {
        state.record.as_mut().unwrap().insert("views", json!(2));
    }

    #[test]
    fn test_fresh_session_unmodified() {
        let state = generated("new");
        let rec = state.record.as_ref().unwrap();
        assert!(!state.is_modified(rec));
        assert!(!state.is_saved(rec));
    }

    #[test]
    fn test_fresh_uninitialized_not_saved_or_cookied() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let state = generated("new");
        assert!(!state.should_save(&s));
        assert!(!state.should_set_cookie(&s));
        assert!(!state.should_touch(&s));
    }

    #[test]
    fn test_fresh_session_cookied_when_save_uninitialized() {
        let s = settings(true, false, UnsetBehavior::Keep);
        let state = generated("new");
        assert!(state.should_set_cookie(&s));
        assert!(state.should_save(&s));
    }

    #[test]
    fn test_fresh_session_saved_once_modified() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let mut state = generated("new");
        mutate(&mut state);
        assert!(state.should_save(&s));
        assert!(state.should_set_cookie(&s));
    }

    #[test]
    fn test_explicit_save_suppresses_resave() {
        for save_uninitialized in [true, false] {
            let s = settings(save_uninitialized, false, UnsetBehavior::Keep);
            let mut state = generated("new");
            let hash = digest(state.record.as_ref().unwrap());
            state.saved_hash = Some(hash);
            assert!(!state.should_save(&s));
        }
    }

    #[test]
    fn test_loaded_unmodified_is_touched_not_saved() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let state = loaded("A1", false);
        assert!(!state.should_save(&s));
        assert!(state.should_touch(&s));
        assert!(!state.should_set_cookie(&s));
    }

    #[test]
    fn test_loaded_with_resave_is_saved() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let state = loaded("A1", true);
        assert!(state.should_save(&s));
        assert!(!state.should_touch(&s));
    }

    #[test]
    fn test_loaded_modified_is_saved() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let mut state = loaded("A1", false);
        mutate(&mut state);
        assert!(state.should_save(&s));
        assert!(!state.should_touch(&s));
    }

    #[test]
    fn test_rolling_sets_cookie_on_known_session() {
        let s = settings(false, true, UnsetBehavior::Keep);
        let state = loaded("A1", false);
        assert!(state.should_set_cookie(&s));
    }

    #[test]
    fn test_modified_persistent_cookie_is_reissued() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let mut state = loaded("A1", false);
        state.record.as_mut().unwrap().cookie_mut().set_max_age(Some(chrono::Duration::hours(1)));
        assert!(!state.should_set_cookie(&s));

        mutate(&mut state);
        assert!(state.should_set_cookie(&s));
    }

    #[test]
    fn test_modified_browser_session_cookie_not_reissued() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let mut state = loaded("A1", false);
        mutate(&mut state);
        assert!(!state.should_set_cookie(&s));
    }

    #[test]
    fn test_should_destroy_requires_unset_destroy() {
        let destroy = settings(false, false, UnsetBehavior::Destroy);
        let keep = settings(false, false, UnsetBehavior::Keep);

        let mut state = loaded("A1", false);
        assert!(!state.should_destroy(&destroy));

        state.record = None;
        assert!(state.should_destroy(&destroy));
        assert!(!state.should_destroy(&keep));

        let empty = NegotiationState::default();
        assert!(!empty.should_destroy(&destroy));
    }

    #[test]
    fn test_bogus_id_never_saved_or_cookied() {
        let s = settings(true, true, UnsetBehavior::Keep);
        let mut state = generated("");
        mutate(&mut state);
        assert!(!state.should_save(&s));
        assert!(!state.should_touch(&s));
        assert!(!state.should_set_cookie(&s));
    }

    #[test]
    fn test_regenerated_id_counts_as_modified() {
        let s = settings(false, false, UnsetBehavior::Keep);
        let mut state = loaded("A1", false);
        state.record = Some(record("B2"));
        state.session_id = Some("B2".to_owned());

        let rec = state.record.as_ref().unwrap();
        assert!(state.is_modified(rec));
        assert!(state.should_save(&s));
        assert!(state.should_set_cookie(&s));
    }

    #[test]
    fn test_ensure_touched_runs_once() {
        let mut state = generated("new");
        state.ensure_touched();
        assert!(state.touched);
        state.ensure_touched();
        assert!(state.touched);
    }
}
