//! Test doubles shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use enclave_session::{
    InMemorySessionStore, SessionPayload, SessionRecord, SessionStore, StoreError, StoreReadiness,
};

pub const SECRET: &str = "a-test-signing-secret-of-32-bytes!!";

/// In-memory store that counts writes and can be told to misbehave.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: InMemorySessionStore,
    sets: Arc<AtomicUsize>,
    touches: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
    fail_lookups: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    readiness: Arc<Mutex<Option<StoreReadiness>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        if let Some(readiness) = self.readiness.lock().unwrap().as_ref() {
            readiness.disconnect();
        }
    }

    pub fn connect(&self) {
        if let Some(readiness) = self.readiness.lock().unwrap().as_ref() {
            readiness.connect();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub async fn payload(&self, session_id: &str) -> Option<SessionPayload> {
        self.inner.get(session_id).await.unwrap()
    }

    /// Writes directly, bypassing the counters.
    pub async fn seed(&self, record: &SessionRecord) {
        self.inner.set(record.id(), record).await.unwrap();
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionPayload>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("lookup refused".to_owned()));
        }
        self.inner.get(session_id).await
    }

    async fn set(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.inner.set(session_id, record).await
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.inner.destroy(session_id).await
    }

    async fn touch(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.inner.touch(session_id, record).await
    }

    fn supports_touch(&self) -> bool {
        true
    }

    fn register_readiness(&self, readiness: StoreReadiness) {
        *self.readiness.lock().unwrap() = Some(readiness);
    }
}

/// `name=value` part of a `Set-Cookie` header, ready to send back as `Cookie`.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().trim().to_owned()
}
