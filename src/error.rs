use thiserror::Error;

/// Errors reported by a [`SessionStore`](crate::session::SessionStore) back-end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested session does not exist. Lookups treat this as a miss.
    #[error("session not found in store")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store serialization error: {0}")]
    Serialization(String),
    /// The store does not implement an optional capability.
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
}

/// Errors produced while negotiating or manipulating a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Invalid setup. Raised when the negotiator is built, never retried.
    #[error("invalid session configuration: {0}")]
    Configuration(String),
    /// No signing secret configured and none supplied upstream for this request.
    #[error("secret option required for sessions")]
    MissingSecret,
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Returned by reload when the store no longer holds the session.
    #[error("failed to load session")]
    SessionNotFound,
    /// The request has no active session (never created, destroyed or unset).
    #[error("no active session on this request")]
    NoActiveSession,
    #[error("session data serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    /// Stable machine-readable code used in error responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "SESSION_CONFIGURATION",
            Self::MissingSecret => "SESSION_SECRET_MISSING",
            Self::Store(_) => "SESSION_STORE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::NoActiveSession => "SESSION_INACTIVE",
            Self::Serialization(_) => "SESSION_SERIALIZATION",
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
