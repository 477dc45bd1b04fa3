//! Server-side sessions for actix-web and axum.
//!
//! A session is identified by an HMAC-signed cookie (`s:<id>.<signature>`)
//! and its data lives in a pluggable [`SessionStore`]. Sessions are only
//! written back when their content changed, only sent to the client when
//! needed, and the store round-trip finishes before the response leaves.
//!
//! ```rust
//! use enclave_session::{SessionConfig, SessionNegotiator};
//!
//! let config = SessionConfig::new("a long and random signing secret value");
//! let negotiator = SessionNegotiator::with_memory_store(config).unwrap();
//! assert_eq!(negotiator.cookie_name(), "connect.sid");
//! ```

pub mod api;
pub mod crypto;
mod error;
mod secret;
pub mod session;

pub use error::{SessionError, StoreError};
pub use secret::{SecretList, SecretString};
pub use session::{
    CookieOptions, CookieSecure, GenerateId, InMemorySessionStore, Negotiation, RequestContext,
    SameSite, Session, SessionConfig, SessionCookie, SessionNegotiator, SessionPayload,
    SessionRecord, SessionStore, StoreAdapter, StoreReadiness, UnsetBehavior,
};

#[cfg(feature = "actix")]
pub use api::actix::SessionMiddleware;
#[cfg(feature = "axum_api")]
pub use api::axum::SessionLayer;
pub use api::{EncryptedConnection, ErrorResponse, SessionCommitError, UpstreamSecret};
