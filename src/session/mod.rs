//! Server-side sessions keyed by a signed cookie.
//!
//! The framework-neutral core lives here; `api::actix` and `api::axum` wire
//! it into a request pipeline.

mod adapter;
mod config;
mod cookie;
pub mod fingerprint;
mod memory_store;
mod negotiator;
mod record;
mod request;
pub mod signature;
mod store;

pub use adapter::StoreAdapter;
pub use config::{GenerateId, SessionConfig, UnsetBehavior};
pub use self::cookie::{CookieOptions, CookieSecure, SameSite, SessionCookie};
pub use memory_store::InMemorySessionStore;
pub use negotiator::{Negotiation, Session, SessionNegotiator};
pub use record::{RESERVED_KEYS, SessionPayload, SessionRecord, is_well_formed_id};
pub use request::RequestContext;
pub use store::{SessionStore, StoreReadiness};
