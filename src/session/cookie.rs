//! Session cookie attributes.
//!
//! [`SessionCookie`] is the per-session copy of the cookie attributes. It is
//! persisted alongside the session data so a reloaded session keeps its own
//! expiry, and it is what gets serialized into the `Set-Cookie` header.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    None,
    Lax,
    Strict,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::None => Self::None,
            SameSite::Lax => Self::Lax,
            SameSite::Strict => Self::Strict,
        }
    }
}

/// `Secure` cookie attribute.
///
/// `Auto` is resolved on every request from the connection (and, when
/// trusted, proxy headers). It is stored as `"auto"` and never replaced by the
/// resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SecureRepr", into = "SecureRepr")]
pub enum CookieSecure {
    Flag(bool),
    Auto,
}

impl CookieSecure {
    /// Resolves the attribute for a request whose security is `request_secure`.
    #[must_use]
    pub fn resolve(self, request_secure: bool) -> bool {
        match self {
            Self::Flag(flag) => flag,
            Self::Auto => request_secure,
        }
    }
}

impl Default for CookieSecure {
    fn default() -> Self {
        Self::Flag(false)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SecureRepr {
    Flag(bool),
    Keyword(String),
}

impl TryFrom<SecureRepr> for CookieSecure {
    type Error = String;

    fn try_from(value: SecureRepr) -> Result<Self, Self::Error> {
        match value {
            SecureRepr::Flag(flag) => Ok(Self::Flag(flag)),
            SecureRepr::Keyword(word) if word == "auto" => Ok(Self::Auto),
            SecureRepr::Keyword(word) => Err(format!("invalid cookie secure value \"{word}\"")),
        }
    }
}

impl From<CookieSecure> for SecureRepr {
    fn from(value: CookieSecure) -> Self {
        match value {
            CookieSecure::Flag(flag) => Self::Flag(flag),
            CookieSecure::Auto => Self::Keyword("auto".to_owned()),
        }
    }
}

/// Cookie attributes applied to newly generated sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieOptions {
    /// Cookie path. Requests outside this path are not given a session.
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    pub cookie_http_only: bool,
    pub cookie_secure: CookieSecure,
    pub cookie_same_site: Option<SameSite>,
    /// Lifetime of the cookie. `None` makes it a browser-session cookie.
    pub max_age: Option<Duration>,
    /// Absolute expiry, used only when `max_age` is not set.
    pub expires: Option<DateTime<Utc>>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            cookie_path: "/".to_owned(),
            cookie_domain: None,
            cookie_http_only: true,
            cookie_secure: CookieSecure::default(),
            cookie_same_site: None,
            max_age: None,
            expires: None,
        }
    }
}

/// Cookie attributes of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    /// Baseline lifetime in milliseconds, restored by [`reset_max_age`](Self::reset_max_age).
    #[serde(default)]
    pub original_max_age: Option<i64>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: CookieSecure,
    #[serde(default = "default_http_only")]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

fn default_http_only() -> bool {
    true
}

fn default_path() -> String {
    "/".to_owned()
}

impl SessionCookie {
    /// Creates the cookie of a fresh session from the configured options.
    #[must_use]
    pub fn new(options: &CookieOptions) -> Self {
        let mut cookie = Self {
            original_max_age: None,
            expires: options.expires,
            secure: options.cookie_secure,
            http_only: options.cookie_http_only,
            domain: options.cookie_domain.clone(),
            path: options.cookie_path.clone(),
            same_site: options.cookie_same_site,
        };

        if let Some(max_age) = options.max_age {
            cookie.set_max_age(Some(max_age));
        }
        cookie.original_max_age = cookie.max_age().map(|d| d.num_milliseconds());

        cookie
    }

    /// Time left until the cookie expires, or `None` for a browser-session cookie.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.expires.map(|expires| expires - Utc::now())
    }

    /// Moves `expires` to `now + max_age`, or clears it.
    pub fn set_max_age(&mut self, max_age: Option<Duration>) {
        self.expires = max_age.map(|d| Utc::now() + d);
    }

    /// Restores the lifetime to `original_max_age`.
    pub fn reset_max_age(&mut self) -> &mut Self {
        let original = self.original_max_age.map(Duration::milliseconds);
        self.set_max_age(original);
        self
    }

    /// Refreshes the expiry window. Alias of [`reset_max_age`](Self::reset_max_age).
    pub fn touch(&mut self) -> &mut Self {
        self.reset_max_age()
    }

    /// Whether the cookie carries an explicit expiry.
    #[must_use]
    pub fn has_expiry(&self) -> bool {
        self.expires.is_some()
    }

    /// Whether the cookie has already expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= Utc::now())
    }
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self::new(&CookieOptions::default())
    }
}
