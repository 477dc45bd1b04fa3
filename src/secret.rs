//! Cookie signing secrets.
//!
//! Secrets are redacted in `Debug` and `Display` output so configuration
//! structs can be logged freely.

use std::fmt;

use crate::SessionError;

/// A single signing secret.
///
/// ```rust
/// use enclave_session::SecretString;
///
/// let secret = SecretString::new("keyboard cat");
/// assert_eq!(format!("{secret:?}"), "SecretString([REDACTED])");
/// assert_eq!(secret.expose_secret(), "keyboard cat");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the raw secret. Only the HMAC code should need this.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Ordered, non-empty list of signing secrets.
///
/// New cookies are always signed with the first (primary) secret. Incoming
/// cookies are verified against every secret in order, which lets a deployment
/// rotate secrets by prepending the new one and keeping the old ones around
/// until existing cookies expire.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretList {
    primary: SecretString,
    rest: Vec<SecretString>,
}

impl SecretList {
    /// Builds a list from secrets ordered newest first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if the list is empty or contains
    /// an empty secret.
    pub fn new(secrets: Vec<SecretString>) -> Result<Self, SessionError> {
        if secrets.iter().any(SecretString::is_empty) {
            return Err(SessionError::Configuration(
                "secret option must not contain empty strings".to_owned(),
            ));
        }

        let mut iter = secrets.into_iter();
        let primary = iter.next().ok_or_else(|| {
            SessionError::Configuration(
                "secret option array must contain one or more strings".to_owned(),
            )
        })?;

        Ok(Self {
            primary,
            rest: iter.collect(),
        })
    }

    /// The secret used for signing.
    #[must_use]
    pub fn primary(&self) -> &SecretString {
        &self.primary
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecretString> {
        std::iter::once(&self.primary).chain(self.rest.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl From<SecretString> for SecretList {
    fn from(primary: SecretString) -> Self {
        Self {
            primary,
            rest: Vec::new(),
        }
    }
}

impl fmt::Debug for SecretList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretList([REDACTED; {}])", self.len())
    }
}
