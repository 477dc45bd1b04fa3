use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use super::cookie::CookieOptions;
use super::request::RequestContext;
use crate::crypto::generate_session_id;
use crate::{SecretList, SecretString, SessionError};

/// Custom session ID generator.
pub type GenerateId = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// What happens to the stored session when a handler unsets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsetBehavior {
    /// Keep the stored session; only this request loses it.
    #[default]
    Keep,
    /// Delete the stored session when the response completes.
    Destroy,
}

impl FromStr for UnsetBehavior {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "destroy" => Ok(Self::Destroy),
            _ => Err(SessionError::Configuration(
                "unset option must be \"destroy\" or \"keep\"".to_owned(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie: CookieOptions,
    /// Defaults to [`generate_session_id`].
    pub genid: Option<GenerateId>,
    /// Trust `X-Forwarded-Proto` when deciding whether the request is secure.
    /// `None` defers to the framework.
    pub trust_proxy: Option<bool>,
    /// Save sessions back to the store even when unmodified.
    pub resave: Option<bool>,
    /// Refresh the cookie on every response.
    pub rolling: bool,
    /// Save new sessions that were never modified.
    pub save_uninitialized: Option<bool>,
    /// Signing secrets, newest first. `None` relies on an upstream secret.
    pub secret: Option<Vec<SecretString>>,
    pub unset: UnsetBehavior,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "connect.sid".to_owned(),
            cookie: CookieOptions::default(),
            genid: None,
            trust_proxy: None,
            resave: None,
            rolling: false,
            save_uninitialized: None,
            secret: None,
            unset: UnsetBehavior::Keep,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("cookie", &self.cookie)
            .field("genid", &self.genid.as_ref().map(|_| "<custom>"))
            .field("trust_proxy", &self.trust_proxy)
            .field("resave", &self.resave)
            .field("rolling", &self.rolling)
            .field("save_uninitialized", &self.save_uninitialized)
            .field("secret", &self.secret)
            .field("unset", &self.unset)
            .finish()
    }
}

impl SessionConfig {
    /// Configuration signing with a single secret and explicit `resave` and
    /// `save_uninitialized` set to false.
    pub fn new(secret: impl Into<SecretString>) -> Self {
        Self {
            secret: Some(vec![secret.into()]),
            resave: Some(false),
            save_uninitialized: Some(false),
            ..Default::default()
        }
    }

    /// Checks the configuration without building anything.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` for an empty cookie name, an empty
    /// secret list or an empty secret.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.cookie_name.is_empty() {
            return Err(SessionError::Configuration(
                "cookie_name must not be empty".to_owned(),
            ));
        }
        if let Some(secrets) = &self.secret {
            SecretList::new(secrets.clone())?;
        }
        Ok(())
    }

    /// Validates and resolves defaults, warning about every implicit one.
    pub(crate) fn resolve(self) -> Result<(Settings, GenerateId), SessionError> {
        self.validate()?;

        let resave = self.resave.unwrap_or_else(|| {
            log::warn!(target: "enclave_session", "msg=\"deprecated: undefined resave option; provide resave option\"");
            true
        });

        let save_uninitialized = self.save_uninitialized.unwrap_or_else(|| {
            log::warn!(
                target: "enclave_session",
                "msg=\"deprecated: undefined saveUninitialized option; provide saveUninitialized option\""
            );
            true
        });

        let secrets = match self.secret {
            Some(secrets) => {
                let secrets = SecretList::new(secrets)?;
                if secrets.iter().any(|secret| secret.len() < 32) {
                    log::warn!(target: "enclave_session", "msg=\"session secret shorter than 32 bytes\"");
                }
                Some(secrets)
            }
            None => {
                log::warn!(target: "enclave_session", "msg=\"deprecated: req.secret; provide secret option\"");
                None
            }
        };

        let genid: GenerateId = match self.genid {
            Some(genid) => genid,
            None => Arc::new(|_: &RequestContext| generate_session_id()),
        };

        let settings = Settings {
            cookie_name: self.cookie_name,
            cookie: self.cookie,
            trust_proxy: self.trust_proxy,
            resave,
            rolling: self.rolling,
            save_uninitialized,
            unset: self.unset,
            secrets,
        };

        Ok((settings, genid))
    }
}

/// Configuration with every default resolved.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) cookie_name: String,
    pub(crate) cookie: CookieOptions,
    pub(crate) trust_proxy: Option<bool>,
    pub(crate) resave: bool,
    pub(crate) rolling: bool,
    pub(crate) save_uninitialized: bool,
    pub(crate) unset: UnsetBehavior,
    pub(crate) secrets: Option<SecretList>,
}
