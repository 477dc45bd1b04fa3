use crate::SecretString;

/// Framework-neutral view of the parts of a request the negotiation reads.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Path of the original request URL, without the query.
    pub path: String,
    /// Raw `Cookie` header, multiple headers joined with `; `.
    pub cookie_header: Option<String>,
    /// The connection itself is TLS.
    pub encrypted: bool,
    /// The framework's own verdict on whether the request is secure, if it has one.
    pub framework_secure: Option<bool>,
    /// Raw `X-Forwarded-Proto` header.
    pub forwarded_proto: Option<String>,
    /// Signing secret attached by an upstream layer, used when none is configured.
    pub upstream_secret: Option<SecretString>,
}

impl RequestContext {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_cookie_header(mut self, header: impl Into<String>) -> Self {
        self.cookie_header = Some(header.into());
        self
    }

    #[must_use]
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    #[must_use]
    pub fn with_forwarded_proto(mut self, proto: impl Into<String>) -> Self {
        self.forwarded_proto = Some(proto.into());
        self
    }

    #[must_use]
    pub fn with_upstream_secret(mut self, secret: SecretString) -> Self {
        self.upstream_secret = Some(secret);
        self
    }

    /// Whether the request reached the application over a secure channel.
    ///
    /// - a direct TLS connection is always secure
    /// - `trust_proxy = Some(false)` ignores every header
    /// - `trust_proxy = None` defers to the framework's flag
    /// - `trust_proxy = Some(true)` reads the first `X-Forwarded-Proto` value
    #[must_use]
    pub fn is_secure(&self, trust_proxy: Option<bool>) -> bool {
        if self.encrypted {
            return true;
        }

        match trust_proxy {
            Some(false) => false,
            None => self.framework_secure.unwrap_or(false),
            Some(true) => self
                .forwarded_proto
                .as_deref()
                .and_then(|header| header.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https")),
        }
    }
}
