use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, OriginalUri, Request};
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::http::uri::Scheme;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::api::{EncryptedConnection, SessionCommitError, UpstreamSecret};
use crate::{RequestContext, Session, SessionConfig, SessionError, SessionNegotiator, SessionStore};

/// Session middleware for axum.
///
/// axum does not expose whether the connection is TLS. A server that
/// terminates TLS itself should insert [`EncryptedConnection`] into each
/// request; otherwise only an absolute `https` URI, or `X-Forwarded-Proto`
/// with `trust_proxy: Some(true)`, makes a request secure.
///
/// The session is not committed when the wrapped service returns an error,
/// since there is no response to carry the cookie. `Router` never does.
///
/// ```rust,ignore
/// use enclave_session::{InMemorySessionStore, SessionConfig, SessionLayer};
/// use std::sync::Arc;
///
/// let sessions = SessionLayer::with_store(
///     Arc::new(InMemorySessionStore::new()),
///     SessionConfig::new(secret),
/// )?;
///
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(sessions);
/// ```
#[derive(Clone)]
pub struct SessionLayer {
    negotiator: Arc<SessionNegotiator>,
}

impl SessionLayer {
    #[must_use]
    pub fn new(negotiator: SessionNegotiator) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
        }
    }

    /// Builds the negotiator from `config` and binds it to `store`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` for invalid configuration.
    pub fn with_store(store: Arc<dyn SessionStore>, config: SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::new(SessionNegotiator::new(store, config)?))
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            negotiator: Arc::clone(&self.negotiator),
        }
    }
}

#[derive(Clone)]
pub struct SessionService<S> {
    inner: S,
    negotiator: Arc<SessionNegotiator>,
}

impl<S> Service<Request> for SessionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // the clone is not ready, keep the instance poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let negotiator = Arc::clone(&self.negotiator);

        Box::pin(async move {
            if req.extensions().get::<Session>().is_some() {
                return inner.call(req).await;
            }

            let context = request_context(&req);
            let negotiation = match negotiator.begin(context).await {
                Ok(Some(negotiation)) => negotiation,
                Ok(None) => return inner.call(req).await,
                Err(e) => {
                    log::error!(target: "enclave_session", "msg=\"session negotiation failed\" error=\"{e}\"");
                    return Ok(e.into_response());
                }
            };

            req.extensions_mut().insert(negotiation.session());
            let mut response = inner.call(req).await?;

            if let Some(set_cookie) = negotiation.commit_headers() {
                match HeaderValue::from_str(&set_cookie) {
                    Ok(value) => {
                        response.headers_mut().append(header::SET_COOKIE, value);
                    }
                    Err(e) => {
                        log::error!(target: "enclave_session", "msg=\"invalid set-cookie header\" error=\"{e}\"");
                    }
                }
            }

            if let Err(e) = negotiation.complete().await {
                log::error!(target: "enclave_session", "msg=\"session commit failed\" error=\"{e}\"");
                response.extensions_mut().insert(SessionCommitError(e));
            }

            Ok(response)
        })
    }
}

fn request_context(req: &Request) -> RequestContext {
    let headers = req.headers();

    let cookies: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    // nested routers strip their prefix from the URI
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| req.uri().path(), |uri| uri.0.path())
        .to_owned();

    RequestContext {
        path,
        cookie_header: (!cookies.is_empty()).then(|| cookies.join("; ")),
        encrypted: req.extensions().get::<EncryptedConnection>().is_some(),
        framework_secure: req.uri().scheme().map(|scheme| *scheme == Scheme::HTTPS),
        forwarded_proto,
        upstream_secret: req
            .extensions()
            .get::<UpstreamSecret>()
            .map(|secret| secret.0.clone()),
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(SessionError::NoActiveSession)
    }
}
