use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::EitherBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderValue};
use actix_web::{FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use futures::future::{LocalBoxFuture, Ready, ok, ready};

use crate::api::{ErrorResponse, SessionCommitError, UpstreamSecret};
use crate::{RequestContext, Session, SessionConfig, SessionError, SessionNegotiator, SessionStore};

/// Session middleware for actix-web.
///
/// Loads the session before the handler runs and commits it once the
/// handler has produced a response. The response is held until the store
/// round-trip has finished. An error from the wrapped service is turned
/// into its response first, so the session is committed with it.
///
/// With `trust_proxy` unset only the transport decides whether a request is
/// secure; `X-Forwarded-Proto` is read only with `trust_proxy: Some(true)`.
///
/// # Example
///
/// ```rust,ignore
/// use enclave_session::{InMemorySessionStore, SessionConfig, SessionMiddleware};
/// use std::sync::Arc;
///
/// let sessions = SessionMiddleware::with_store(
///     Arc::new(InMemorySessionStore::new()),
///     SessionConfig::new(std::env::var("SESSION_SECRET")?),
/// )?;
///
/// App::new()
///     .wrap(sessions.clone())
///     .route("/", web::get().to(handler))
/// ```
#[derive(Clone)]
pub struct SessionMiddleware {
    negotiator: Arc<SessionNegotiator>,
}

impl SessionMiddleware {
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

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = SessionMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(SessionMiddlewareService {
            service: Rc::new(service),
            negotiator: Arc::clone(&self.negotiator),
        })
    }
}

/// The actual middleware service.
pub struct SessionMiddlewareService<S> {
    service: Rc<S>,
    negotiator: Arc<SessionNegotiator>,
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let negotiator = Arc::clone(&self.negotiator);

        Box::pin(async move {
            // an outer session middleware already owns this request
            if req.extensions().contains::<Session>() {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let context = request_context(&req);
            let negotiation = match negotiator.begin(context).await {
                Ok(Some(negotiation)) => negotiation,
                Ok(None) => {
                    let res = service.call(req).await?;
                    return Ok(res.map_into_left_body());
                }
                Err(e) => {
                    log::error!(target: "enclave_session", "msg=\"session negotiation failed\" error=\"{e}\"");
                    let (http_req, _payload) = req.into_parts();
                    return Ok(ServiceResponse::new(http_req, e.error_response()).map_into_right_body());
                }
            };

            let http_req = req.request().clone();
            req.extensions_mut().insert(negotiation.session());

            // an inner error still becomes a response, so the session commits with it
            let mut res = match service.call(req).await {
                Ok(res) => res.map_into_left_body(),
                Err(e) => ServiceResponse::new(http_req, e.error_response()).map_into_right_body(),
            };

            if let Some(set_cookie) = negotiation.commit_headers() {
                match HeaderValue::from_str(&set_cookie) {
                    Ok(value) => {
                        res.headers_mut().append(header::SET_COOKIE, value);
                    }
                    Err(e) => {
                        log::error!(target: "enclave_session", "msg=\"invalid set-cookie header\" error=\"{e}\"");
                    }
                }
            }

            if let Err(e) = negotiation.complete().await {
                log::error!(target: "enclave_session", "msg=\"session commit failed\" error=\"{e}\"");
                res.response_mut()
                    .extensions_mut()
                    .insert(SessionCommitError(e));
            }

            Ok(res)
        })
    }
}

/// Collects what the negotiation needs to know about the request.
fn request_context(req: &ServiceRequest) -> RequestContext {
    let cookies: Vec<&str> = req
        .headers()
        .get_all(header::COOKIE)
        .filter_map(|value| value.to_str().ok())
        .collect();

    let forwarded_proto = req
        .headers()
        .get("X-Forwarded-Proto")
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    let upstream_secret = req
        .extensions()
        .get::<UpstreamSecret>()
        .map(|secret| secret.0.clone());

    RequestContext {
        path: req.path().to_owned(),
        cookie_header: (!cookies.is_empty()).then(|| cookies.join("; ")),
        encrypted: req.app_config().secure(),
        // `connection_info` trusts forwarding headers, so only the transport counts
        framework_secure: None,
        forwarded_proto,
        upstream_secret,
    }
}

impl ResponseError for SessionError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().json(ErrorResponse::from(self))
    }
}

/// Extracts the current request's session.
///
/// Fails with `SessionError::NoActiveSession` when the route is not wrapped
/// in [`SessionMiddleware`] or the request proceeded without a session.
impl FromRequest for Session {
    type Error = SessionError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Session>()
                .cloned()
                .ok_or(SessionError::NoActiveSession),
        )
    }
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;
    use crate::SecretString;

    #[test]
    fn test_request_context_joins_cookie_headers() {
        let req = TestRequest::with_uri("/cart?page=2")
            .append_header((header::COOKIE, "a=1"))
            .append_header((header::COOKIE, "connect.sid=s%3Aabc.sig"))
            .insert_header(("X-Forwarded-Proto", "https"))
            .to_srv_request();

        let context = request_context(&req);
        assert_eq!(context.path, "/cart");
        assert_eq!(context.cookie_header.as_deref(), Some("a=1; connect.sid=s%3Aabc.sig"));
        assert_eq!(context.forwarded_proto.as_deref(), Some("https"));
        assert!(!context.encrypted);
        assert!(context.framework_secure.is_none());
        assert!(!context.is_secure(None));
        assert!(context.is_secure(Some(true)));
        assert!(context.upstream_secret.is_none());
    }

    #[test]
    fn test_request_context_reads_upstream_secret() {
        let req = TestRequest::default().to_srv_request();
        req.extensions_mut()
            .insert(UpstreamSecret(SecretString::new("from upstream")));

        let context = request_context(&req);
        assert!(context.cookie_header.is_none());
        assert_eq!(
            context.upstream_secret.map(|s| s.expose_secret().to_owned()),
            Some("from upstream".to_owned())
        );
    }

    #[test]
    fn test_session_error_response() {
        let response = SessionError::MissingSecret.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
