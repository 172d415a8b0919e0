//! axum-negotiate-kerberos authenticates requests with the Kerberos/SPNEGO "HTTP Negotiate" scheme.
//!
//! # Features
//!
//! - [`NegotiationController`]: resolves the service principal, acquires the service subject and runs one
//!   GSS accept step per request, yielding an identity, a continuation challenge or a failure
//! - [`NegotiateLayer`] / [`NegotiateMiddleware`]: a [`tower::Layer`] and [`tower::Service`] putting the controller
//!   in front of an axum router
//! - A [`Authenticated`] request extension object carrying the authenticated client
//! - `gssapi` feature: [`GssapiMechanism`], a [`KerberosMechanism`] backed by the system GSS-API library
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{routing::get, Extension, Router};
//! use axum_negotiate_kerberos::{Authenticated, GssapiMechanism, KerberosConfig, NegotiateLayer, NegotiationController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = KerberosConfig {
//!         keytab_path: Some("/etc/http.keytab".into()),
//!         service_principal_realm: Some("EXAMPLE.COM".into()),
//!         ..Default::default()
//!     };
//!     let controller = NegotiationController::builder(config, Arc::new(GssapiMechanism::new()))
//!         .build()
//!         .expect("kerberos configuration");
//!     let router = Router::new()
//!         .route("/", get(hello))
//!         .layer(NegotiateLayer::new(Arc::new(controller)));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:80").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//!
//! async fn hello(Extension(a): Extension<Authenticated>) -> String {
//!     format!("Hello, {}!", a.client())
//! }
//! ```
//!
//! Each request is one pass through the controller. When the mechanism needs another round the layer answers
//! `401` with a `WWW-Authenticate: Negotiate <challenge>` header and the client repeats the request with its
//! answer; no server-side state is kept between requests.
use axum::{
    extract::Request,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, CONNECTION, HOST, WWW_AUTHENTICATE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

mod config;
mod controller;
mod engine;
mod error;
#[cfg(feature = "gssapi")]
mod gssapi;
mod identity;
mod kerberos;
mod log;
mod mechanism;
mod principal;
mod subject;

pub use config::KerberosConfig;
pub use controller::{NegotiationController, NegotiationControllerBuilder, NegotiationOutcome};
pub use engine::{AcceptOutcome, ContextState, MechanismContext, NegotiatedContext, NegotiationEngine, StepOutcome};
pub use error::{AuthenticationError, ConfigurationError, LoginFailure, NegotiationFailure};
#[cfg(feature = "gssapi")]
pub use gssapi::{GssSubject, GssapiMechanism};
pub use identity::{AuthenticatedIdentity, KerberosPrincipal};
pub use mechanism::{AcceptorContext, EstablishedContext, KerberosMechanism, LoginConfiguration, LoginRequest, MechanismOid};
pub use principal::{PrincipalResolver, ServicePrincipalName};
pub use subject::{
    DEFAULT_LOGIN_CONTEXT_NAME, KerberosCallbackHandler, ServicePrincipalSubjectFactory, ServiceSubject,
    SubjectProvider, resolve_keytab,
};

/// [`Extension`](axum::Extension) type that gets set after successful Authentication
#[derive(Debug, Clone)]
pub struct Authenticated(AuthenticatedIdentity);
impl Authenticated {
    /// Client name without its realm.
    pub fn client(&self) -> &str {
        self.0.simple_name()
    }
    /// Full identity, including the realm and the negotiated context.
    pub fn identity(&self) -> &AuthenticatedIdentity {
        &self.0
    }
}

/// [`Layer`] which will enforce authentication
///
/// The service principals the controller resolves must be correctly installed in the realm
#[derive(Clone)]
pub struct NegotiateLayer {
    controller: Arc<NegotiationController>,
}
impl NegotiateLayer {
    pub fn new(controller: Arc<NegotiationController>) -> Self {
        Self { controller }
    }
}
impl<S> Layer<S> for NegotiateLayer {
    type Service = NegotiateMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NegotiateMiddleware::new(inner, self.controller.clone())
    }
}
#[derive(Clone)]
/// Middleware to enforce authentication
///
/// A layer may be made from this via [`NegotiateLayer::new`]
pub struct NegotiateMiddleware<S> {
    inner: S,
    controller: Arc<NegotiationController>,
}
impl<S> NegotiateMiddleware<S> {
    pub fn new(service: S, controller: Arc<NegotiationController>) -> NegotiateMiddleware<S> {
        NegotiateMiddleware {
            inner: service,
            controller,
        }
    }
}
impl<S> Service<Request> for NegotiateMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }
    fn call(&mut self, req: Request) -> Self::Future {
        let (mut parts, body) = req.into_parts();
        let token = match extract_token(&parts.headers) {
            Ok(token) => token.to_owned(),
            Err(response) => return Box::pin(async { Ok(response) }),
        };
        let host = request_host(&parts);
        let controller = self.controller.clone();
        let not_ready_inner = self.inner.clone();
        let mut ready_inner = std::mem::replace(&mut self.inner, not_ready_inner);
        Box::pin(async move {
            let outcome = controller.authenticate_blocking(host, token).await;
            match kerberos::handle(outcome) {
                StepResult::Finished(authenticated, mutual) => {
                    parts.extensions.insert(authenticated);
                    let mut response = ready_inner.call(Request::from_parts(parts, body)).await?;
                    if let Some(header) = mutual {
                        response.headers_mut().insert(WWW_AUTHENTICATE, header);
                    }
                    Ok(response)
                }
                StepResult::ContinueWith(response) | StepResult::Error(response) => Ok(response),
            }
        })
    }
}

enum StepResult {
    Finished(Authenticated, Option<HeaderValue>),
    ContinueWith(Response),
    Error(Response),
}

fn extract_token(headers: &HeaderMap) -> Result<&str, Response> {
    let Some(authorization) = headers.get(AUTHORIZATION) else {
        return Err(unauthorized("No Authorization given"));
    };
    let Some(token) = authorization.to_str().ok().and_then(|with_prefix| {
        with_prefix
            .strip_prefix("Negotiate ")
            .or_else(|| with_prefix.strip_prefix("Kerberos "))
    }) else {
        return Err(unauthorized("Invalid Authorization Header"));
    };
    Ok(token.trim())
}

fn request_host(parts: &Parts) -> String {
    parts
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
        .to_owned()
}

fn to_negotiate_header(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Negotiate {token}")).expect("Base64-string should be valid header material")
}

fn www_authenticate_map() -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Negotiate"));
    map.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    map
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, www_authenticate_map(), message.to_owned()).into_response()
}
