//! CORS negotiation.
//!
//! [`Cors`] decides, per request, whether the `Origin` is allowed and which
//! `Access-Control-*` headers to send:
//!
//! | Origin | Response |
//! |---|---|
//! | absent | untouched; `OPTIONS` still answered `204` |
//! | allowed (listed, or `*` configured) | ACA* headers; `OPTIONS` answered `204`, others passed on |
//! | not allowed | `403 access from origin forbidden`, handler never called |
//!
//! Headers go on every response, not only on preflights: Safari and older
//! Edge/IE expect them on the actual response too.
//!
//! `Access-Control-Allow-Origin` always echoes the request's origin, never a
//! literal `*`, so credentialed requests keep working behind a wildcard.

use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::method::{self, Method};
use crate::middleware::{Middleware, request_id};
use crate::request::Request;
use crate::response::Response;
use crate::router::{RouteMatcher, methods_for_path};

/// Max age used when the configured one is not positive, in seconds.
pub const DEFAULT_MAX_AGE: i64 = 86400;

pub const HEADER_ORIGIN: &str = "origin";
pub const HEADER_REQUEST_METHOD: &str = "access-control-request-method";
pub const HEADER_ALLOW_ORIGIN: &str = "access-control-allow-origin";
pub const HEADER_ALLOW_METHODS: &str = "access-control-allow-methods";
pub const HEADER_ALLOW_HEADERS: &str = "access-control-allow-headers";
pub const HEADER_MAX_AGE: &str = "access-control-max-age";

const FORBIDDEN_BODY: &str = "access from origin forbidden";
const WILDCARD: &str = "*";

// ── Configuration ─────────────────────────────────────────────────────────────

/// CORS settings, usually loaded once at startup.
///
/// ```rust
/// use chainkit::middleware::cors::CorsConfig;
///
/// let from_code = CorsConfig::default()
///     .allow_origins(["https://app.example.com"])
///     .allow_headers(["content-type", "authorization"])
///     .max_age(600);
///
/// let from_json: CorsConfig = serde_json::from_str(
///     r#"{"allowed_origins":["https://app.example.com"],"allowed_headers":["content-type","authorization"],"max_age":600}"#,
/// ).unwrap();
///
/// assert_eq!(from_code, from_json);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the service. `"*"` allows all of them.
    pub allowed_origins: Vec<String>,
    /// Sent as `Access-Control-Allow-Headers`, in this order.
    pub allowed_headers: Vec<String>,
    /// Seconds browsers may cache a preflight. `<= 0` means [`DEFAULT_MAX_AGE`].
    pub max_age: i64,
}

impl CorsConfig {
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    fn effective_max_age(&self) -> i64 {
        if self.max_age > 0 { self.max_age } else { DEFAULT_MAX_AGE }
    }

    fn allows(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin || o == WILDCARD)
    }
}

// ── Decision ──────────────────────────────────────────────────────────────────

/// How the request's `Origin` compares to the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginCheck {
    /// No `Origin` header: not a cross-origin request.
    Absent,
    Allowed,
    Forbidden,
}

/// The `Access-Control-*` values for an allowed origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorsHeaders {
    pub allow_origin: String,
    pub allow_methods: Vec<Method>,
    pub allow_headers: String,
    pub max_age: i64,
}

impl CorsHeaders {
    fn apply(&self, res: &mut Response) {
        res.set_header(HEADER_ALLOW_ORIGIN, &self.allow_origin);
        res.set_header(HEADER_ALLOW_METHODS, &method::join(&self.allow_methods));
        res.set_header(HEADER_ALLOW_HEADERS, &self.allow_headers);
        res.set_header(HEADER_MAX_AGE, &self.max_age.to_string());
    }
}

/// What [`Cors`] does with one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub origin: OriginCheck,
    /// Present only when the origin is allowed.
    pub headers: Option<CorsHeaders>,
    /// `true` if the request is answered here and the next handler never runs.
    pub short_circuit: bool,
}

// ── Negotiator ────────────────────────────────────────────────────────────────

/// The CORS middleware.
///
/// `matcher` must see the routes of the chain this middleware guards; it is
/// probed to fill in `Access-Control-Allow-Methods`.
#[derive(Clone)]
pub struct Cors {
    config: Arc<CorsConfig>,
    matcher: Arc<dyn RouteMatcher>,
}

impl Cors {
    pub fn new(config: CorsConfig, matcher: impl RouteMatcher + 'static) -> Self {
        Self { config: Arc::new(config), matcher: Arc::new(matcher) }
    }

    pub fn decide(&self, req: &Request) -> Decision {
        let origin = req.header(HEADER_ORIGIN).unwrap_or_default();
        let preflight = req.method() == Method::Options;

        if origin.is_empty() {
            return Decision { origin: OriginCheck::Absent, headers: None, short_circuit: preflight };
        }
        if !self.config.allows(origin) {
            return Decision { origin: OriginCheck::Forbidden, headers: None, short_circuit: true };
        }

        let headers = CorsHeaders {
            allow_origin: origin.to_owned(),
            allow_methods: self.allowed_methods(req),
            allow_headers: self.config.allowed_headers.join(","),
            max_age: self.config.effective_max_age(),
        };
        Decision { origin: OriginCheck::Allowed, headers: Some(headers), short_circuit: preflight }
    }

    /// Methods reported for the request's path.
    ///
    /// The method being asked about is `Access-Control-Request-Method` when
    /// present, the request's own method otherwise. If that method would not
    /// be routed, only `OPTIONS` is reported.
    fn allowed_methods(&self, req: &Request) -> Vec<Method> {
        let requested = match req.header(HEADER_REQUEST_METHOD) {
            Some(value) => value.parse::<Method>().ok(),
            None => Some(req.method()),
        };

        match requested {
            Some(Method::Options) => methods_for_path(&*self.matcher, req.path()),
            Some(m) if self.matcher.matches(m, req.path()) => {
                methods_for_path(&*self.matcher, req.path())
            }
            _ => vec![Method::Options],
        }
    }
}

impl Middleware for Cors {
    fn wrap(&self, next: Next) -> Next {
        Next::from_erased(CorsHandler { cors: self.clone(), next })
    }
}

struct CorsHandler {
    cors: Cors,
    next: Next,
}

impl ErasedHandler for CorsHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let decision = self.cors.decide(&req);
        let request_id = request_id::get(req.extensions());

        match decision.origin {
            OriginCheck::Forbidden => {
                info!(
                    request_id,
                    origin = req.header(HEADER_ORIGIN).unwrap_or_default(),
                    path = req.path(),
                    "cors: origin forbidden"
                );
                let res = Response::builder().status(StatusCode::FORBIDDEN).text(FORBIDDEN_BODY);
                return Box::pin(async move { res });
            }
            OriginCheck::Allowed => {
                debug!(request_id, path = req.path(), "cors: origin allowed");
            }
            OriginCheck::Absent => {}
        }

        if decision.short_circuit {
            let mut res = Response::status(StatusCode::NO_CONTENT);
            if let Some(headers) = &decision.headers {
                headers.apply(&mut res);
            }
            return Box::pin(async move { res });
        }

        let fut = self.next.run(req);
        Box::pin(async move {
            let mut res = fut.await;
            if let Some(headers) = &decision.headers {
                headers.apply(&mut res);
            }
            res
        })
    }
}
