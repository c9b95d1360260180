//! Request IDs.
//!
//! [`SetRequestId`] stamps every request with a fresh UUID v4. Downstream code
//! reads it with [`get`]; the client receives it in the `X-Request-ID`
//! response header. The whole inner chain runs inside a `request` span that
//! carries the ID, so every log line emitted while handling the request can be
//! correlated.
//!
//! Put it first in a chain. Anything it wraps (CORS included) then sees the
//! ID, and the header is set even when an inner middleware answers early.

use http::Extensions;
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::middleware::Middleware;
use crate::request::Request;

/// Response header carrying the generated ID.
pub const HEADER: &str = "x-request-id";

/// The request-scoped extension holding the ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

/// The request ID stored by [`SetRequestId`], or `""` if there is none.
pub fn get(extensions: &Extensions) -> &str {
    extensions.get::<RequestId>().map_or("", |id| id.0.as_str())
}

/// A span for logging inside a handler, tagged with the request ID.
pub fn span(req: &Request) -> Span {
    info_span!(
        "request",
        request_id = get(req.extensions()),
        method = %req.method(),
        path = req.path(),
    )
}

/// Middleware generating one request ID per request.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetRequestId;

impl SetRequestId {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for SetRequestId {
    fn wrap(&self, next: Next) -> Next {
        Next::from_erased(RequestIdHandler { next })
    }
}

struct RequestIdHandler {
    next: Next,
}

impl ErasedHandler for RequestIdHandler {
    fn call(&self, mut req: Request) -> BoxFuture {
        let id = Uuid::new_v4().to_string();
        req.extensions_mut().insert(RequestId(id.clone()));

        let span = span(&req);
        let fut = span.in_scope(|| self.next.run(req));

        Box::pin(
            async move {
                let mut res = fut.await;
                res.set_header(HEADER, &id);
                res
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::Response;

    fn request() -> Request {
        Request::try_from(http::Request::get("/").body(Bytes::new()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn ids_are_unique_and_echoed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handler = SetRequestId::new().wrap(Next::new(move |req: Request| {
            recorded.lock().unwrap().push(get(req.extensions()).to_owned());
            async { Response::text("ok") }
        }));

        let first = handler.run(request()).await;
        let second = handler.run(request()).await;

        let first_id = first.header(HEADER).unwrap().to_owned();
        let second_id = second.header(HEADER).unwrap().to_owned();
        assert!(!first_id.is_empty());
        assert_ne!(first_id, second_id);
        assert_eq!(*seen.lock().unwrap(), vec![first_id.clone(), second_id]);
        assert!(Uuid::parse_str(&first_id).is_ok());
    }

    #[test]
    fn missing_id_reads_as_empty() {
        assert_eq!(get(&Extensions::new()), "");

        let mut extensions = Extensions::new();
        extensions.insert(String::from("not a request id"));
        assert_eq!(get(&extensions), "");
    }
}
