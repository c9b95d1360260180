//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware receives the rest of its chain as a
//! [`Next`] and returns a new `Next` wrapping it. Closures of type
//! `Fn(Next) -> Next` are middleware too.
//!
//! Built-in middleware:
//! - [`request_id`]: per-request UUID in the request extensions and the
//!   `X-Request-ID` response header
//! - [`cors`]: origin checks, `Access-Control-*` headers and preflight answers

use std::sync::Arc;

use crate::handler::Next;

pub mod cors;
pub mod request_id;

/// A request interceptor.
pub trait Middleware: Send + Sync + 'static {
    /// Wraps `next`, returning the handler that runs in its place.
    fn wrap(&self, next: Next) -> Next;
}

impl<F> Middleware for F
where
    F: Fn(Next) -> Next + Send + Sync + 'static,
{
    fn wrap(&self, next: Next) -> Next {
        self(next)
    }
}

/// An ordered list of middleware.
///
/// Order is significant: the first middleware pushed is the outermost and
/// sees the request first and the response last.
#[derive(Clone, Default)]
pub struct MiddlewareChain(Vec<Arc<dyn Middleware>>);

impl MiddlewareChain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, middleware: impl Middleware) {
        self.0.push(Arc::new(middleware));
    }

    /// Appends every middleware of `other`, keeping its order.
    pub fn extend(&mut self, other: &MiddlewareChain) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Calls `f` for each middleware in order, stopping at the first error.
    pub fn walk<E>(&self, mut f: impl FnMut(&dyn Middleware) -> Result<(), E>) -> Result<(), E> {
        for middleware in &self.0 {
            f(middleware.as_ref())?;
        }
        Ok(())
    }

    /// Wraps `endpoint` in the whole chain.
    pub fn then(&self, endpoint: Next) -> Next {
        // build from the inside out so the first middleware ends up outermost
        self.0.iter().rev().fold(endpoint, |next, middleware| middleware.wrap(next))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::{Request, Response};

    fn tagging(tag: &'static str, log: Arc<Mutex<Vec<String>>>) -> impl Middleware {
        move |next: Next| {
            let log = Arc::clone(&log);
            Next::new(move |req: Request| {
                let next = next.clone();
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{tag} in"));
                    let res = next.run(req).await;
                    log.lock().unwrap().push(format!("{tag} out"));
                    res
                }
            })
        }
    }

    fn request() -> Request {
        Request::try_from(http::Request::get("/").body(Bytes::new()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_pushed_runs_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(tagging("a", Arc::clone(&log)));
        chain.push(tagging("b", Arc::clone(&log)));

        let inner_log = Arc::clone(&log);
        let endpoint = Next::new(move |_req: Request| {
            let log = Arc::clone(&inner_log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                Response::text("ok")
            }
        });

        let res = chain.then(endpoint).run(request()).await;
        assert_eq!(res.body(), b"ok");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a in", "b in", "handler", "b out", "a out"]
        );
    }

    #[tokio::test]
    async fn empty_chain_is_the_endpoint() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());

        let res = chain.then(Next::new(|_req: Request| async { "bare" })).run(request()).await;
        assert_eq!(res.body(), b"bare");
    }

    #[test]
    fn walk_stops_at_first_error() {
        let mut chain = MiddlewareChain::new();
        chain.push(|next: Next| next);
        chain.push(|next: Next| next);
        chain.push(|next: Next| next);

        let mut visited = 0;
        let result = chain.walk(|_| {
            visited += 1;
            if visited == 2 { Err("stop") } else { Ok(()) }
        });

        assert_eq!(result, Err("stop"));
        assert_eq!(visited, 2);
    }

    #[test]
    fn extend_keeps_order_and_length() {
        let mut a = MiddlewareChain::new();
        a.push(|next: Next| next);
        let mut b = MiddlewareChain::new();
        b.push(|next: Next| next);
        b.push(|next: Next| next);

        a.extend(&b);
        assert_eq!(a.len(), 3);
    }
}
