//! Radix-tree routing, one chain at a time.
//!
//! A [`Router`] collects the routes and middleware of one chain while the
//! service is being set up. Building the service freezes every router into a
//! [`RouteTable`]: one matchit tree per HTTP method, O(path-length) lookup.
//!
//! The CORS negotiator and the 405 fallback only need to ask "would `method`
//! reach a handler at `path`?". That question is the [`RouteMatcher`] trait,
//! and [`methods_for_path`] turns it into the list of methods a path accepts.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Middleware, MiddlewareChain};

// ── Matching ──────────────────────────────────────────────────────────────────

/// Answers whether a request would be routed to a handler.
pub trait RouteMatcher: Send + Sync {
    fn matches(&self, method: Method, path: &str) -> bool;
}

impl<M: RouteMatcher + ?Sized> RouteMatcher for Arc<M> {
    fn matches(&self, method: Method, path: &str) -> bool {
        (**self).matches(method, path)
    }
}

/// Every method a request to `path` could use, in [`Method::ALLOWED`] order.
///
/// `OPTIONS` is never probed (it is the preflight method, not a content
/// method) and is always appended last, even when nothing else matches.
pub fn methods_for_path<M: RouteMatcher + ?Sized>(matcher: &M, path: &str) -> Vec<Method> {
    let mut methods: Vec<Method> = Method::ALLOWED
        .into_iter()
        .filter(|&m| matcher.matches(m, path))
        .collect();
    methods.push(Method::Options);
    methods
}

// ── RouteTable ────────────────────────────────────────────────────────────────

/// The frozen routes of one chain. Paths include the chain's prefix.
#[derive(Default)]
pub struct RouteTable {
    trees: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl RouteTable {
    fn insert(&mut self, method: Method, path: &str, handler: BoxedHandler) -> Result<(), Error> {
        self.trees
            .entry(method)
            .or_default()
            .insert(path, handler)
            .map_err(|source| Error::Route { method, path: path.to_owned(), source })
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.trees.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl RouteMatcher for RouteTable {
    fn matches(&self, method: Method, path: &str) -> bool {
        self.trees.get(&method).is_some_and(|tree| tree.at(path).is_ok())
    }
}

// ── RouteProbe ────────────────────────────────────────────────────────────────

/// A [`RouteMatcher`] for a router whose table does not exist yet.
///
/// Middleware is configured before the routes it guards are registered, so a
/// CORS negotiator cannot hold the table itself. It holds a probe instead,
/// which the service binds to the router's table when it is built. Until then
/// the probe matches nothing.
#[derive(Clone, Default)]
pub struct RouteProbe(Arc<OnceLock<Arc<RouteTable>>>);

impl RouteProbe {
    /// Binds the probe. The first table bound wins.
    pub(crate) fn bind(&self, table: Arc<RouteTable>) {
        let _ = self.0.set(table);
    }
}

impl RouteMatcher for RouteProbe {
    fn matches(&self, method: Method, path: &str) -> bool {
        self.0.get().is_some_and(|table| table.matches(method, path))
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

struct Route {
    method: Method,
    path: String,
    handler: BoxedHandler,
}

/// Routes and middleware of one chain, mounted under a path prefix.
///
/// Obtained from [`Service::router_for_chain`](crate::Service::router_for_chain).
/// The default chain's router has an empty prefix.
pub struct Router {
    prefix: String,
    routes: Vec<Route>,
    pub(crate) middleware: MiddlewareChain,
    probe: RouteProbe,
}

impl Router {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
            middleware: MiddlewareChain::new(),
            probe: RouteProbe::default(),
        }
    }

    /// The path prefix every route of this router lives under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registers `handler` for `method` at `path` (relative to the prefix).
    ///
    /// Path parameters use `{name}` syntax, catch-alls `{*name}`. Conflicting
    /// paths are reported when the service is built, not here.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedMethod`] if `method` is not in [`Method::ALLOWED`].
    /// Nothing is registered in that case.
    pub fn on(&mut self, method: Method, path: &str, handler: impl Handler) -> Result<&mut Self, Error> {
        self.add(method, path, handler.into_boxed_handler())
    }

    pub(crate) fn add(&mut self, method: Method, path: &str, handler: BoxedHandler) -> Result<&mut Self, Error> {
        if !method.is_allowed() {
            return Err(Error::UnsupportedMethod(method));
        }
        self.routes.push(Route { method, path: format!("{}{path}", self.prefix), handler });
        Ok(self)
    }

    /// Appends middleware. The first middleware added runs outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// A matcher over this router's routes, usable once the service is built.
    pub fn probe(&self) -> RouteProbe {
        self.probe.clone()
    }

    /// Registered routes as `(method, full path)`, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> {
        self.routes.iter().map(|r| (r.method, r.path.as_str()))
    }

    /// Builds the route table and binds this router's probe to it.
    pub(crate) fn freeze(&self) -> Result<Arc<RouteTable>, Error> {
        let mut table = RouteTable::default();
        for route in &self.routes {
            table.insert(route.method, &route.path, Arc::clone(&route.handler))?;
        }
        let table = Arc::new(table);
        self.probe.bind(Arc::clone(&table));
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};

    async fn ok(_req: Request) -> Response {
        Response::text("ok")
    }

    #[test]
    fn reports_registered_methods_plus_options() {
        let mut router = Router::new("");
        router.on(Method::Put, "/x", ok).unwrap();
        router.on(Method::Get, "/x", ok).unwrap();
        router.on(Method::Post, "/y", ok).unwrap();
        let table = router.freeze().unwrap();

        assert_eq!(
            methods_for_path(&*table, "/x"),
            vec![Method::Get, Method::Put, Method::Options]
        );
    }

    #[test]
    fn unmatched_path_still_answers_options() {
        let table = Router::new("").freeze().unwrap();
        assert_eq!(methods_for_path(&*table, "/nowhere"), vec![Method::Options]);
    }

    #[test]
    fn rejects_methods_outside_the_allowed_set() {
        let mut router = Router::new("");
        let err = router.on(Method::Options, "/x", ok).err();

        assert!(matches!(err, Some(Error::UnsupportedMethod(Method::Options))));
        assert_eq!(router.routes().count(), 0);
    }

    #[test]
    fn routes_carry_the_prefix() {
        let mut router = Router::new("/public");
        router.on(Method::Get, "/users/{id}", ok).unwrap();
        let table = router.freeze().unwrap();

        assert_eq!(router.routes().collect::<Vec<_>>(), vec![(Method::Get, "/public/users/{id}")]);
        assert!(table.matches(Method::Get, "/public/users/7"));
        assert!(!table.matches(Method::Get, "/users/7"));

        let (_, params) = table.lookup(Method::Get, "/public/users/7").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn conflicting_routes_fail_to_freeze() {
        let mut router = Router::new("");
        router.on(Method::Get, "/a", ok).unwrap();
        router.on(Method::Get, "/a", ok).unwrap();

        assert!(matches!(router.freeze(), Err(Error::Route { method: Method::Get, .. })));
    }

    #[test]
    fn probe_matches_nothing_until_frozen() {
        let mut router = Router::new("");
        router.on(Method::Get, "/", ok).unwrap();
        let probe = router.probe();

        assert!(!probe.matches(Method::Get, "/"));
        router.freeze().unwrap();
        assert!(probe.matches(Method::Get, "/"));
    }
}
