//! Chains, endpoint registration and the frozen dispatcher.
//!
//! A [`Service`] owns one router per *chain*. The default chain is the root
//! router with no prefix; every other chain is created on first use and
//! mounted under `"/" + name`. Each chain carries its own middleware list,
//! which wraps the whole chain: route lookup and the 404/405 fallbacks
//! included.
//!
//! ```text
//! request ─► App::call ─► longest matching chain prefix
//!                          └─► chain middleware (first added = outermost)
//!                               └─► route lookup ─► handler
//!                                                └► 405 / 404 fallback
//! ```
//!
//! Setup is single-threaded. [`Service::build`] freezes everything into an
//! [`App`], which is immutable and shared by every connection.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use http::StatusCode;
use tracing::{info, warn};

use crate::error::Error;
use crate::files::{self, FileServer};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, Next};
use crate::method::{self, Method};
use crate::middleware::cors::{Cors, CorsConfig};
use crate::middleware::request_id::SetRequestId;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::request::Request;
use crate::response::Response;
use crate::router::{RouteTable, Router, methods_for_path};
use crate::server::Server;

/// The root chain. Its router has no prefix.
pub const DEFAULT_CHAIN: &str = "default";
/// Chain for unauthenticated endpoints, mounted at `/public`.
pub const PUBLIC_CHAIN: &str = "public";
/// Chain for authenticated endpoints, mounted at `/restricted`.
pub const RESTRICTED_CHAIN: &str = "restricted";

const NOT_FOUND_BODY: &str = "endpoint not implemented";
const METHOD_NOT_ALLOWED_BODY: &str =
    "method not allowed, please check response headers for allowed methods";

/// A service under construction.
///
/// ```rust,no_run
/// use chainkit::{DEFAULT_CHAIN, Method, Request, Server, Service};
/// use chainkit::middleware::cors::CorsConfig;
///
/// # async fn run() -> Result<(), chainkit::Error> {
/// let cors = CorsConfig::default().allow_origins(["https://app.example.com"]);
/// let mut service = Service::new(Server::bind("0.0.0.0:3000")?)
///     .with_default_middleware(&cors);
/// service.register_endpoint(DEFAULT_CHAIN, "/ping", Method::Get, ping)?;
/// service.listen_and_serve().await
/// # }
/// async fn ping(_req: Request) -> &'static str { "pong" }
/// ```
pub struct Service {
    server: Server,
    root: Router,
    chains: BTreeMap<String, Router>,
}

impl Service {
    pub fn new(server: Server) -> Self {
        Self { server, root: Router::new(""), chains: BTreeMap::new() }
    }

    /// The router of `chain`, created under `"/" + chain` on first use.
    pub fn router_for_chain(&mut self, chain: &str) -> &mut Router {
        if chain == DEFAULT_CHAIN {
            return &mut self.root;
        }
        self.chains
            .entry(chain.to_owned())
            .or_insert_with(|| Router::new(format!("/{chain}")))
    }

    /// Appends `middleware` to `chain`. The first middleware added runs outermost.
    pub fn add_middleware(&mut self, chain: &str, middleware: impl Middleware) -> &mut Self {
        self.router_for_chain(chain).use_middleware(middleware);
        self
    }

    /// Binds `handler` to `method` at `path` on `chain`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedMethod`] if `method` is not in [`Method::ALLOWED`].
    pub fn register_endpoint(
        &mut self,
        chain: &str,
        path: &str,
        method: Method,
        handler: impl Handler,
    ) -> Result<&mut Self, Error> {
        self.router_for_chain(chain).on(method, path, handler)?;
        Ok(self)
    }

    /// Serves the files under `dir` at `path_prefix` on `chain`, for `method` only.
    ///
    /// `GET /static/css/site.css` with a prefix of `/static` reads
    /// `dir/css/site.css`; `GET /static/` and `GET /static` read
    /// `dir/index.html`. Escaped characters in the path are decoded first.
    pub fn register_file_server(
        &mut self,
        chain: &str,
        path_prefix: &str,
        method: Method,
        dir: impl Into<PathBuf>,
    ) -> Result<&mut Self, Error> {
        let mount = path_prefix.trim_end_matches('/');
        let handler: BoxedHandler = Arc::new(FileServer::new(dir.into()));
        let router = self.router_for_chain(chain);

        // a catch-all never matches an empty rest, so the mount point itself
        // gets its own routes
        router.add(method, &format!("{mount}/{{*{}}}", files::PARAM), Arc::clone(&handler))?;
        router.add(method, &format!("{mount}/"), Arc::clone(&handler))?;
        if !mount.is_empty() || !router.prefix().is_empty() {
            router.add(method, mount, handler)?;
        }
        Ok(self)
    }

    /// The recommended middleware for `chain`: request IDs, then CORS.
    ///
    /// The CORS negotiator probes the routes of `chain` itself, so the methods
    /// it advertises are the ones that chain actually serves.
    pub fn default_middleware(&mut self, chain: &str, config: &CorsConfig) -> MiddlewareChain {
        let probe = self.router_for_chain(chain).probe();
        let mut middleware = MiddlewareChain::new();
        middleware.push(SetRequestId::new());
        middleware.push(Cors::new(config.clone(), probe));
        middleware
    }

    /// Adds [`default_middleware`](Self::default_middleware) to the default chain.
    pub fn with_default_middleware(mut self, config: &CorsConfig) -> Self {
        self.install_default_middleware(DEFAULT_CHAIN, config);
        self
    }

    /// Adds [`default_middleware`](Self::default_middleware) to the public and
    /// restricted chains.
    pub fn with_default_middleware_for_public_and_restricted_chains(mut self, config: &CorsConfig) -> Self {
        self.install_default_middleware(PUBLIC_CHAIN, config);
        self.install_default_middleware(RESTRICTED_CHAIN, config);
        self
    }

    fn install_default_middleware(&mut self, chain: &str, config: &CorsConfig) {
        let defaults = self.default_middleware(chain, config);
        self.router_for_chain(chain).middleware.extend(&defaults);
    }

    /// Freezes every chain into an [`App`], logging each route.
    ///
    /// # Errors
    ///
    /// [`Error::Route`] if two routes of a chain conflict or a path is malformed.
    pub fn build(self) -> Result<App, Error> {
        App::new(&self.root, &self.chains)
    }

    /// Builds the service and serves it until shutdown.
    ///
    /// Nothing is bound if the routes fail to build.
    pub async fn listen_and_serve(self) -> Result<(), Error> {
        let app = App::new(&self.root, &self.chains)?;
        self.server.serve(app).await
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

struct FrozenChain {
    prefix: String,
    entry: Next,
}

impl FrozenChain {
    fn new(name: &str, router: &Router) -> Result<Self, Error> {
        for (method, path) in router.routes() {
            info!(chain = name, %method, path, "available route");
        }
        let table = router.freeze()?;
        let dispatch = Next::from_erased(ChainDispatch { table });
        Ok(Self {
            prefix: router.prefix().to_owned(),
            entry: router.middleware.then(dispatch),
        })
    }

    fn owns(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// A built service: every chain frozen behind its middleware.
pub struct App {
    root: FrozenChain,
    // longest prefix first
    chains: Vec<FrozenChain>,
}

impl App {
    fn new(root: &Router, chains: &BTreeMap<String, Router>) -> Result<Self, Error> {
        let root = FrozenChain::new(DEFAULT_CHAIN, root)?;
        let mut frozen = chains
            .iter()
            .map(|(name, router)| FrozenChain::new(name, router))
            .collect::<Result<Vec<_>, _>>()?;
        frozen.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { root, chains: frozen })
    }

    /// Handles one request in-process.
    pub fn call(&self, req: Request) -> BoxFuture {
        let chain = self
            .chains
            .iter()
            .find(|chain| chain.owns(req.path()))
            .unwrap_or(&self.root);
        chain.entry.run(req)
    }
}

// ── Dispatch & fallbacks ──────────────────────────────────────────────────────

struct ChainDispatch {
    table: Arc<RouteTable>,
}

impl ErasedHandler for ChainDispatch {
    fn call(&self, mut req: Request) -> BoxFuture {
        let method = req.method();
        if let Some((handler, params)) = self.table.lookup(method, req.path()) {
            req.params = params;
            return handler.call(req);
        }

        let allowed: Vec<Method> = methods_for_path(&*self.table, req.path())
            .into_iter()
            .filter(|&m| m != method)
            .collect();
        let res = if allowed.iter().any(|&m| m != Method::Options) {
            method_not_allowed(&req, &allowed)
        } else {
            not_found(&req)
        };
        Box::pin(async move { res })
    }
}

fn not_found(req: &Request) -> Response {
    warn!(method = %req.method(), path = req.path(), "endpoint not implemented");
    Response::builder().status(StatusCode::NOT_FOUND).text(NOT_FOUND_BODY)
}

fn method_not_allowed(req: &Request, allowed: &[Method]) -> Response {
    let allow = method::join(allowed);
    warn!(method = %req.method(), path = req.path(), allow = %allow, "method not allowed");
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("allow", &allow)
        .text(METHOD_NOT_ALLOWED_BODY)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn service() -> Service {
        Service::new(Server::bind("127.0.0.1:0").unwrap())
    }

    fn request(method: &str, path: &str) -> Request {
        let req = http::Request::builder().method(method).uri(path).body(Bytes::new()).unwrap();
        Request::try_from(req).unwrap()
    }

    async fn hello(_req: Request) -> &'static str {
        "hello"
    }

    #[test]
    fn chains_are_created_lazily_under_their_name() {
        let mut service = service();
        assert_eq!(service.router_for_chain(DEFAULT_CHAIN).prefix(), "");
        assert!(service.chains.is_empty());

        assert_eq!(service.router_for_chain("admin").prefix(), "/admin");
        assert_eq!(service.chains.len(), 1);

        service.router_for_chain("admin");
        assert_eq!(service.chains.len(), 1);
    }

    #[test]
    fn chain_prefix_ends_on_a_segment() {
        let mut router = Router::new("/public");
        router.on(Method::Get, "/x", hello).unwrap();
        let chain = FrozenChain::new(PUBLIC_CHAIN, &router).unwrap();

        assert!(chain.owns("/public"));
        assert!(chain.owns("/public/x"));
        assert!(!chain.owns("/publicity"));
        assert!(!chain.owns("/"));
    }

    #[test]
    fn default_middleware_is_request_id_then_cors() {
        let mut service = service();
        let defaults = service.default_middleware(PUBLIC_CHAIN, &CorsConfig::default());
        assert_eq!(defaults.len(), 2);

        let service = service.with_default_middleware(&CorsConfig::default());
        assert_eq!(service.root.middleware.len(), 2);
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_wrong_method_is_405() {
        let mut service = service();
        service.register_endpoint(DEFAULT_CHAIN, "/users", Method::Get, hello).unwrap();
        service.register_endpoint(DEFAULT_CHAIN, "/users", Method::Post, hello).unwrap();
        let app = service.build().unwrap();

        let res = app.call(request("GET", "/users")).await;
        assert_eq!(res.body(), b"hello");

        let res = app.call(request("GET", "/nothing")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.body(), NOT_FOUND_BODY.as_bytes());

        let res = app.call(request("DELETE", "/users")).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.header("allow"), Some("GET,POST,OPTIONS"));
        assert_eq!(res.body(), METHOD_NOT_ALLOWED_BODY.as_bytes());
    }
}
