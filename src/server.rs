//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Stops calling `listener.accept()` immediately, so no new connections
//!    are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Under Kubernetes, set `terminationGracePeriodSeconds` longer than your
//! slowest request.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::method::{self, Method};
use crate::request::Request;
use crate::response::Response;
use crate::service::App;

/// Largest request body read by default, in bytes (2 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// The HTTP listener a [`Service`](crate::Service) is served on.
pub struct Server {
    addr: SocketAddr,
    max_body_size: usize,
}

impl Server {
    /// Configures the server to bind to `addr` once serving starts.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if `addr` is not a valid `host:port` string.
    ///
    /// ```rust
    /// use chainkit::Server;
    /// let server = Server::bind("0.0.0.0:3000").unwrap();
    /// assert_eq!(server.addr().port(), 3000);
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr
            .parse::<SocketAddr>()
            .map_err(|source| Error::InvalidAddress { addr: addr.to_owned(), source })?;
        Ok(Self { addr, max_body_size: DEFAULT_MAX_BODY_SIZE })
    }

    /// Caps request bodies at `bytes`. Larger bodies are answered
    /// `413 Payload Too Large` without reaching the service.
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Accepts connections and dispatches them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;

        let app = Arc::new(app);
        let max_body_size = self.max_body_size;

        info!(addr = %self.addr, "listening");

        // every spawned connection, so shutdown can wait for them
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // check shutdown first so a signal stops accepting even with
                // connections queued
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // called once per request on the connection
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move {
                                let res = respond(&app, req, max_body_size).await;
                                Ok::<_, Infallible>(res.into_inner())
                            }
                        });

                        // a failed response write surfaces here, after the
                        // handler is done, and is only logged
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                // reap finished tasks so the set does not grow without bound
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("server stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Collects one request body and runs the request through `app`.
///
/// Every failure becomes a response, so hyper never sees an error. A method
/// outside the nine RFC 9110 tokens cannot be represented as a [`Request`],
/// so it is answered `405` here and never reaches a chain.
async fn respond<B>(app: &App, req: http::Request<B>, max_body_size: usize) -> Response
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(method = %parts.method, path = parts.uri.path(), limit = max_body_size, "request body too large");
            return Response::status(StatusCode::PAYLOAD_TOO_LARGE);
        }
        Err(e) => {
            warn!(method = %parts.method, path = parts.uri.path(), "failed to read request body: {e}");
            return Response::status(StatusCode::BAD_REQUEST);
        }
    };

    match Request::try_from(http::Request::<Bytes>::from_parts(parts, body)) {
        Ok(req) => app.call(req).await,
        Err(e) => {
            warn!("{e}");
            Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header("allow", &method::join(&Method::ALLOWED))
                .no_body()
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// Listens for SIGTERM and SIGINT on Unix, Ctrl-C elsewhere. A signal that
/// cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::Full;

    use super::*;
    use crate::middleware::cors::CorsConfig;
    use crate::{DEFAULT_CHAIN, Service};

    #[test]
    fn rejects_invalid_addresses() {
        let err = Server::bind("not an address").err();
        assert!(matches!(err, Some(Error::InvalidAddress { ref addr, .. }) if addr == "not an address"));
    }

    #[test]
    fn keeps_the_parsed_address() {
        let server = Server::bind("127.0.0.1:8080").unwrap();
        assert_eq!(server.addr(), "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(server.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(server.with_max_body_size(16).max_body_size(), 16);
    }

    fn app() -> App {
        let mut service = Service::new(Server::bind("127.0.0.1:0").unwrap())
            .with_default_middleware(&CorsConfig::default());
        service
            .register_endpoint(DEFAULT_CHAIN, "/echo", Method::Post, |req: Request| async move {
                Response::text(String::from_utf8_lossy(req.body()).into_owned())
            })
            .unwrap();
        service.build().unwrap()
    }

    fn request(method: &str, body: &'static str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(method)
            .uri("/echo")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn bodies_are_collected_up_to_the_limit() {
        let app = app();

        let res = respond(&app, request("POST", "hello"), 5).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"hello");

        let res = respond(&app, request("POST", "hello!"), 5).await;
        assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn extension_methods_are_refused_before_any_chain() {
        let app = app();

        let res = respond(&app, request("PURGE", ""), DEFAULT_MAX_BODY_SIZE).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            res.header("allow"),
            Some("CONNECT,DELETE,GET,HEAD,PATCH,POST,PUT,TRACE")
        );
        // the chain never ran, so no request ID was assigned
        assert_eq!(res.header("x-request-id"), None);
    }
}
