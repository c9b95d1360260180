//! # chainkit
//!
//! Helpers for building HTTP services out of middleware chains.
//!
//! A [`Service`] groups endpoints into named *chains*. Each chain is mounted
//! under its own path prefix and wrapped in its own middleware. The default
//! pair of middleware stamps every request with an ID and negotiates CORS
//! against the routes of that chain.
//!
//! What the crate covers:
//!
//! - Radix-tree routing per chain, via [`matchit`]
//! - CORS negotiation: origin checks, allowed methods derived from the routes
//!   actually registered, preflight answers
//! - Request IDs in the request extensions and the `X-Request-ID` header
//! - JSON responses and the [`ApiError`] envelope (`{"code", "error"}`)
//! - JSON body parsing with content-type checks
//! - Static files, hyper HTTP/1.1 + HTTP/2, graceful shutdown
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chainkit::middleware::cors::CorsConfig;
//! use chainkit::{
//!     ApiError, DEFAULT_CHAIN, Json, Method, PUBLIC_CHAIN, Request, Server, Service,
//! };
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chainkit::Error> {
//!     let cors = CorsConfig::default().allow_origins(["https://app.example.com"]);
//!
//!     let mut service = Service::new(Server::bind("0.0.0.0:3000")?)
//!         .with_default_middleware(&cors)
//!         .with_default_middleware_for_public_and_restricted_chains(&cors);
//!
//!     service
//!         .register_endpoint(DEFAULT_CHAIN, "/users/{id}", Method::Get, get_user)?
//!         .register_endpoint(PUBLIC_CHAIN, "/status", Method::Get, status)?;
//!
//!     service.listen_and_serve().await
//! }
//!
//! async fn get_user(req: Request) -> Result<Json<serde_json::Value>, ApiError> {
//!     match req.param("id") {
//!         Some("1") => Ok(Json(serde_json::json!({"id": 1, "name": "alice"}))),
//!         _ => Err(ApiError::new(StatusCode::NOT_FOUND, "USER-4041", "user not found")),
//!     }
//! }
//!
//! async fn status(_req: Request) -> &'static str {
//!     "ok"
//! }
//! ```

mod api_error;
mod body;
mod error;
mod files;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod service;

pub mod middleware;

pub use api_error::ApiError;
pub use body::{ParseError, parse_json_body, parse_json_request_body, parse_json_response_body};
pub use error::Error;
pub use handler::{BoxFuture, Handler, Next};
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{
    ContentType, IntoResponse, Json, Response, ResponseBuilder, write_json, write_json_error,
};
pub use router::{RouteMatcher, RouteProbe, RouteTable, Router, methods_for_path};
pub use server::{DEFAULT_MAX_BODY_SIZE, Server};
pub use service::{App, DEFAULT_CHAIN, PUBLIC_CHAIN, RESTRICTED_CHAIN, Service};
