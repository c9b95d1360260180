//! Minimal chainkit example: JSON endpoints on the default and public chains,
//! CORS for a single front-end origin, and static files.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/1
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -i -X OPTIONS http://localhost:3000/users \
//!        -H 'origin: http://localhost:8080' \
//!        -H 'access-control-request-method: POST'
//!   curl -i http://localhost:3000/public/status
//!   curl -i http://localhost:3000/public/assets/Cargo.toml

use chainkit::middleware::cors::CorsConfig;
use chainkit::middleware::request_id;
use chainkit::{
    ApiError, DEFAULT_CHAIN, Json, Method, PUBLIC_CHAIN, Request, Response, Server, Service,
    parse_json_request_body, write_json,
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), chainkit::Error> {
    tracing_subscriber::fmt::init();

    let cors = CorsConfig::default()
        .allow_origins(["http://localhost:8080"])
        .allow_headers(["content-type", "authorization"]);

    let mut service = Service::new(Server::bind("0.0.0.0:3000")?)
        .with_default_middleware(&cors)
        .with_default_middleware_for_public_and_restricted_chains(&cors);

    service
        .register_endpoint(DEFAULT_CHAIN, "/users/{id}", Method::Get, get_user)?
        .register_endpoint(DEFAULT_CHAIN, "/users", Method::Post, create_user)?
        .register_endpoint(DEFAULT_CHAIN, "/users/{id}", Method::Delete, delete_user)?
        .register_endpoint(PUBLIC_CHAIN, "/status", Method::Get, status)?
        .register_file_server(PUBLIC_CHAIN, "/assets", Method::Get, ".")?;

    service.listen_and_serve().await
}

// GET /users/{id}
async fn get_user(req: Request) -> Result<Json<User>, ApiError> {
    match req.param("id").and_then(|id| id.parse().ok()) {
        Some(1) => Ok(Json(User { id: 1, name: "alice".to_owned() })),
        _ => Err(ApiError::new(StatusCode::NOT_FOUND, "USER-4041", "user not found")),
    }
}

// POST /users
async fn create_user(req: Request) -> Response {
    let input: CreateUser = match parse_json_request_body(&req) {
        Ok(input) => input,
        Err(e) => {
            let err = ApiError::new(StatusCode::BAD_REQUEST, "USER-4001", "invalid user")
                .with_details(e);
            return chainkit::write_json_error(&err);
        }
    };

    request_id::span(&req).in_scope(|| info!(name = %input.name, "creating user"));

    let mut res = write_json(StatusCode::CREATED, &User { id: 99, name: input.name });
    res.set_header("location", "/users/99");
    res
}

// DELETE /users/{id} → 204 No Content
async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn status(_req: Request) -> &'static str {
    "ok"
}
