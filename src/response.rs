//! Outgoing HTTP response type, the [`IntoResponse`] conversion trait and the
//! JSON writers.
//!
//! Handlers build a [`Response`] and return it. [`write_json`] and
//! [`write_json_error`] are the two ways to put JSON on the wire; both always
//! produce a response, falling back to a structured error (or, as a last
//! resort, plain text) when encoding fails.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tracing::{error, warn};

use crate::api_error::ApiError;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css; charset=utf-8
    Csv,          // text/csv
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    Javascript,   // text/javascript; charset=utf-8
    Jpeg,         // image/jpeg
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Wasm,         // application/wasm
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css; charset=utf-8",
            Self::Csv         => "text/csv",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::Javascript  => "text/javascript; charset=utf-8",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Wasm        => "application/wasm",
            Self::Xml         => "application/xml",
        }
    }

    /// Guesses the content type of a file from its extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "csv"          => Self::Csv,
            "gif"          => Self::Gif,
            "htm" | "html" => Self::Html,
            "js" | "mjs"   => Self::Javascript,
            "jpg" | "jpeg" => Self::Jpeg,
            "json"         => Self::Json,
            "pdf"          => Self::Pdf,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "wasm"         => Self::Wasm,
            "xml"          => Self::Xml,
            _              => Self::OctetStream,
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use chainkit::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use chainkit::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: HeaderMap,
    pub(crate) status: StatusCode,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: HeaderMap::new(), status: code }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header value as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a header, replacing any previous value.
    ///
    /// Invalid names or values are dropped with a warning.
    pub fn set_header(&mut self, name: &str, value: &str) {
        insert_header(&mut self.headers, name, value);
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(header = name, "dropping invalid response header"),
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.bytes(ContentType::Text, body)
    }

    /// Terminate with a typed body. Use this for HTML, binary, files, etc.
    pub fn bytes(mut self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response { body: body.into(), headers: self.headers, status: self.status }
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }
}

// ── JSON writers ──────────────────────────────────────────────────────────────

/// Serialises `payload` as a JSON response with `status`.
///
/// If the payload cannot be encoded the client receives
/// [`ApiError::json_conversion`] instead, so the body is always JSON.
pub fn write_json<T: Serialize + ?Sized>(status: StatusCode, payload: &T) -> Response {
    match serde_json::to_vec(payload) {
        Ok(body) => Response::builder().status(status).json(body),
        Err(e) => write_json_error(&ApiError::json_conversion().with_details(e)),
    }
}

/// Writes an [`ApiError`] as `{"code": …, "error": …}` with the envelope's status.
///
/// The envelope's internal message is logged at error level. Envelopes with a
/// status below 400 are still written, with a warning. Should encoding fail,
/// the plain-text rendering is sent with `500`.
pub fn write_json_error(err: &ApiError) -> Response {
    if err.status.as_u16() < 400 {
        warn!(
            status = err.status.as_u16(),
            code = %err.code,
            "error response written with a non-error status code"
        );
    }

    match serde_json::to_vec(err) {
        Ok(body) => {
            error!(status = err.status.as_u16(), "{}", err.internal());
            Response::builder().status(err.status).json(body)
        }
        Err(e) => {
            error!(error = %e, "failed to encode error envelope: {}", err.internal());
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .text(err.to_string())
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response { write_json_error(&self) }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// `200 OK` with the wrapped value serialised by [`write_json`].
///
/// ```rust,no_run
/// use chainkit::{Json, Request};
///
/// async fn get_user(_req: Request) -> Json<serde_json::Value> {
///     Json(serde_json::json!({"id": 1, "name": "alice"}))
/// }
/// ```
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        write_json(StatusCode::OK, &self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn write_json_sets_status_type_and_body() {
        let res = write_json(StatusCode::OK, &serde_json::json!({"name": "test"}));

        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.body(), br#"{"name":"test"}"#);
    }

    #[test]
    fn write_json_keeps_caller_status() {
        let res = write_json(StatusCode::NOT_FOUND, &serde_json::json!({}));

        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.body(), b"{}");
    }

    #[test]
    fn write_json_falls_back_to_conversion_error() {
        // map keys must be strings in JSON
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let res = write_json(StatusCode::OK, &payload);

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.header("content-type"), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], "CHAINKIT-5001");
        assert_eq!(body["error"], "a general issue occurred on preparing response");
    }

    #[test]
    fn write_json_error_exposes_only_code_and_error() {
        let err = ApiError::new(StatusCode::CONFLICT, "USER-4091", "user exists")
            .with_internal("unique constraint users_email_key")
            .with_details("duplicate key");

        let res = write_json_error(&err);
        assert_eq!(res.status_code(), StatusCode::CONFLICT);
        assert_eq!(res.header("content-type"), Some("application/json"));

        let body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body["code"], "USER-4091");
        assert_eq!(body["error"], "user exists");
    }

    #[test]
    fn write_json_error_writes_non_error_status_as_given() {
        let err = ApiError::new(StatusCode::CREATED, "", "external error");
        let res = write_json_error(&err);

        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.body(), br#"{"code":"","error":"external error"}"#);
    }

    #[test]
    fn result_picks_the_matching_branch() {
        let ok: Result<&'static str, ApiError> = Ok("fine");
        assert_eq!(ok.into_response().body(), b"fine");

        let err: Result<&'static str, ApiError> =
            Err(ApiError::new(StatusCode::BAD_REQUEST, "E400", "bad"));
        assert_eq!(err.into_response().status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let mut res = Response::text("x");
        res.set_header("bad header", "v");
        res.set_header("x-ok", "v");

        assert_eq!(res.headers().len(), 2);
        assert_eq!(res.header("x-ok"), Some("v"));
    }

    #[test]
    fn guesses_content_type_from_extension() {
        assert_eq!(ContentType::from_extension("HTML"), ContentType::Html);
        assert_eq!(ContentType::from_extension("css"), ContentType::Css);
        assert_eq!(ContentType::from_extension("bin"), ContentType::OctetStream);
    }
}
