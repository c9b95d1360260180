//! JSON body parsing.
//!
//! Every failure, whether a wrong content type, a broken stream or malformed
//! JSON, comes back as a [`ParseError`], so callers can answer "was this a bad
//! body?" with a type check instead of string matching.

use std::io::Read;

use serde::de::DeserializeOwned;

use crate::request::Request;
use crate::response::Response;

const JSON_MEDIA_TYPES: [&str; 2] = ["application/json", "application/javascript"];

/// The body could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to parse body: body is not a JSON")]
    NotJson,

    #[error("failed to parse body: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Reads `body` to the end and decodes it as JSON.
pub fn parse_json_body<T: DeserializeOwned>(mut body: impl Read) -> Result<T, ParseError> {
    let mut data = Vec::new();
    body.read_to_end(&mut data)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Decodes the body of an incoming request.
///
/// The `Content-Type` header must name a JSON media type; otherwise the body
/// is not looked at.
pub fn parse_json_request_body<T: DeserializeOwned>(request: &Request) -> Result<T, ParseError> {
    ensure_json(request.header("content-type"))?;
    parse_json_body(request.body())
}

/// Decodes the body of a response, e.g. one produced by an in-process
/// [`App`](crate::App) in tests or a proxied upstream call.
pub fn parse_json_response_body<T: DeserializeOwned>(response: &Response) -> Result<T, ParseError> {
    ensure_json(response.header("content-type"))?;
    parse_json_body(response.body())
}

fn ensure_json(content_type: Option<&str>) -> Result<(), ParseError> {
    match content_type {
        Some(value) if JSON_MEDIA_TYPES.iter().any(|t| value.contains(t)) => Ok(()),
        _ => Err(ParseError::NotJson),
    }
}
