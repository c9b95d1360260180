//! Unified error type.

use crate::method::Method;

/// The error type returned by chainkit's fallible setup operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values or [`ApiError`](crate::ApiError)
/// envelopes, not as `Error`s. This type surfaces configuration mistakes made
/// while building a service and infrastructure failures while starting it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listen address is not a valid `host:port` pair.
    #[error("invalid socket address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// An endpoint was registered for a method outside [`Method::ALLOWED`].
    #[error("method {0} is not allowed")]
    UnsupportedMethod(Method),

    /// The route table could not be built: a malformed path or two routes
    /// that conflict for the same method.
    #[error("invalid route {method} `{path}`: {source}")]
    Route {
        method: Method,
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    /// Binding the listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
