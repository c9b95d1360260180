//! Client-facing error envelope.
//!
//! An [`ApiError`] carries two messages: `external`, which is safe to show to
//! a client and goes on the wire, and `internal`, which only ever reaches the
//! logs. Only `code` and `external` are serialised:
//!
//! ```json
//! {"code":"USER-4041","error":"user not found"}
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};

const SEPARATOR_AFTER_CODE: &str = " - ";
const SEPARATOR_BEFORE_DETAILS: &str = ": ";

/// A structured error response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Status written with the envelope. Never serialised.
    #[serde(skip, default = "default_status")]
    pub status: StatusCode,

    /// Stable machine-readable identifier.
    #[serde(default)]
    pub code: String,

    /// Message safe for client display. Serialised as `error`.
    #[serde(rename = "error", default)]
    pub external: String,

    /// Message for the logs only.
    #[serde(skip)]
    pub internal: String,

    /// Underlying cause, logged but never sent.
    #[serde(skip)]
    pub details: Option<Arc<dyn StdError + Send + Sync>>,
}

fn default_status() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, external: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            external: external.into(),
            internal: String::new(),
            details: None,
        }
    }

    /// Sets the log-only message.
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = internal.into();
        self
    }

    /// The envelope substituted when a payload cannot be encoded as JSON.
    pub fn json_conversion() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CHAINKIT-5001",
            "a general issue occurred on preparing response",
        )
        .with_internal("failed to encode JSON")
    }

    /// Returns a copy carrying `err` as details.
    ///
    /// The copy's internal message is frozen to what [`internal`](Self::internal)
    /// would have printed without details, so the original text survives even
    /// when only `external` was set. `self` is left untouched.
    pub fn with_details(&self, err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            status: self.status,
            code: self.code.clone(),
            external: self.external.clone(),
            internal: self.base_message().to_owned(),
            details: Some(Arc::from(err.into())),
        }
    }

    /// The message used for logging.
    ///
    /// Prefers `internal`, falls back to `external`, appends the details and
    /// prefixes the code:
    ///
    /// | code | internal | external | details | result |
    /// |---|---|---|---|---|
    /// | `E1` | `db down` | `oops` | - | `E1 - db down` |
    /// | - | - | `oops` | `timeout` | `oops: timeout` |
    /// | `E1` | - | - | `timeout` | `E1: timeout` |
    /// | `E1` | - | - | - | `E1` |
    pub fn internal(&self) -> String {
        let base = self.base_message();
        let mut msg = base.to_owned();

        if let Some(details) = &self.details {
            if self.code.is_empty() && msg.is_empty() {
                msg = details.to_string();
            } else {
                msg.push_str(SEPARATOR_BEFORE_DETAILS);
                msg.push_str(&details.to_string());
            }
        }

        if self.code.is_empty() {
            return msg;
        }
        if msg.is_empty() {
            return self.code.clone();
        }
        if base.is_empty() {
            // msg already starts with the details separator
            return format!("{}{msg}", self.code);
        }
        format!("{}{SEPARATOR_AFTER_CODE}{msg}", self.code)
    }

    fn base_message(&self) -> &str {
        if self.internal.is_empty() { &self.external } else { &self.internal }
    }
}

/// Plain-text rendering for clients: `code - external`, or whichever part is set.
impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.external.is_empty()) {
            (false, false) => write!(f, "{}{SEPARATOR_AFTER_CODE}{}", self.code, self.external),
            (false, true) => f.write_str(&self.code),
            _ => f.write_str(&self.external),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.details.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: &str, internal: &str, external: &str) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, code, external).with_internal(internal)
    }

    #[test]
    fn internal_prefers_internal_over_external() {
        assert_eq!(envelope("", "internal", "").internal(), "internal");
        assert_eq!(envelope("", "", "external").internal(), "external");
        assert_eq!(envelope("", "internal", "external").internal(), "internal");
        assert_eq!(envelope("", "", "").internal(), "");
    }

    #[test]
    fn internal_prefixes_code_only_before_a_message() {
        assert_eq!(envelope("E100", "internal", "external").internal(), "E100 - internal");
        assert_eq!(envelope("E100", "", "external").internal(), "E100 - external");
        assert_eq!(envelope("E100", "", "").internal(), "E100");
    }

    #[test]
    fn internal_appends_details() {
        let details = || std::io::Error::other("details");

        assert_eq!(
            envelope("E202", "internal", "external").with_details(details()).internal(),
            "E202 - internal: details"
        );
        assert_eq!(
            envelope("", "internal", "external").with_details(details()).internal(),
            "internal: details"
        );
        assert_eq!(envelope("", "", "").with_details(details()).internal(), "details");
        assert_eq!(envelope("E500", "", "").with_details(details()).internal(), "E500: details");
    }

    #[test]
    fn with_details_leaves_receiver_untouched() {
        let original = envelope("E1", "", "external");
        let detailed = original.with_details("boom");

        assert_eq!(original.code, "E1");
        assert_eq!(original.internal, "");
        assert_eq!(original.external, "external");
        assert_eq!(original.status, StatusCode::BAD_REQUEST);
        assert!(original.details.is_none());

        assert_eq!(detailed.internal, "external");
        assert_eq!(detailed.external, "external");
        assert_eq!(detailed.status, StatusCode::BAD_REQUEST);
        assert_eq!(detailed.source().map(|e| e.to_string()), Some("boom".to_owned()));
    }

    #[test]
    fn display_uses_external_message() {
        assert_eq!(envelope("E1", "secret", "external").to_string(), "E1 - external");
        assert_eq!(envelope("E1", "secret", "").to_string(), "E1");
        assert_eq!(envelope("", "secret", "external").to_string(), "external");
    }

    #[test]
    fn serialises_only_code_and_error() {
        let err = envelope("E1", "secret", "external").with_details("hidden");
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value, serde_json::json!({"code": "E1", "error": "external"}));
    }

    #[test]
    fn deserialises_missing_fields_as_empty() {
        let err: ApiError = serde_json::from_str("{}").unwrap();
        assert_eq!(err.code, "");
        assert_eq!(err.external, "");
    }
}
