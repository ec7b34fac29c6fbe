//! Structured errors shared by the controller and its clients.
//!
//! Every failure the controller reports travels as a small JSON document:
//!
//! ```json
//! {"code": "object_not_found", "message": "app not found", "retry": false}
//! ```
//!
//! [`ErrorCode`] is the closed set of codes, each bound to one HTTP status.
//! [`classify`] turns any crate [`Error`] into a [`StructuredError`], and the
//! `is_*_error` predicates let callers branch on the code without matching on
//! the error themselves.

use crate::Error;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error codes understood by the controller API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    ObjectNotFound,
    ObjectExists,
    Conflict,
    SyntaxError,
    ValidationError,
    PreconditionFailed,
    Unauthorized,
    Ratelimited,
    ServiceUnavailable,
    RequestBodyTooBig,
    /// Also used for codes this version of the crate does not know.
    #[serde(other)]
    UnknownError,
}

impl ErrorCode {
    /// The HTTP status a response carrying this code is sent with.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound | ErrorCode::ObjectNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ObjectExists | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorCode::SyntaxError
            | ErrorCode::ValidationError
            | ErrorCode::RequestBodyTooBig => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Ratelimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::ObjectNotFound => "object_not_found",
            ErrorCode::ObjectExists => "object_exists",
            ErrorCode::Conflict => "conflict",
            ErrorCode::SyntaxError => "syntax_error",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::UnknownError => "unknown_error",
            ErrorCode::Ratelimited => "ratelimited",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::RequestBodyTooBig => "request_body_too_big",
        }
    }

    /// `true` for both `not_found` and `object_not_found`.
    pub fn is_not_found(self) -> bool {
        matches!(self, ErrorCode::NotFound | ErrorCode::ObjectNotFound)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    /// Whether the same request may succeed if sent again unchanged.
    #[serde(default)]
    pub retry: bool,
}

impl StructuredError {
    /// Creates a non-retryable error without detail.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            retry: false,
        }
    }

    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObjectNotFound, message)
    }

    pub fn object_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObjectExists, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PreconditionFailed, message)
    }

    /// A retryable `service_unavailable` error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message).retryable(true)
    }

    /// A validation error about one input field.
    ///
    /// With a non-empty `field` the message is prefixed with the field name and
    /// the detail records it as `{"field": ...}`.
    ///
    /// ```
    /// use weo_client::StructuredError;
    ///
    /// let err = StructuredError::validation("name", "must not be empty");
    /// assert_eq!(err.message, "name must not be empty");
    /// assert_eq!(err.detail, Some(serde_json::json!({"field": "name"})));
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        if field.is_empty() {
            return Self::new(ErrorCode::ValidationError, message);
        }
        Self::new(ErrorCode::ValidationError, format!("{field} {message}"))
            .with_detail(serde_json::json!({ "field": field }))
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn retryable(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// The HTTP status for this error's code.
    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    fn unknown() -> Self {
        Self::new(ErrorCode::UnknownError, "Something went wrong")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Classifies `err` into a [`StructuredError`].
///
/// - [`Error::RequestBodyTooBig`] becomes `request_body_too_big`.
/// - Malformed JSON becomes `syntax_error`.
/// - Transport and storage failures become a retryable `unknown_error`.
/// - Structured errors pass through unchanged.
/// - Anything else becomes a non-retryable `unknown_error`.
///
/// Unknown errors produced here are logged with their full detail, since the
/// returned value hides it behind a generic message.
///
/// ```
/// use weo_client::{api_error::{classify, ErrorCode}, Error};
///
/// let err = classify(&Error::RequestBodyTooBig);
/// assert_eq!(err.code, ErrorCode::RequestBodyTooBig);
/// assert_eq!(err.status().as_u16(), 400);
/// assert!(!err.retry);
/// ```
pub fn classify(err: &Error) -> StructuredError {
    match err {
        Error::Api(structured) => structured.clone(),
        Error::RequestBodyTooBig => StructuredError::new(
            ErrorCode::RequestBodyTooBig,
            "The provided request body is too big",
        ),
        Error::Json(_) | Error::DeserializationFailed { .. } => StructuredError::new(
            ErrorCode::SyntaxError,
            "The provided JSON input is invalid",
        ),
        Error::Network(_)
        | Error::Timeout
        | Error::Io(_)
        | Error::Handshake(_)
        | Error::Storage(_) => {
            tracing::warn!(error = %err, "Transient failure classified as unknown error");
            StructuredError::unknown().retryable(true)
        }
        Error::Tls(_)
        | Error::PinFailure
        | Error::HalfCloseUnsupported
        | Error::UnsupportedNetwork(_)
        | Error::InvalidServerName(_)
        | Error::HttpError { .. }
        | Error::SerializationFailed(_)
        | Error::ConfigurationError(_)
        | Error::InvalidUrl(_) => {
            tracing::error!(error = %err, "Unexpected error");
            StructuredError::unknown()
        }
    }
}

fn has_code(err: &Error, pred: impl FnOnce(ErrorCode) -> bool) -> bool {
    err.as_structured().is_some_and(|e| pred(e.code))
}

/// `true` if `err` is a structured `not_found` or `object_not_found` error.
pub fn is_not_found_error(err: &Error) -> bool {
    has_code(err, ErrorCode::is_not_found)
}

/// `true` if `err` is a structured `object_exists` error.
pub fn is_object_exists_error(err: &Error) -> bool {
    has_code(err, |code| code == ErrorCode::ObjectExists)
}

/// `true` if `err` is a structured `precondition_failed` error.
pub fn is_precondition_failed_error(err: &Error) -> bool {
    has_code(err, |code| code == ErrorCode::PreconditionFailed)
}

/// `true` if `err` is a structured `validation_error`.
pub fn is_validation_error(err: &Error) -> bool {
    has_code(err, |code| code == ErrorCode::ValidationError)
}

/// `true` if `err` is a structured error flagged as retryable.
///
/// Unlike [`Error::is_retryable`], this only looks at structured errors.
pub fn is_retryable_error(err: &Error) -> bool {
    err.as_structured().is_some_and(|e| e.retry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageFailure;

    const ALL_CODES: [ErrorCode; 12] = [
        ErrorCode::NotFound,
        ErrorCode::ObjectNotFound,
        ErrorCode::ObjectExists,
        ErrorCode::Conflict,
        ErrorCode::SyntaxError,
        ErrorCode::ValidationError,
        ErrorCode::PreconditionFailed,
        ErrorCode::Unauthorized,
        ErrorCode::UnknownError,
        ErrorCode::Ratelimited,
        ErrorCode::ServiceUnavailable,
        ErrorCode::RequestBodyTooBig,
    ];

    #[test]
    fn test_status_table() {
        let expected = [404, 404, 409, 409, 400, 400, 412, 401, 500, 429, 503, 400];
        for (code, status) in ALL_CODES.iter().zip(expected) {
            assert_eq!(code.status().as_u16(), status, "status for {code}");
        }
    }

    #[test]
    fn test_wire_names_match_serde() {
        for code in ALL_CODES {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::String(code.as_str().to_string()));
        }
    }

    #[test]
    fn test_wire_format() {
        let err = StructuredError::object_exists("app already exists");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": "object_exists",
                "message": "app already exists",
                "retry": false,
            })
        );

        let parsed: StructuredError =
            serde_json::from_str(r#"{"code":"brand_new_code","message":"huh"}"#).unwrap();
        assert_eq!(parsed.code, ErrorCode::UnknownError);
        assert!(!parsed.retry);
    }

    #[test]
    fn test_classify_body_too_big() {
        let err = classify(&Error::RequestBodyTooBig);
        assert_eq!(err.code, ErrorCode::RequestBodyTooBig);
        assert!(!err.retry);
    }

    #[test]
    fn test_classify_json_errors() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = classify(&Error::from(bad));
        assert_eq!(err.code, ErrorCode::SyntaxError);
        assert!(!err.retry);
    }

    #[test]
    fn test_classify_transient_failures() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        for err in [
            Error::from(reset),
            Error::Timeout,
            Error::from(StorageFailure::DeadConnection),
            Error::from(StorageFailure::Backend {
                code: "40P01".to_string(),
                message: "deadlock detected".to_string(),
            }),
        ] {
            let classified = classify(&err);
            assert_eq!(classified.code, ErrorCode::UnknownError);
            assert!(classified.retry, "{err} should be retryable");
        }
    }

    #[test]
    fn test_classify_unrecognized() {
        let err = classify(&Error::PinFailure);
        assert_eq!(err.code, ErrorCode::UnknownError);
        assert_eq!(err.message, "Something went wrong");
        assert!(!err.retry);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let inputs = [
            Error::RequestBodyTooBig,
            Error::Timeout,
            Error::PinFailure,
            Error::from(StructuredError::validation("name", "is required")),
        ];
        for err in inputs {
            let once = classify(&err);
            let twice = classify(&Error::from(once.clone()));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_predicates() {
        let not_found = Error::from(StructuredError::new(ErrorCode::NotFound, "nope"));
        let object_not_found = Error::from(StructuredError::object_not_found("no app"));
        let exists = Error::from(StructuredError::object_exists("dup"));
        let stale = Error::from(StructuredError::precondition_failed("stale"));
        let invalid = Error::from(StructuredError::validation("", "bad"));
        let busy = Error::from(StructuredError::service_unavailable("busy"));

        assert!(is_not_found_error(&not_found));
        assert!(is_not_found_error(&object_not_found));
        assert!(!is_not_found_error(&exists));
        assert!(is_object_exists_error(&exists));
        assert!(is_precondition_failed_error(&stale));
        assert!(is_validation_error(&invalid));
        assert!(is_retryable_error(&busy));
        assert!(!is_retryable_error(&invalid));

        // Unstructured errors never match, even if they are retryable.
        assert!(!is_not_found_error(&Error::Timeout));
        assert!(!is_retryable_error(&Error::Timeout));
    }
}
