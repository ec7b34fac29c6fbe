//! Server-side helpers for emitting and accepting JSON.
//!
//! These build plain [`http::Response`] values so they can be returned from
//! any framework that speaks the `http` crate's types.

use crate::api_error::{classify, ErrorCode, StructuredError};
use crate::{Error, Result};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

const APPLICATION_JSON: &str = "application/json";

/// Builds the error response for `err`.
///
/// The body is the structured error as JSON and the status comes from its
/// code. Failures that classify as `unknown_error` are logged in the current
/// span before responding; the client only ever sees the generic message.
///
/// ```
/// use weo_client::{respond::respond_with_error, Error, StructuredError};
///
/// let response = respond_with_error(&Error::from(StructuredError::conflict("deploy running")));
/// assert_eq!(response.status().as_u16(), 409);
/// assert!(response.body().contains(r#""code":"conflict""#));
/// ```
pub fn respond_with_error(err: &Error) -> Response<String> {
    let structured = classify(err);
    // `classify` has already logged anything it had to flatten.
    if structured.code == ErrorCode::UnknownError && err.as_structured().is_some() {
        tracing::error!(error = %structured, "Responding with unknown error");
    }
    json_response(structured.status(), &structured)
}

/// Serializes `value` into a JSON response with the given status.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<String> {
    match serde_json::to_string(value) {
        Ok(body) => {
            let mut response = Response::new(body);
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            let mut response = Response::new(e.to_string());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Decodes a JSON request body.
///
/// # Errors
///
/// - a structured `validation_error` if `Content-Type` is not JSON,
/// - [`Error::RequestBodyTooBig`] if `body` is longer than `limit` bytes,
/// - [`Error::Json`] if the body is not valid JSON for `T`.
pub fn decode_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8], limit: usize) -> Result<T> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(APPLICATION_JSON));
    if !is_json {
        return Err(StructuredError::new(
            ErrorCode::ValidationError,
            "Content-Type must be application/json",
        )
        .into());
    }
    if body.len() > limit {
        return Err(Error::RequestBodyTooBig);
    }
    Ok(serde_json::from_slice(body)?)
}
