//! Per-request settings and payloads.

use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;

/// Method, path, headers and query of a single controller request.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub method: Method,

    /// Path relative to the controller's base URL.
    pub path: String,

    /// Headers for this request only; they override the client defaults.
    pub headers: HeaderMap,

    /// Query parameters, appended in insertion order.
    pub query_params: Vec<(String, String)>,
}

impl RequestMetadata {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

/// Payload of a request.
///
/// Bodies are kept as [`Bytes`] so a retried request resends the same
/// payload without re-serializing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No payload.
    #[default]
    Empty,
    /// A serialized JSON document.
    Json(Bytes),
    /// Caller-supplied bytes, sent as they are.
    Raw(Bytes),
}

impl RequestBody {
    /// Serializes `value` as JSON; `None` means no payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: Option<&T>) -> Result<Self> {
        match value {
            None => Ok(RequestBody::Empty),
            Some(value) => serde_json::to_vec(value)
                .map(|data| RequestBody::Json(Bytes::from(data)))
                .map_err(|e| Error::SerializationFailed(e.to_string())),
        }
    }

    pub fn raw(data: impl Into<Bytes>) -> Self {
        RequestBody::Raw(data.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    pub(crate) fn bytes(&self) -> Option<Bytes> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Json(data) | RequestBody::Raw(data) => Some(data.clone()),
        }
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}
