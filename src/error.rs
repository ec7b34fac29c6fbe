//! Error types for controller API calls.
//!
//! [`Error`] is the closed set of failure shapes the crate knows about:
//! transport failures, TLS and pinning failures, protocol failures, and
//! structured errors returned by the controller. Every variant can be
//! classified into a wire-level [`StructuredError`] with
//! [`classify`](crate::api_error::classify).

use crate::api_error::StructuredError;
use http::{HeaderMap, StatusCode};

/// The main error type for controller API calls and connections.
///
/// # Examples
///
/// ```no_run
/// use weo_client::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://controller.example.com")?
///     .key("secret")
///     .build()?;
///
/// match client.get::<serde_json::Value>("/apps/web").await {
///     Ok(response) => println!("App: {:?}", response.data),
///     Err(Error::Api(err)) if err.code.is_not_found() => eprintln!("no such app"),
///     Err(Error::PinFailure) => eprintln!("controller certificate changed!"),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error raised by the HTTP transport.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// A raw socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS handshake with the peer failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// The TLS configuration could not be built.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The peer's leaf certificate does not match the configured pin.
    ///
    /// This is a trust failure, not a transient one, and is never retried.
    #[error("pinned: the peer leaf certificate did not match the provided pin")]
    PinFailure,

    /// The raw transport cannot close only its write half.
    #[error("pinned: underlying connection does not support half-close")]
    HalfCloseUnsupported,

    /// The dialer was asked for a network type it cannot open.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// No TLS server name could be derived from the dialed address.
    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// The controller answered with a structured error body.
    #[error("{0}")]
    Api(StructuredError),

    /// The server returned a non-2xx status without a structured error body.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// A successful response body did not match the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// An incoming JSON document was malformed or had the wrong shape.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An incoming request body exceeded the accepted size.
    #[error("request body too big")]
    RequestBodyTooBig,

    /// The backing store failed in a way that is usually transient.
    #[error("Storage error: {0}")]
    Storage(StorageFailure),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Transient failures reported by a database backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageFailure {
    /// The pooled connection was found dead.
    #[error("dead connection")]
    DeadConnection,

    /// The backend rejected the statement, e.g. because of a deadlock.
    #[error("{code}: {message}")]
    Backend {
        /// Backend-specific error code
        code: String,
        /// Backend message
        message: String,
    },
}

impl Error {
    /// Returns `true` if repeating the same call may succeed.
    ///
    /// Transport failures, timeouts, storage failures, 5xx and 429 responses
    /// without a structured body, and structured errors flagged with `retry`
    /// are retryable. Pin mismatches, malformed payloads and application
    /// errors are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use weo_client::{Error, StructuredError};
    /// use weo_client::api_error::ErrorCode;
    ///
    /// let err = Error::Api(StructuredError::service_unavailable("controller restarting"));
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::Api(StructuredError::new(ErrorCode::Conflict, "release in use"));
    /// assert!(!err.is_retryable());
    ///
    /// assert!(!Error::PinFailure.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout => true,
            Error::Io(_) => true,
            Error::Handshake(_) => true,
            Error::Storage(_) => true,
            Error::Api(err) => err.retry,
            Error::HttpError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Tls(_)
            | Error::PinFailure
            | Error::HalfCloseUnsupported
            | Error::UnsupportedNetwork(_)
            | Error::InvalidServerName(_)
            | Error::DeserializationFailed { .. }
            | Error::Json(_)
            | Error::SerializationFailed(_)
            | Error::RequestBodyTooBig
            | Error::ConfigurationError(_)
            | Error::InvalidUrl(_) => false,
        }
    }

    /// Returns the structured error carried by this error, if any.
    pub fn as_structured(&self) -> Option<&StructuredError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the HTTP status code if this error came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(err) => Some(err.code.status()),
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

impl From<StructuredError> for Error {
    fn from(err: StructuredError) -> Self {
        Error::Api(err)
    }
}

impl From<StorageFailure> for Error {
    fn from(failure: StorageFailure) -> Self {
        Error::Storage(failure)
    }
}

/// A specialized `Result` type for controller API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_error::ErrorCode;

    #[test]
    fn test_http_error_retryability() {
        let server = Error::HttpError {
            status: StatusCode::BAD_GATEWAY,
            raw_response: "bad gateway".to_string(),
            headers: HeaderMap::new(),
        };
        assert!(server.is_retryable());

        let limited = Error::HttpError {
            status: StatusCode::TOO_MANY_REQUESTS,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        };
        assert!(limited.is_retryable());

        let client = Error::HttpError {
            status: StatusCode::BAD_REQUEST,
            raw_response: "bad request".to_string(),
            headers: HeaderMap::new(),
        };
        assert!(!client.is_retryable());
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(Error::from(reset).is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(Error::from(StorageFailure::DeadConnection).is_retryable());
    }

    #[test]
    fn test_trust_and_input_errors_are_not_retryable() {
        assert!(!Error::PinFailure.is_retryable());
        assert!(!Error::RequestBodyTooBig.is_retryable());
        assert!(!Error::HalfCloseUnsupported.is_retryable());
    }

    #[test]
    fn test_status_of_structured_error() {
        let err = Error::from(StructuredError::new(ErrorCode::PreconditionFailed, "stale"));
        assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
        assert!(err.raw_response().is_none());
    }
}
