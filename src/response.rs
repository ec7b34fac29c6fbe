//! Successful controller responses.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A decoded controller response together with its transport details.
///
/// Derefs to the decoded data, so `response.name` reads a field of `T`.
///
/// ```no_run
/// use weo_client::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct App {
///     id: String,
///     name: String,
/// }
///
/// # async fn example(client: Client) -> Result<(), weo_client::Error> {
/// let app = client.get::<App>("/apps/web").await?;
/// println!("{} ({}) in {:?} after {} attempt(s)", app.name, app.id, app.latency, app.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub data: T,

    /// The body exactly as received.
    pub raw_body: String,

    pub status: StatusCode,

    pub headers: HeaderMap,

    /// Time from the first attempt until this response arrived.
    pub latency: Duration,

    /// Number of attempts it took; `1` when the first try succeeded.
    pub attempts: usize,
}

impl<T> Response<T> {
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Replaces the decoded data, keeping the transport details.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Looks up a response header that is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The controller's entity tag, used for conditional updates.
    pub fn etag(&self) -> Option<&str> {
        self.header(http::header::ETAG.as_str())
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
