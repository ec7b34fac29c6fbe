//! Controller API client.
//!
//! The [`Client`] type is the entry point for talking to a cluster's
//! controller. Use [`ClientBuilder`] to configure and create clients.

use crate::{
    api_error::{ErrorCode, StructuredError},
    attempt::Strategy,
    dialer::Dial,
    metadata::{parse_header, RequestBody, RequestMetadata},
    pinned::{PinConfig, PinnedConnection, PinnedDialer},
    retry::{RetryOnRetryable, RetryPredicate},
    Error, Response, Result,
};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use rustls::CertificateError;
use serde::{de::DeserializeOwned, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use url::Url;

/// A client for a cluster controller's JSON API.
///
/// Every request carries the cluster key as HTTP Basic credentials (empty
/// user name), is sent as JSON, and goes over TLS pinned to the cluster's
/// certificate when a pin is configured. Failed requests are retried under
/// the configured [`Strategy`] while the [`RetryPredicate`] allows it.
///
/// Cloning is cheap; clones share the connection pool.
///
/// # Examples
///
/// ```no_run
/// use weo_client::{attempt::Strategy, Client, Response};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct NewApp {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct App {
///     id: String,
///     name: String,
/// }
///
/// # async fn example(pin: Vec<u8>) -> Result<(), weo_client::Error> {
/// let client = Client::builder()
///     .base_url("https://controller.example.com")?
///     .key("cluster-key")
///     .tls_pin(pin)
///     .retry_strategy(Strategy {
///         total: Duration::from_secs(10),
///         delay: Duration::from_millis(500),
///         min: 3,
///     })
///     .build()?;
///
/// let created: Response<App> = client
///     .post("/apps", &NewApp { name: "web".to_string() })
///     .await?;
/// println!("Created app {}", created.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    key: Option<String>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: Url,
    host: Option<HeaderValue>,
    pin: Option<PinConfig>,
    default_headers: HeaderMap,
    retry_strategy: Strategy,
    retry_predicate: Box<dyn RetryPredicate>,
    timeout: Option<Duration>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Replaces the key used to authenticate this client's requests.
    ///
    /// Other clones keep their key.
    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = Some(key.into());
    }

    /// Makes a request with an optional JSON body.
    ///
    /// The body is serialized once and resent as-is on every retry.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use weo_client::{metadata::RequestMetadata, Client};
    /// use http::Method;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Job { id: String, state: String }
    ///
    /// # async fn example(client: Client) -> Result<(), weo_client::Error> {
    /// let metadata = RequestMetadata::new(Method::GET, "/apps/web/jobs")
    ///     .with_query_param("state", "up");
    ///
    /// let jobs = client.call::<(), Vec<Job>>(metadata, None).await?;
    /// println!("{} jobs running", jobs.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(
        &self,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = RequestBody::json(body)?;
        self.send(metadata, body).await
    }

    /// Makes a request whose body is sent verbatim.
    pub async fn call_raw<Res>(
        &self,
        metadata: RequestMetadata,
        data: impl Into<Bytes>,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.send(metadata, RequestBody::raw(data)).await
    }

    /// Sends a prepared body, retrying under the configured strategy.
    ///
    /// When the strategy is exhausted or the predicate declines, the error of
    /// the last attempt is returned.
    pub async fn send<Res>(&self, metadata: RequestMetadata, body: RequestBody) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let mut attempt = self.inner.retry_strategy.start();
        // The first step is forced, so it never reports exhaustion.
        attempt.next().await;

        loop {
            let count = attempt.count();

            let result = match self.execute_request(&metadata, &body, count).await {
                Ok(response) => self.parse_response(response, start_time.elapsed(), count).await,
                Err(e) => Err(e),
            };

            let e = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            tracing::warn!(
                error = %e,
                attempt = count,
                method = %metadata.method,
                path = %metadata.path,
                "Request failed"
            );

            if !self.inner.retry_predicate.should_retry(&e, count) {
                return Err(e);
            }

            if !attempt.next().await {
                tracing::warn!(
                    attempts = count,
                    path = %metadata.path,
                    "Retry strategy exhausted"
                );
                return Err(e);
            }
        }
    }

    /// Builds the HTTP request for `metadata` and `body` without sending it.
    ///
    /// Client default headers apply first and request headers override them.
    /// `Content-Type` defaults to `application/json`; the key, if any, is set
    /// as Basic credentials with an empty user name; the `Host` header is
    /// overridden when the client was built with [`ClientBuilder::host`].
    pub fn prepare_request(
        &self,
        metadata: &RequestMetadata,
        body: &RequestBody,
    ) -> Result<reqwest::Request> {
        let mut url = self.inner.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            metadata.path.trim_start_matches('/')
        );
        url.set_path(&path);

        if !metadata.query_params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &metadata.query_params {
                query.append_pair(key, value);
            }
        }

        let mut headers = self.inner.default_headers.clone();
        headers.extend(metadata.headers.clone());
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(host) = &self.inner.host {
            headers.insert(HOST, host.clone());
        }

        let mut request = self
            .inner
            .http_client
            .request(metadata.method.clone(), url)
            .headers(headers);

        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            request = request.basic_auth("", Some(key));
        }

        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        if let Some(data) = body.bytes() {
            request = request.body(data);
        }

        Ok(request.build()?)
    }

    /// Opens a raw TLS connection to the controller's host and port.
    ///
    /// Used for streaming endpoints that take over the connection. The
    /// peer certificate is checked against the client's pin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the client has no pin or the
    /// base URL has no host, and otherwise whatever
    /// [`PinnedDialer`] returns.
    pub async fn connect(&self) -> Result<PinnedConnection<TcpStream>> {
        let pin = self.inner.pin.clone().ok_or_else(|| {
            Error::ConfigurationError("A TLS pin is required for raw connections".to_string())
        })?;

        let url = &self.inner.base_url;
        let host = url
            .host_str()
            .ok_or_else(|| Error::ConfigurationError("Base URL has no host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::ConfigurationError("Base URL has no port".to_string()))?;

        PinnedDialer::new(pin)
            .dial("tcp", &format!("{host}:{port}"))
            .await
    }

    /// Executes a single request attempt.
    async fn execute_request(
        &self,
        metadata: &RequestMetadata,
        body: &RequestBody,
        attempt: usize,
    ) -> Result<reqwest::Response> {
        let request = self.prepare_request(metadata, body)?;

        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            attempt = attempt,
            "Executing HTTP request"
        );

        self.inner
            .http_client
            .execute(request)
            .await
            .map_err(transport_error)
    }

    /// Decodes a response into `Res`, or into the error it carries.
    async fn parse_response<Res>(
        &self,
        response: reqwest::Response,
        latency: Duration,
        attempts: usize,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let status = response.status();
        let headers = response.headers().clone();

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        if !status.is_success() {
            let raw_response = response.text().await.unwrap_or_default();
            return Err(decode_error(status, raw_response, headers));
        }

        let raw_body = response.text().await?;

        // Empty bodies (e.g. 204) decode like JSON `null`, so `()` works.
        let parsed = if raw_body.trim().is_empty() {
            serde_json::from_str::<Res>("null")
        } else {
            serde_json::from_str::<Res>(&raw_body)
        };

        match parsed {
            Ok(data) => Ok(Response::new(
                data, raw_body, status, headers, latency, attempts,
            )),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PATCH, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.call::<(), Res>(metadata, None).await
    }
}

/// Maps a failed request to the crate error.
///
/// A peer rejected by the pin surfaces from `reqwest` as a connect error; it is
/// reported as [`Error::PinFailure`] so it is never retried.
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout;
    }
    if is_pin_rejection(&e) {
        tracing::error!(error = %e, "Controller certificate does not match the configured pin");
        return Error::PinFailure;
    }
    Error::Network(e)
}

/// Whether `err`'s cause chain holds the rejection raised by the pin verifier.
fn is_pin_rejection(err: &(dyn StdError + 'static)) -> bool {
    let mut cause = Some(err);
    while let Some(err) = cause {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return matches!(
                tls,
                rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
            );
        }
        // `io::Error::source` skips the wrapped error itself.
        if let Some(inner) = err
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            if is_pin_rejection(inner) {
                return true;
            }
        }
        cause = err.source();
    }
    false
}

/// Turns a non-2xx response into an error.
///
/// Structured error bodies become [`Error::Api`]; a 404 without one is
/// reported as a structured `not_found` so callers can test for it uniformly.
fn decode_error(status: StatusCode, raw_response: String, headers: HeaderMap) -> Error {
    if let Ok(err) = serde_json::from_str::<StructuredError>(&raw_response) {
        tracing::warn!(
            status = status.as_u16(),
            code = %err.code,
            message = %err.message,
            retry = err.retry,
            "Controller returned an error"
        );
        return Error::Api(err);
    }

    if status == StatusCode::NOT_FOUND {
        return Error::Api(StructuredError::new(ErrorCode::NotFound, "not found"));
    }

    if status.is_client_error() {
        tracing::error!(
            status = status.as_u16(),
            response = %raw_response,
            "Client error (4xx)"
        );
    } else if status.is_server_error() {
        tracing::warn!(
            status = status.as_u16(),
            response = %raw_response,
            "Server error (5xx)"
        );
    }

    Error::HttpError {
        status,
        raw_response,
        headers,
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// Defaults: one attempt per request ([`Strategy::none`]), retrying only
/// errors for which [`Error::is_retryable`] holds, no timeout, no pin.
pub struct ClientBuilder {
    base_url: Option<Url>,
    key: Option<String>,
    host: Option<HeaderValue>,
    pin: Option<PinConfig>,
    default_headers: HeaderMap,
    retry_strategy: Strategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            key: None,
            host: None,
            pin: None,
            default_headers: HeaderMap::new(),
            retry_strategy: Strategy::none(),
            retry_predicate: None,
            timeout: None,
        }
    }

    /// Sets the controller's base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the cluster key sent as the Basic auth password.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Overrides the `Host` header, for controllers behind a virtual host.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid header value.
    pub fn host(mut self, host: impl AsRef<str>) -> Result<Self> {
        let value = HeaderValue::try_from(host.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid host: {}", e)))?;
        self.host = Some(value);
        Ok(self)
    }

    /// Pins the controller's certificate by its SHA-256 hash.
    pub fn tls_pin(self, pin: impl Into<Vec<u8>>) -> Self {
        self.pin_config(PinConfig::new(pin))
    }

    /// Pins the controller's certificate with full control over the TLS setup.
    pub fn pin_config(mut self, config: PinConfig) -> Self {
        self.pin = Some(config);
        self
    }

    /// Adds a header included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn retry_strategy(mut self, strategy: Strategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets which failures are retried.
    ///
    /// By default, requests are retried based on `Error::is_retryable()`.
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or if the TLS or HTTP
    /// client configuration is invalid.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let mut http_client = reqwest::Client::builder();
        if let Some(pin) = &self.pin {
            if base_url.scheme() != "https" {
                tracing::warn!(
                    base_url = %base_url,
                    "TLS pin configured for a non-HTTPS controller URL; API calls will not be pinned"
                );
            }
            http_client = http_client.use_preconfigured_tls(pin.client_config()?);
        }
        let http_client = http_client.build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let retry_predicate = self
            .retry_predicate
            .unwrap_or_else(|| Box::new(RetryOnRetryable));

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                host: self.host,
                pin: self.pin,
                default_headers: self.default_headers,
                retry_strategy: self.retry_strategy,
                retry_predicate,
                timeout: self.timeout,
            }),
            key: self.key,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
