//! Certificate-pinned TLS.
//!
//! Clusters are usually reached through a self-signed certificate handed out
//! by the operator, so the usual chain-of-trust checks cannot succeed. Instead
//! the client is configured with a hash of the expected leaf certificate (the
//! pin) and accepts a peer only if its certificate hashes to exactly that
//! value. Traffic is still TLS-encrypted end to end.
//!
//! The pin is enforced in two places:
//!
//! - [`PinConfig::client_config`] builds a rustls configuration that checks
//!   the pin during the handshake. The HTTP [`Client`](crate::Client) uses it
//!   for every API call.
//! - [`PinnedDialer`] opens raw connections for streaming use. It completes
//!   the handshake first, then compares the leaf certificate against the pin
//!   and closes the connection on mismatch.

use crate::dialer::{Dial, RetryDialer, Wire};
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::Digest;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Hash function used to compute certificate pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Hashes `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

/// The expected certificate pin, plus the TLS settings to connect with.
///
/// Immutable once built; clone it freely across dialers and clients.
///
/// ```
/// use weo_client::pinned::{HashAlgorithm, PinConfig};
///
/// let pin = HashAlgorithm::Sha384.digest(b"certificate DER");
/// let config = PinConfig::new(pin)
///     .with_hash(HashAlgorithm::Sha384)
///     .with_server_name("controller.example.com");
///
/// assert!(config.matches(b"certificate DER"));
/// assert!(!config.matches(b"something else"));
/// ```
#[derive(Debug, Clone)]
pub struct PinConfig {
    hash: HashAlgorithm,
    pin: Vec<u8>,
    tls: Option<Arc<ClientConfig>>,
    server_name: Option<String>,
}

impl PinConfig {
    /// Pins the certificate whose hash (SHA-256 unless changed with
    /// [`with_hash`](Self::with_hash)) is `pin`.
    pub fn new(pin: impl Into<Vec<u8>>) -> Self {
        Self {
            hash: HashAlgorithm::default(),
            pin: pin.into(),
            tls: None,
            server_name: None,
        }
    }

    /// Pins exactly the given DER-encoded certificate, using SHA-256.
    pub fn for_certificate(der: &[u8]) -> Self {
        Self::new(HashAlgorithm::Sha256.digest(der))
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Starts from `config` instead of a default rustls configuration.
    ///
    /// Its certificate verifier is always replaced.
    pub fn with_tls_config(mut self, config: ClientConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }

    /// Server name to present during the handshake.
    ///
    /// Defaults to the host part of the dialed address.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn pin(&self) -> &[u8] {
        &self.pin
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// Whether the DER-encoded certificate `der` hashes to the pin.
    pub fn matches(&self, der: &[u8]) -> bool {
        self.hash.digest(der) == self.pin
    }

    /// A client configuration that fails the handshake unless the peer's
    /// leaf certificate matches the pin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the crypto provider supports no usable
    /// protocol version.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.build_config(Some((self.hash, self.pin.clone())))
    }

    /// A client configuration that accepts any certificate, for dialers that
    /// check the pin after the handshake.
    fn handshake_config(&self) -> Result<ClientConfig> {
        self.build_config(None)
    }

    fn build_config(&self, expected: Option<(HashAlgorithm, Vec<u8>)>) -> Result<ClientConfig> {
        match &self.tls {
            Some(base) => {
                let mut config = ClientConfig::clone(base);
                let verifier = PinVerifier {
                    expected,
                    algorithms: config.crypto_provider().signature_verification_algorithms,
                };
                config
                    .dangerous()
                    .set_certificate_verifier(Arc::new(verifier));
                Ok(config)
            }
            None => {
                let provider = Arc::new(rustls::crypto::ring::default_provider());
                let verifier = PinVerifier {
                    expected,
                    algorithms: provider.signature_verification_algorithms,
                };
                Ok(ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth())
            }
        }
    }

    fn server_name_for(&self, addr: &str) -> Result<ServerName<'static>> {
        let host = match &self.server_name {
            Some(name) => name.clone(),
            None => host_of(addr).to_string(),
        };
        ServerName::try_from(host.clone()).map_err(|_| Error::InvalidServerName(host))
    }
}

/// Strips the port and IPv6 brackets from `host:port`.
///
/// A bare IPv6 literal has no port to strip and is returned whole.
fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}

/// Certificate verifier that trusts the pin instead of a CA chain.
///
/// Handshake signatures are still checked, so the peer must hold the key of
/// the certificate it presents.
#[derive(Debug)]
struct PinVerifier {
    expected: Option<(HashAlgorithm, Vec<u8>)>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some((hash, pin)) = &self.expected {
            if hash.digest(end_entity.as_ref()) != *pin {
                tracing::error!("Peer certificate does not match the configured pin");
                return Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ));
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Dials TLS connections and verifies the peer against a [`PinConfig`].
///
/// The raw connection comes from `D`, a [`RetryDialer`] by default.
///
/// ```no_run
/// use weo_client::dialer::Dial;
/// use weo_client::pinned::{PinConfig, PinnedDialer};
///
/// # async fn example(pin: Vec<u8>) -> Result<(), weo_client::Error> {
/// let dialer = PinnedDialer::new(PinConfig::new(pin));
/// let mut conn = dialer.dial("tcp", "controller.example.com:443").await?;
/// conn.close_write().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PinnedDialer<D = RetryDialer> {
    config: PinConfig,
    dialer: D,
}

impl PinnedDialer<RetryDialer> {
    pub fn new(config: PinConfig) -> Self {
        Self::with_dialer(config, RetryDialer::default())
    }
}

impl<D: Dial> PinnedDialer<D> {
    pub fn with_dialer(config: PinConfig, dialer: D) -> Self {
        Self { config, dialer }
    }

    pub fn config(&self) -> &PinConfig {
        &self.config
    }
}

impl<D: Dial> Dial for PinnedDialer<D> {
    type Conn = PinnedConnection<D::Conn>;

    /// Dials `addr`, completes a TLS handshake and checks the pin.
    ///
    /// # Errors
    ///
    /// - whatever the underlying dialer returns,
    /// - [`Error::Handshake`] if the TLS handshake fails,
    /// - [`Error::PinFailure`] if the leaf certificate does not match.
    ///
    /// The raw connection is closed on every error path.
    async fn dial(&self, network: &str, addr: &str) -> Result<PinnedConnection<D::Conn>> {
        let connector = TlsConnector::from(Arc::new(self.config.handshake_config()?));
        let server_name = self.config.server_name_for(addr)?;

        let wire = self.dialer.dial(network, addr).await?;
        let half_close = wire.supports_half_close();

        let mut tls = match connector.connect(server_name, wire).await {
            Ok(tls) => tls,
            Err(e) => {
                tracing::warn!(error = %e, addr = addr, "TLS handshake failed");
                return Err(Error::Handshake(e));
            }
        };

        let pinned = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .is_some_and(|leaf| self.config.matches(leaf));
        if !pinned {
            tracing::error!(addr = addr, "Peer certificate does not match the configured pin");
            // Best effort: the connection is dropped either way.
            let _ = tls.shutdown().await;
            return Err(Error::PinFailure);
        }

        tracing::debug!(addr = addr, "Pinned TLS connection established");
        Ok(PinnedConnection { tls, half_close })
    }
}

/// A TLS connection whose peer matched the configured pin.
#[derive(Debug)]
pub struct PinnedConnection<S> {
    tls: TlsStream<S>,
    half_close: bool,
}

impl<S: Wire> PinnedConnection<S> {
    /// Closes the write direction while keeping the read direction open.
    ///
    /// Pending TLS data is flushed, then the raw transport's write half is
    /// shut down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HalfCloseUnsupported`] if the raw transport cannot
    /// half-close. The connection is left untouched in that case.
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.half_close {
            return Err(Error::HalfCloseUnsupported);
        }
        self.tls.flush().await?;
        self.tls.get_mut().0.shutdown().await?;
        Ok(())
    }

    /// The peer's leaf certificate.
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.tls.get_ref().1.peer_certificates()?.first()
    }

    /// The raw transport underneath the TLS session.
    pub fn wire(&self) -> &S {
        self.tls.get_ref().0
    }

    pub fn into_inner(self) -> TlsStream<S> {
        self.tls
    }
}

impl<S: Wire> Wire for PinnedConnection<S> {
    fn supports_half_close(&self) -> bool {
        self.half_close
    }
}

impl<S: Wire> AsyncRead for PinnedConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().tls).poll_read(cx, buf)
    }
}

impl<S: Wire> AsyncWrite for PinnedConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().tls).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().tls).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.tls.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().tls).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().tls).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("controller.example.com:443"), "controller.example.com");
        assert_eq!(host_of("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(host_of("[::1]:443"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
        assert_eq!(host_of("::1"), "::1");
        assert_eq!(host_of("[fe80::1]"), "fe80::1");
    }

    #[test]
    fn test_server_name_for_bare_ipv6() {
        let config = PinConfig::new(vec![0; 32]);
        let name = config.server_name_for("::1").unwrap();
        assert_eq!(name.to_str(), "::1");
    }

    #[test]
    fn test_server_name_defaults_to_host() {
        let config = PinConfig::new(vec![0; 32]);
        let name = config.server_name_for("controller.example.com:443").unwrap();
        assert_eq!(name.to_str(), "controller.example.com");

        let config = config.with_server_name("override.example.com");
        let name = config.server_name_for("10.0.0.1:443").unwrap();
        assert_eq!(name.to_str(), "override.example.com");
    }

    #[test]
    fn test_invalid_server_name() {
        let config = PinConfig::new(vec![0; 32]).with_server_name("not a hostname");
        let err = config.server_name_for("10.0.0.1:443").unwrap_err();
        assert!(matches!(err, Error::InvalidServerName(_)));
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(HashAlgorithm::Sha256.digest(b"x").len(), 32);
        assert_eq!(HashAlgorithm::Sha384.digest(b"x").len(), 48);
        assert_eq!(HashAlgorithm::Sha512.digest(b"x").len(), 64);
    }

    #[test]
    fn test_matches_uses_configured_hash() {
        let der = b"not really a certificate";
        let config = PinConfig::for_certificate(der);
        assert!(config.matches(der));

        let config = config.with_hash(HashAlgorithm::Sha512);
        assert!(!config.matches(der));
    }

    #[test]
    fn test_client_config_from_base() {
        let base = PinConfig::new(vec![1; 32]).client_config().unwrap();
        let config = PinConfig::new(vec![2; 32]).with_tls_config(base);
        assert!(config.client_config().is_ok());
    }
}
