//! Raw transport dialing.
//!
//! [`Dial`] is the seam the pinned TLS dialer builds on. [`RetryDialer`] is
//! the default implementation: plain TCP, retried under an
//! [`attempt::Strategy`](crate::attempt::Strategy).

use crate::attempt::Strategy;
use crate::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream a connection can be layered on.
///
/// Implementations declare up front whether shutting down their write half
/// leaves the read half usable.
pub trait Wire: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Whether `shutdown` closes only the write direction.
    fn supports_half_close(&self) -> bool {
        false
    }
}

impl Wire for TcpStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

#[cfg(unix)]
impl Wire for tokio::net::UnixStream {
    fn supports_half_close(&self) -> bool {
        true
    }
}

/// Opens raw connections.
pub trait Dial: Send + Sync {
    type Conn: Wire;

    /// Connects to `addr` (`host:port`) over `network`.
    fn dial(&self, network: &str, addr: &str) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// TCP dialer that retries failed connects.
///
/// Supports the `tcp`, `tcp4` and `tcp6` networks.
#[derive(Debug, Clone, Copy)]
pub struct RetryDialer {
    strategy: Strategy,
}

impl RetryDialer {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    async fn connect_once(network: Network, addr: &str) -> std::io::Result<TcpStream> {
        if network == Network::Any {
            return TcpStream::connect(addr).await;
        }

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr)
            .await?
            .filter(|a| network.accepts(a))
            .collect();
        if candidates.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no {} address for {addr}", network.as_str()),
            ));
        }
        TcpStream::connect(candidates.as_slice()).await
    }
}

impl Default for RetryDialer {
    fn default() -> Self {
        Self::new(Strategy {
            total: Duration::from_secs(5),
            delay: Duration::from_millis(200),
            min: 5,
        })
    }
}

impl Dial for RetryDialer {
    type Conn = TcpStream;

    async fn dial(&self, network: &str, addr: &str) -> Result<TcpStream> {
        let network = Network::parse(network)?;

        let stream = self
            .strategy
            .run(|| async move {
                Self::connect_once(network, addr).await.inspect_err(|e| {
                    tracing::debug!(error = %e, addr = addr, "Dial attempt failed");
                })
            })
            .await?;

        // Request/response traffic; don't hold small writes back.
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Network {
    Any,
    V4,
    V6,
}

impl Network {
    fn parse(network: &str) -> Result<Self> {
        match network {
            "tcp" => Ok(Network::Any),
            "tcp4" => Ok(Network::V4),
            "tcp6" => Ok(Network::V6),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }

    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Any => true,
            Network::V4 => addr.is_ipv4(),
            Network::V6 => addr.is_ipv6(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Network::Any => "tcp",
            Network::V4 => "tcp4",
            Network::V6 => "tcp6",
        }
    }
}
