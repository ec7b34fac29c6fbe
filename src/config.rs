//! Cluster connection settings.

use crate::{Client, ClientBuilder, Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Everything needed to reach one cluster's controller.
///
/// This is the shape of a cluster entry in the CLI configuration file:
///
/// ```
/// use weo_client::config::ClusterConfig;
///
/// let cluster: ClusterConfig = serde_json::from_str(r#"{
///     "name": "default",
///     "key": "e09dc5301d72be755a3d666f617c4600",
///     "tls_pin": "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
///     "controller_url": "https://controller.example.com"
/// }"#).unwrap();
///
/// assert_eq!(cluster.pin().unwrap().unwrap().len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,

    pub key: String,

    /// Standard base64 of the controller certificate's SHA-256 hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_pin: Option<String>,

    pub controller_url: String,
}

impl ClusterConfig {
    /// Decodes the certificate pin, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `tls_pin` is not valid base64.
    pub fn pin(&self) -> Result<Option<Vec<u8>>> {
        let Some(pin) = self.tls_pin.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        STANDARD.decode(pin).map(Some).map_err(|e| {
            Error::ConfigurationError(format!("Invalid TLS pin for cluster {}: {}", self.name, e))
        })
    }

    /// A builder preloaded with this cluster's URL, key and pin.
    pub fn builder(&self) -> Result<ClientBuilder> {
        let mut builder = Client::builder()
            .base_url(&self.controller_url)?
            .key(&self.key);
        if let Some(pin) = self.pin()? {
            builder = builder.tls_pin(pin);
        }
        Ok(builder)
    }

    /// Builds a client with default retry and timeout settings.
    pub fn client(&self) -> Result<Client> {
        self.builder()?.build()
    }
}
