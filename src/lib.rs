//! # weo-client - Client plumbing for a cluster controller
//!
//! This crate holds the pieces the CLI and services use to talk to a
//! cluster's controller:
//!
//! - [`attempt`]: deadline-bounded retry loops with a minimum attempt count.
//! - [`dialer`] and [`pinned`]: raw connections, retried, optionally wrapped
//!   in TLS that trusts a pinned certificate hash instead of a CA chain.
//! - [`api_error`] and [`respond`]: the structured JSON error model shared by
//!   both sides of the API, and the server-side helpers that emit it.
//! - [`Client`]: a JSON client over `reqwest` that authenticates with the
//!   cluster key, retries transient failures and decodes structured errors.
//!
//! ## Quick Start
//!
//! ```no_run
//! use weo_client::{api_error, config::ClusterConfig, Error};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct NewApp {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct App {
//!     id: String,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let cluster = ClusterConfig {
//!         name: "default".to_string(),
//!         key: "e09dc5301d72be755a3d666f617c4600".to_string(),
//!         tls_pin: Some("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=".to_string()),
//!         controller_url: "https://controller.example.com".to_string(),
//!     };
//!     let client = cluster.client()?;
//!
//!     match client.get::<App>("/apps/web").await {
//!         Ok(app) => println!("found {} ({})", app.name, app.id),
//!         Err(e) if api_error::is_not_found_error(&e) => {
//!             let app = client
//!                 .post::<_, App>("/apps", &NewApp { name: "web".to_string() })
//!                 .await?;
//!             println!("created {}", app.id);
//!         }
//!         Err(e) => return Err(e),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Controller failures arrive as [`StructuredError`]s with a machine-readable
//! code. Anything else keeps the raw response for debugging:
//!
//! ```no_run
//! use weo_client::{Client, Error};
//!
//! # async fn example(client: Client) -> Result<(), Error> {
//! match client.get::<serde_json::Value>("/apps").await {
//!     Ok(response) => println!("{}", response.data),
//!     Err(Error::Api(err)) => eprintln!("{} (retry: {})", err, err.retry),
//!     Err(Error::HttpError { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retries
//!
//! ```no_run
//! use weo_client::{attempt::Strategy, retry::RetryOnConnectionError, Client};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), weo_client::Error> {
//! let client = Client::builder()
//!     .base_url("https://controller.example.com")?
//!     .retry_strategy(Strategy {
//!         total: Duration::from_secs(30),
//!         delay: Duration::from_secs(1),
//!         min: 3,
//!     })
//!     .retry_predicate(Box::new(RetryOnConnectionError))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod api_error;
pub mod attempt;
mod client;
pub mod config;
pub mod dialer;
mod error;
pub mod metadata;
pub mod pinned;
pub mod respond;
mod response;
pub mod retry;

pub use api_error::{ErrorCode, StructuredError};
pub use attempt::Strategy;
pub use client::{Client, ClientBuilder};
pub use error::{Error, Result, StorageFailure};
pub use response::Response;
pub use retry::RetryPredicate;
