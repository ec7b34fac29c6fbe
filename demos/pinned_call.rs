//! Example talking to a controller through a pinned certificate.
//!
//! This example shows how to:
//! - Load a cluster entry with a base64 TLS pin
//! - List apps over a pinned HTTPS connection
//! - Branch on structured controller errors
//! - Open a raw pinned connection and half-close it
//!
//! Set `WEO_CONTROLLER_URL`, `WEO_KEY` and `WEO_TLS_PIN`, then run with:
//! `cargo run --example pinned_call`

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use weo_client::api_error;
use weo_client::config::ClusterConfig;
use weo_client::Error;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct App {
    id: String,
    name: String,
}

fn env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::ConfigurationError(format!("{name} is not set")))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("weo_client=debug,pinned_call=info")
        .init();

    let cluster = ClusterConfig {
        name: "default".to_string(),
        key: env("WEO_KEY")?,
        tls_pin: Some(env("WEO_TLS_PIN")?),
        controller_url: env("WEO_CONTROLLER_URL")?,
    };
    let client = cluster.client()?;

    println!("=== Listing apps ===");
    let apps = client.get::<Vec<App>>("/apps").await?;
    for app in apps.iter() {
        println!("  {} ({})", app.name, app.id);
    }
    println!("Took {:?}", apps.latency);

    println!("\n=== Looking up a missing app ===");
    match client.get::<App>("/apps/does-not-exist").await {
        Ok(app) => println!("Unexpectedly found {:?}", app.data),
        Err(e) if api_error::is_not_found_error(&e) => println!("Not found, as expected"),
        Err(Error::PinFailure) => {
            eprintln!("Controller certificate does not match the pin!");
            return Err(Error::PinFailure);
        }
        Err(e) => return Err(e),
    }

    println!("\n=== Raw pinned connection ===");
    let mut conn = client.connect().await?;
    conn.write_all(b"GET /ping HTTP/1.1\r\nHost: controller\r\nConnection: close\r\n\r\n")
        .await?;
    conn.close_write().await?;

    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).await?;
    println!("{}", String::from_utf8_lossy(&reply));

    Ok(())
}
