//! Example demonstrating deadline-bounded retries.
//!
//! This example shows how to:
//! - Run any fallible operation under an attempt `Strategy`
//! - Stop early with a validator
//! - Configure the client's retry strategy and predicate
//!
//! Run with: `cargo run --example retry_strategy`

use std::time::{Duration, Instant};
use weo_client::attempt::Strategy;
use weo_client::dialer::{Dial, RetryDialer};
use weo_client::retry::{OrPredicate, RetryOnConnectionError, RetryOnRetryable};
use weo_client::{Client, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("weo_client=debug,retry_strategy=info")
        .init();

    println!("=== Example 1: At least 3 attempts, at most 1s ===");
    let strategy = Strategy {
        total: Duration::from_secs(1),
        delay: Duration::from_millis(200),
        min: 3,
    };
    let start = Instant::now();
    let mut calls = 0;
    let result: Result<(), String> = strategy
        .run(|| {
            calls += 1;
            let call = calls;
            async move { Err(format!("attempt {call} failed")) }
        })
        .await;
    println!("{:?} after {} calls in {:?}", result, calls, start.elapsed());

    println!("\n=== Example 2: Validator stops on a fatal error ===");
    let mut calls = 0;
    let result: Result<(), &str> = strategy
        .run_with_validator(
            || {
                calls += 1;
                let err = if calls < 2 { "busy" } else { "forbidden" };
                async move { Err(err) }
            },
            |err| *err == "busy",
        )
        .await;
    println!("{:?} after {} calls", result, calls);

    println!("\n=== Example 3: Dialing a closed port ===");
    let dialer = RetryDialer::new(Strategy {
        total: Duration::from_millis(500),
        delay: Duration::from_millis(100),
        min: 2,
    });
    match dialer.dial("tcp", "127.0.0.1:1").await {
        Ok(_) => println!("Connected?"),
        Err(e) => println!("Gave up: {} (retryable: {})", e, e.is_retryable()),
    }

    println!("\n=== Example 4: Client retrying transient failures ===");
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")?
        .retry_strategy(Strategy {
            total: Duration::from_secs(2),
            delay: Duration::from_millis(250),
            min: 2,
        })
        .retry_predicate(Box::new(OrPredicate::new(vec![
            Box::new(RetryOnConnectionError),
            Box::new(RetryOnRetryable),
        ])))
        .build()?;

    match client.get::<serde_json::Value>("/apps").await {
        Ok(response) => println!("Got {} after {} attempts", response.data, response.attempts),
        Err(e) => println!("Failed: {}", e),
    }

    Ok(())
}
