//! Example: Reading and writing controller variables
//!
//! Run with: cargo run --example variables -- <host>
//!
//! This example demonstrates:
//! - Connecting with a `ClientConfig`
//! - Writing and reading byte, integer, double and real variables
//! - Installing an error handler for unattributed errors
//!
//! Set `RUST_LOG=yaskawa_hse=trace` to see every datagram.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use yaskawa_hse::{Client, ClientConfig};

const TIMEOUT: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> yaskawa_hse::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "10.0.0.2".into());
    let client = Client::new();
    client.set_error_handler(|error| eprintln!("receive error: {error}"));
    client.connect_with(&ClientConfig::new(host)).await?;

    println!("=== Writing ===\n");
    client.write_byte_variable(5, 0xAB, TIMEOUT).await?;
    client.write_int16_variable(6, -5, TIMEOUT).await?;
    client.write_int32_variable(7, 123_456, TIMEOUT).await?;
    client.write_float32_variable(8, 3.25, TIMEOUT).await?;

    println!("=== Reading ===\n");
    println!("B005 = 0x{:02X}", client.read_byte_variable(5, TIMEOUT).await?);
    println!("I006 = {}", client.read_int16_variable(6, TIMEOUT).await?);
    println!("D007 = {}", client.read_int32_variable(7, TIMEOUT).await?);
    println!("R008 = {}", client.read_float32_variable(8, TIMEOUT).await?);

    // Requests can run concurrently on one client
    let (b, i) = tokio::join!(
        client.read_byte_variable(5, TIMEOUT),
        client.read_int16_variable(6, TIMEOUT)
    );
    println!("\nConcurrent: B005 = {}, I006 = {}", b?, i?);

    client.close();
    Ok(())
}
