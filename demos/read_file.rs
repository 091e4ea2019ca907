//! Example: Listing and downloading job files
//!
//! Run with: cargo run --example read_file -- <host> [pattern]
//!
//! Every matching file is downloaded and written to the current directory.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use yaskawa_hse::{Client, ClientConfig};

const TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "10.0.0.2".into());
    let pattern = args.next().unwrap_or_else(|| "*.JBI".into());

    let client = Client::new();
    client.connect_with(&ClientConfig::new(host)).await?;

    let files = client.read_file_list(&pattern, TIMEOUT, |_| {}).await?;
    println!("{} files match {pattern}", files.len());

    for name in files {
        let data = client
            .read_file(&name, TIMEOUT, |received| {
                tracing::debug!(name = %name, received, "downloading");
            })
            .await?;
        std::fs::write(&name, &data)?;
        println!("{name}: {} bytes", data.len());
    }

    client.close();
    Ok(())
}
