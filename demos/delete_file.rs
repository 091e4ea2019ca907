//! Example: Uploading and deleting a job file
//!
//! Run with: cargo run --example delete_file -- <host>
//!
//! Writes a small job to the controller, then deletes it again.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use yaskawa_hse::{Client, ClientConfig, HseError};

const NAME: &str = "HSE-DEMO.JBI";
const JOB: &[u8] = b"/JOB\r\n//NAME HSE-DEMO\r\n//POS\r\n///NPOS 0,0,0,0,0,0\r\n//INST\r\n///DATE 2024/01/01 00:00\r\n///ATTR SC,RW\r\n///GROUP1 RB1\r\nNOP\r\nEND\r\n";

#[tokio::main]
async fn main() -> yaskawa_hse::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "10.0.0.2".into());
    let client = Client::new();
    client.connect_with(&ClientConfig::new(host)).await?;

    client
        .write_file(NAME, JOB, Duration::from_secs(1), |sent, total| {
            println!("uploaded {sent}/{total} bytes");
        })
        .await?;

    match client.delete_file(NAME, Duration::from_secs(1)).await {
        Ok(()) => println!("{NAME} deleted"),
        Err(HseError::CommandFailed { status, extra_status }) => {
            println!("delete rejected: status=0x{status:02X}, extra=0x{extra_status:04X}");
        }
        Err(e) => return Err(e),
    }

    client.close();
    Ok(())
}
