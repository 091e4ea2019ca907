//! # Yaskawa High Speed Ethernet Server Client
//!
//! An asynchronous Rust library for communicating with Yaskawa robot
//! controllers over the High Speed Ethernet Server (HSE) UDP protocol.
//!
//! The core of the library is a session that owns one connected UDP socket,
//! keeps a single receive outstanding and routes every reply to the handler
//! registered for its request ID. Commands, file transfers and variable
//! access are built on top of that routing.
//!
//! ## Features
//!
//! - **Async**: built on tokio, many requests in flight on one socket
//! - **Demultiplexed**: replies are routed by request ID, streaming replies included
//! - **Explicit**: no retries, caching or reconnection
//! - **No panics**: all errors returned as `Result<T, HseError>`
//! - **Observable**: unattributed errors go to an optional error handler,
//!   everything else is traced with `tracing`
//!
//! ## Quick Start
//!
//! ```no_run
//! use yaskawa_hse::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> yaskawa_hse::Result<()> {
//!     let client = Client::new();
//!     client.connect_with(&ClientConfig::new("10.0.0.2")).await?;
//!
//!     // Read and write a real variable (R008)
//!     client.write_float32_variable(8, 1.5, Duration::from_millis(200)).await?;
//!     let value = client.read_float32_variable(8, Duration::from_millis(200)).await?;
//!     println!("R008 = {value}");
//!
//!     // List jobs on the controller
//!     let jobs = client.read_file_list("*.JBI", Duration::from_secs(1), |_| {}).await?;
//!     println!("{jobs:?}");
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Operations
//!
//! | Operation | Division | Service | Datagrams |
//! |-----------|----------|---------|-----------|
//! | [`Client::read_variable`] | Robot | 0x0E | 1 request, 1 reply |
//! | [`Client::write_variable`] | Robot | 0x10 | 1 request, 1 reply |
//! | [`Client::delete_file`] | File | 0x09 | 1 request, 1 reply |
//! | [`Client::read_file_list`] | File | 0x32 | 1 request, N blocks + acks |
//! | [`Client::read_file`] | File | 0x16 | 1 request, N blocks + acks |
//! | [`Client::write_file`] | File | 0x15 | N blocks, each acked |
//!
//! ## Custom Exchanges
//!
//! Replies are routed by request ID to handlers registered on the client.
//! A handler sees every matching datagram until it is removed:
//!
//! ```no_run
//! use yaskawa_hse::{Client, RequestHeader, Division};
//!
//! # async fn example(client: Client) -> yaskawa_hse::Result<()> {
//! let id = client.next_request_id();
//! let token = client.register_handler(id, |header, payload| {
//!     println!("block {} with {} bytes", header.block_index(), payload.len());
//! })?;
//!
//! let request = RequestHeader::new(Division::Robot, 0x72, 1, 0, 0x01, id).encode(&[])?;
//! client.send(&request).await?;
//!
//! // ... later, when the exchange is complete or abandoned
//! client.remove_handler(token);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Errors belonging to a request are returned by its operation. Errors that
//! belong to no pending request are passed to the error handler:
//!
//! ```no_run
//! use yaskawa_hse::{Client, HseError};
//! use std::time::Duration;
//!
//! # async fn example(client: Client) {
//! client.set_error_handler(|error| eprintln!("receive: {error}"));
//!
//! match client.read_int32_variable(3, Duration::from_millis(200)).await {
//!     Ok(value) => println!("D003 = {value}"),
//!     Err(HseError::Timeout { waiting_for }) => println!("no answer: {waiting_for}"),
//!     Err(HseError::CommandFailed { status, extra_status }) => {
//!         println!("rejected: status=0x{status:02X}, extra=0x{extra_status:04X}");
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Logging
//!
//! The library emits `tracing` events: `debug` for lifecycle and unattributed
//! errors, `trace` for every datagram. Install any subscriber to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod client;
mod command;
mod error;
mod file;
mod header;
mod registry;
mod response;
mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

// Public re-exports
pub use client::{Client, ClientConfig, ErrorHandler};
pub use command::{Command, DeleteFile, ReadVariable, Variable, WriteVariable};
pub use error::{HseError, Result};
pub use header::{
    Division, RequestHeader, HEADER_SIZE, LAST_BLOCK, MAGIC, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE,
};
pub use registry::{HandlerToken, ReplyHandler};
pub use response::ResponseHeader;
pub use transport::{DatagramSocket, UdpTransport, DEFAULT_HSE_PORT, DEFAULT_TIMEOUT};
