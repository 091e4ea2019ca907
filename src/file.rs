//! Multi-datagram file transfers.
//!
//! File list, file read and file write exchange several datagrams under a
//! single request ID. Each transfer registers one streaming handler for its
//! request ID, forwards every reply to the waiting operation and removes the
//! registration when the operation ends, whatever the outcome.
//!
//! # Block Numbering
//!
//! Data blocks are numbered from 1. Bit 31 of the block number marks the last
//! block of a transfer. The receiving side acknowledges every block with an
//! ack header carrying the block number.
//!
//! The timeout passed to each operation applies to every awaited datagram,
//! not to the transfer as a whole.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::client::{Client, Registration};
use crate::command::{
    check_file_name, SERVICE_READ_FILE, SERVICE_READ_FILE_LIST, SERVICE_WRITE_FILE,
};
use crate::error::{HseError, Result};
use crate::header::{RequestHeader, LAST_BLOCK, MAX_PAYLOAD_SIZE};
use crate::response::ResponseHeader;
use crate::transport::DatagramSocket;
use crate::utils::parse_file_list;

/// One multi-datagram exchange under a single request ID.
struct Transfer<'a, S: DatagramSocket> {
    client: &'a Client<S>,
    request_id: u8,
    service: u8,
    timeout: Duration,
    replies: mpsc::UnboundedReceiver<(ResponseHeader, Vec<u8>)>,
    _registration: Registration<'a, S>,
}

impl<'a, S: DatagramSocket> Transfer<'a, S> {
    fn start(client: &'a Client<S>, service: u8, timeout: Duration) -> Result<Self> {
        let (tx, replies) = mpsc::unbounded_channel();
        let token = client.register_next_with(move |_| {
            move |header: &ResponseHeader, payload: &[u8]| {
                let _ = tx.send((*header, payload.to_vec()));
            }
        })?;

        Ok(Self {
            client,
            request_id: token.request_id(),
            service,
            timeout,
            replies,
            _registration: Registration { client, token },
        })
    }

    async fn send(&self, block_number: u32, payload: &[u8]) -> Result<()> {
        self.send_as(self.service, block_number, false, payload).await
    }

    /// Acknowledges a received block. Acks always carry the file read service.
    async fn ack(&self, block_number: u32) -> Result<()> {
        self.send_as(SERVICE_READ_FILE, block_number, true, &[]).await
    }

    async fn send_as(&self, service: u8, block_number: u32, ack: bool, payload: &[u8]) -> Result<()> {
        let datagram =
            RequestHeader::file(service, self.request_id, block_number, ack).encode(payload)?;
        trace!(
            request_id = self.request_id,
            service,
            block_number,
            ack,
            size = payload.len(),
            "sending block"
        );
        self.client.send(&datagram).await
    }

    /// Waits for the next successful reply.
    async fn next_reply(&mut self, waiting_for: &str) -> Result<(ResponseHeader, Vec<u8>)> {
        let (header, payload) = match tokio::time::timeout(self.timeout, self.replies.recv()).await {
            Ok(Some(reply)) => reply,
            // The handler is only dropped when the client closes.
            Ok(None) => return Err(HseError::Closed),
            Err(_) => {
                return Err(HseError::timeout(format!(
                    "{waiting_for} of request {}",
                    self.request_id
                )))
            }
        };
        header.check_status()?;
        Ok((header, payload))
    }

    /// Waits for a reply to block `expected`.
    async fn expect_block(&mut self, expected: u32) -> Result<(ResponseHeader, Vec<u8>)> {
        let (header, payload) = self.next_reply(&format!("block {expected}")).await?;
        if header.block_index() != expected {
            return Err(HseError::UnexpectedBlock {
                expected,
                received: header.block_index(),
            });
        }
        Ok((header, payload))
    }
}

impl<S: DatagramSocket> Client<S> {
    /// Reads the list of files matching `pattern`, e.g. `"*.JBI"`.
    ///
    /// `on_progress` is called with the number of list bytes received so far.
    ///
    /// # Errors
    ///
    /// - `HseError::InvalidParameter` if the pattern is empty, not ASCII or too long
    /// - `HseError::CommandFailed` if the controller rejected the request
    /// - `HseError::UnexpectedBlock` if a block arrived out of sequence
    /// - `HseError::Timeout` if any block did not arrive within `timeout`
    pub async fn read_file_list(
        &self,
        pattern: &str,
        timeout: Duration,
        on_progress: impl FnMut(usize) + Send,
    ) -> Result<Vec<String>> {
        check_file_name("pattern", pattern)?;
        let data = self
            .read_blocks(SERVICE_READ_FILE_LIST, pattern, timeout, on_progress)
            .await?;
        Ok(parse_file_list(&data))
    }

    /// Reads the contents of a file from the controller.
    ///
    /// `on_progress` is called with the number of bytes received so far.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use yaskawa_hse::Client;
    /// # use std::time::Duration;
    /// # async fn example(client: Client) -> yaskawa_hse::Result<()> {
    /// let job = client
    ///     .read_file("MAIN.JBI", Duration::from_secs(1), |received| {
    ///         println!("{received} bytes");
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`read_file_list`](Self::read_file_list).
    pub async fn read_file(
        &self,
        name: &str,
        timeout: Duration,
        on_progress: impl FnMut(usize) + Send,
    ) -> Result<Vec<u8>> {
        check_file_name("name", name)?;
        self.read_blocks(SERVICE_READ_FILE, name, timeout, on_progress)
            .await
    }

    /// Writes a file to the controller.
    ///
    /// The name is sent first, then the data in blocks of at most
    /// [`MAX_PAYLOAD_SIZE`] bytes. Every block waits for the controller's ack.
    /// `on_progress` is called with the bytes sent so far and the total size.
    ///
    /// # Errors
    ///
    /// - `HseError::InvalidParameter` if the name is invalid or the data too large
    /// - `HseError::CommandFailed` if the controller rejected a block
    /// - `HseError::UnexpectedBlock` if an ack carried the wrong block number
    /// - `HseError::Timeout` if any ack did not arrive within `timeout`
    pub async fn write_file(
        &self,
        name: &str,
        data: &[u8],
        timeout: Duration,
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> Result<()> {
        check_file_name("name", name)?;
        let blocks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(MAX_PAYLOAD_SIZE).collect()
        };
        if blocks.len() >= LAST_BLOCK as usize {
            return Err(HseError::invalid_parameter(
                "data",
                format!("{} bytes do not fit in one transfer", data.len()),
            ));
        }

        let mut transfer = Transfer::start(self, SERVICE_WRITE_FILE, timeout)?;
        debug!(request_id = transfer.request_id, name, size = data.len(), "writing file");
        transfer.send(0, name.as_bytes()).await?;
        transfer.expect_block(0).await?;

        let total = data.len();
        let mut sent = 0;
        for (index, block) in blocks.iter().enumerate() {
            let block_index = index as u32 + 1;
            let block_number = if index + 1 == blocks.len() {
                block_index | LAST_BLOCK
            } else {
                block_index
            };
            transfer.send(block_number, block).await?;
            transfer.expect_block(block_index).await?;

            sent += block.len();
            on_progress(sent, total);
        }

        debug!(request_id = transfer.request_id, name, "file written");
        Ok(())
    }

    async fn read_blocks(
        &self,
        service: u8,
        request: &str,
        timeout: Duration,
        mut on_progress: impl FnMut(usize) + Send,
    ) -> Result<Vec<u8>> {
        let mut transfer = Transfer::start(self, service, timeout)?;
        debug!(request_id = transfer.request_id, service, request, "reading file data");
        transfer.send(0, request.as_bytes()).await?;

        let mut data = Vec::new();
        let mut expected = 1;
        loop {
            let (header, payload) = transfer.expect_block(expected).await?;
            transfer.ack(expected).await?;

            data.extend_from_slice(&payload);
            on_progress(data.len());
            if header.is_last_block() {
                debug!(request_id = transfer.request_id, size = data.len(), "file data received");
                return Ok(data);
            }
            expected += 1;
        }
    }
}
