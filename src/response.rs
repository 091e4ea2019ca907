//! Response header decoding and validation.
//!
//! # Response Header Structure
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `YERC` |
//! | 4 | 2 | Header size (must be 32) |
//! | 6 | 2 | Payload size (at most 479) |
//! | 8 | 1 | Reserved |
//! | 9 | 1 | Processing division |
//! | 10 | 1 | ACK (must be 1) |
//! | 11 | 1 | Request ID |
//! | 12 | 4 | Block number |
//! | 16 | 8 | Reserved |
//! | 24 | 1 | Service |
//! | 25 | 1 | Status (0 = success) |
//! | 26 | 2 | Added status size (ignored) |
//! | 28 | 2 | Extra status |
//! | 30 | 2 | Padding |
//!
//! Decoding is total: any input that does not hold a valid header yields
//! [`HseError::MalformedResponse`] instead of reading out of bounds.
//!
//! # Example
//!
//! ```
//! use yaskawa_hse::ResponseHeader;
//!
//! let mut datagram = Vec::new();
//! datagram.extend_from_slice(b"YERC");
//! datagram.extend_from_slice(&[0x20, 0x00, 0x02, 0x00, 0x03, 0x01, 0x01, 0x05]);
//! datagram.extend_from_slice(&0x8000_0000u32.to_le_bytes());
//! datagram.extend_from_slice(b"99999999");
//! datagram.extend_from_slice(&[0x8E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
//! datagram.extend_from_slice(b"ok");
//!
//! let header = ResponseHeader::from_datagram(&datagram).unwrap();
//! assert_eq!(header.request_id, 5);
//! assert!(header.is_success());
//! assert_eq!(header.payload(&datagram), b"ok");
//! ```

use crate::error::{HseError, Result};
use crate::header::{Division, HEADER_SIZE, LAST_BLOCK, MAGIC, MAX_PAYLOAD_SIZE};
use crate::utils::{le_u16, le_u32};

/// Decoded response header.
///
/// The header is a plain value; the payload stays in the datagram it was
/// parsed from and is only valid as long as that buffer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResponseHeader {
    /// Number of payload bytes following the header.
    pub payload_size: u16,
    /// Processing division echoed by the controller.
    pub division: Division,
    /// Request ID of the request this reply belongs to.
    pub request_id: u8,
    /// Block number (bit 31 marks the last block).
    pub block_number: u32,
    /// Service code echoed by the controller (request service + 0x80).
    pub service: u8,
    /// Status (0 = success).
    pub status: u8,
    /// Extra status giving details for a failed status.
    pub extra_status: u16,
}

impl ResponseHeader {
    /// Decodes a header from the leading bytes of a datagram.
    ///
    /// Only the first [`HEADER_SIZE`] bytes are inspected; the payload is not
    /// required to be present.
    ///
    /// # Errors
    ///
    /// Returns `HseError::MalformedResponse` if the input is truncated or any
    /// fixed field has an unexpected value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(HseError::malformed(format!(
                "response too short: expected at least {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        if &data[0..4] != MAGIC {
            return Err(HseError::malformed(
                "response does not start with magic bytes `YERC'",
            ));
        }

        let header_size = le_u16(data, 4);
        if usize::from(header_size) != HEADER_SIZE {
            return Err(HseError::malformed(format!(
                "header size is {header_size}, expected {HEADER_SIZE}"
            )));
        }

        let payload_size = le_u16(data, 6);
        if usize::from(payload_size) > MAX_PAYLOAD_SIZE {
            return Err(HseError::malformed(format!(
                "payload size {payload_size} exceeds the maximum of {MAX_PAYLOAD_SIZE}"
            )));
        }

        let division = Division::from_code(data[9])?;

        if data[10] != 1 {
            return Err(HseError::malformed(format!(
                "ACK value is {}, expected 1",
                data[10]
            )));
        }

        Ok(Self {
            payload_size,
            division,
            request_id: data[11],
            block_number: le_u32(data, 12),
            service: data[24],
            status: data[25],
            extra_status: le_u16(data, 28),
        })
    }

    /// Decodes a header and checks that the datagram length matches it.
    ///
    /// # Errors
    ///
    /// Returns `HseError::MalformedResponse` if [`parse`](Self::parse) fails or
    /// the datagram does not hold exactly the announced payload.
    pub fn from_datagram(datagram: &[u8]) -> Result<Self> {
        let header = Self::parse(datagram)?;
        let expected = HEADER_SIZE + usize::from(header.payload_size);
        if datagram.len() != expected {
            return Err(HseError::malformed(format!(
                "request {}: number of received bytes ({}) does not match the message size according to the header ({})",
                header.request_id,
                datagram.len(),
                expected
            )));
        }
        Ok(header)
    }

    /// Returns the payload part of the datagram this header was decoded from.
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        let end = (HEADER_SIZE + usize::from(self.payload_size)).min(datagram.len());
        &datagram[HEADER_SIZE.min(end)..end]
    }

    /// Returns whether the controller reported success.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Returns an error if the controller reported a failure.
    ///
    /// # Errors
    ///
    /// Returns `HseError::CommandFailed` carrying status and extra status.
    pub fn check_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HseError::command_failed(self.status, self.extra_status))
        }
    }

    /// Block index without the last-block flag.
    pub fn block_index(&self) -> u32 {
        self.block_number & !LAST_BLOCK
    }

    /// Returns whether this is the last block of a transfer.
    pub fn is_last_block(&self) -> bool {
        self.block_number & LAST_BLOCK != 0
    }
}
