//! Request header structure and wire constants.
//!
//! Every datagram exchanged with the High Speed Ethernet Server starts with a
//! fixed 32-byte header. All multi-byte fields are little-endian.
//!
//! # Request Header Structure
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `YERC` |
//! | 4 | 2 | Header size (always 32) |
//! | 6 | 2 | Payload size |
//! | 8 | 1 | Reserved (always 3) |
//! | 9 | 1 | Processing division |
//! | 10 | 1 | ACK (0 = request, 1 = acknowledgement) |
//! | 11 | 1 | Request ID |
//! | 12 | 4 | Block number |
//! | 16 | 8 | Reserved (`99999999`) |
//! | 24 | 2 | Command number |
//! | 26 | 2 | Instance |
//! | 28 | 1 | Attribute |
//! | 29 | 1 | Service |
//! | 30 | 2 | Padding |
//!
//! # Example
//!
//! ```
//! use yaskawa_hse::{Division, RequestHeader, HEADER_SIZE};
//!
//! let header = RequestHeader::new(Division::Robot, 0x7A, 5, 1, 0x0E, 1);
//! let bytes = header.to_bytes(0);
//! assert_eq!(bytes.len(), HEADER_SIZE);
//! assert_eq!(&bytes[..4], b"YERC");
//! ```

use crate::error::{HseError, Result};

/// Header size in bytes, identical for requests and responses.
pub const HEADER_SIZE: usize = 32;

/// Maximum payload size of a single datagram.
pub const MAX_PAYLOAD_SIZE: usize = 479;

/// Maximum size of a complete datagram.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Magic bytes at the start of every datagram.
pub const MAGIC: &[u8; 4] = b"YERC";

/// Flag in the block number marking the last block of a transfer.
pub const LAST_BLOCK: u32 = 0x8000_0000;

const RESERVED: u8 = 3;
const RESERVED_BLOCK: &[u8; 8] = b"99999999";

/// Processing division of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Division {
    /// Robot control: variables, status, positions.
    Robot = 1,
    /// File control: list, read, write, delete.
    File = 2,
}

impl Division {
    /// Returns the wire code of the division.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parses a division from its wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Robot),
            2 => Ok(Self::File),
            other => Err(HseError::malformed(format!(
                "unknown processing division {other}, expected 1 or 2"
            ))),
        }
    }
}

impl std::fmt::Display for Division {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Robot => f.write_str("robot"),
            Self::File => f.write_str("file"),
        }
    }
}

/// Header of an outbound request or block acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Processing division.
    pub division: Division,
    /// True for acknowledgements of received file blocks.
    pub ack: bool,
    /// Request ID used to correlate replies.
    pub request_id: u8,
    /// Block number (bit 31 marks the last block).
    pub block_number: u32,
    /// Command number.
    pub command: u16,
    /// Command instance.
    pub instance: u16,
    /// Command attribute.
    pub attribute: u8,
    /// Service code.
    pub service: u8,
}

impl RequestHeader {
    /// Creates a header for a plain request (not an ack, block number 0).
    ///
    /// # Example
    ///
    /// ```
    /// use yaskawa_hse::{Division, RequestHeader};
    ///
    /// let header = RequestHeader::new(Division::File, 0x00, 0, 0, 0x09, 3);
    /// assert!(!header.ack);
    /// assert_eq!(header.block_number, 0);
    /// ```
    pub fn new(
        division: Division,
        command: u16,
        instance: u16,
        attribute: u8,
        service: u8,
        request_id: u8,
    ) -> Self {
        Self {
            division,
            ack: false,
            request_id,
            block_number: 0,
            command,
            instance,
            attribute,
            service,
        }
    }

    /// Creates a file control header with the given block number.
    pub fn file(service: u8, request_id: u8, block_number: u32, ack: bool) -> Self {
        Self {
            block_number,
            ack,
            ..Self::new(Division::File, 0, 0, 0, service, request_id)
        }
    }

    /// Serializes the header for a payload of `payload_size` bytes.
    pub fn to_bytes(&self, payload_size: u16) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(MAGIC);
        bytes[4..6].copy_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        bytes[6..8].copy_from_slice(&payload_size.to_le_bytes());
        bytes[8] = RESERVED;
        bytes[9] = self.division.code();
        bytes[10] = u8::from(self.ack);
        bytes[11] = self.request_id;
        bytes[12..16].copy_from_slice(&self.block_number.to_le_bytes());
        bytes[16..24].copy_from_slice(RESERVED_BLOCK);
        bytes[24..26].copy_from_slice(&self.command.to_le_bytes());
        bytes[26..28].copy_from_slice(&self.instance.to_le_bytes());
        bytes[28] = self.attribute;
        bytes[29] = self.service;
        bytes
    }

    /// Serializes the header followed by `payload` into one datagram.
    ///
    /// # Errors
    ///
    /// Returns `HseError::InvalidParameter` if the payload exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(HseError::invalid_parameter(
                "payload",
                format!(
                    "{} bytes exceeds the maximum of {}",
                    payload.len(),
                    MAX_PAYLOAD_SIZE
                ),
            ));
        }

        let mut datagram = Vec::with_capacity(HEADER_SIZE + payload.len());
        datagram.extend_from_slice(&self.to_bytes(payload.len() as u16));
        datagram.extend_from_slice(payload);
        Ok(datagram)
    }
}
