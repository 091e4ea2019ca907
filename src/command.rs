//! Command structures and serialization.
//!
//! A [`Command`] is a single-shot exchange: one request datagram, exactly one
//! reply. Commands are sent with [`Client::send_command`](crate::Client::send_command)
//! or one of the typed helpers on [`Client`](crate::Client).
//!
//! # Command Types
//!
//! ## File Control
//! - [`DeleteFile`] - Delete a file on the controller
//!
//! ## Variables
//! - [`ReadVariable`] - Read a byte, integer, double or real variable
//! - [`WriteVariable`] - Write a byte, integer, double or real variable
//!
//! Multi-datagram file transfers (list, read, write) are built on the same
//! request encoding but live in [`Client::read_file`](crate::Client::read_file)
//! and friends.
//!
//! # Example
//!
//! ```
//! use yaskawa_hse::{Command, DeleteFile, ReadVariable, HEADER_SIZE};
//!
//! let cmd = DeleteFile::new("TEST.JBI").unwrap();
//! let bytes = cmd.encode(0x01).unwrap();
//! assert_eq!(bytes.len(), HEADER_SIZE + 8);
//!
//! let cmd = ReadVariable::<i16>::new(6);
//! let bytes = cmd.encode(0x02).unwrap();
//! assert_eq!(bytes.len(), HEADER_SIZE);
//! ```

use std::marker::PhantomData;

use crate::error::{HseError, Result};
use crate::header::{Division, RequestHeader, MAX_PAYLOAD_SIZE};
use crate::response::ResponseHeader;

/// Get Attribute Single service.
pub(crate) const SERVICE_GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
/// Set Attribute Single service.
pub(crate) const SERVICE_SET_ATTRIBUTE_SINGLE: u8 = 0x10;
/// File delete service.
pub(crate) const SERVICE_DELETE_FILE: u8 = 0x09;
/// File loading service (client to controller).
pub(crate) const SERVICE_WRITE_FILE: u8 = 0x15;
/// File saving service (controller to client).
pub(crate) const SERVICE_READ_FILE: u8 = 0x16;
/// File list service.
pub(crate) const SERVICE_READ_FILE_LIST: u8 = 0x32;

/// A request that is answered by exactly one reply.
pub trait Command: Send + Sync + 'static {
    /// Decoded result of a successful reply.
    type Response: Send + 'static;

    /// Serializes the complete request datagram for `request_id`.
    fn encode(&self, request_id: u8) -> Result<Vec<u8>>;

    /// Decodes the payload of a reply whose status was already checked.
    fn decode_response(&self, header: &ResponseHeader, payload: &[u8]) -> Result<Self::Response>;

    /// Short description for logs and timeout errors.
    fn describe(&self) -> String;
}

/// Validates a file name or pattern sent as request payload.
pub(crate) fn check_file_name(parameter: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HseError::invalid_parameter(parameter, "must not be empty"));
    }
    if !name.is_ascii() {
        return Err(HseError::invalid_parameter(parameter, "must be ASCII"));
    }
    if name.len() > MAX_PAYLOAD_SIZE {
        return Err(HseError::invalid_parameter(
            parameter,
            format!("must not exceed {} bytes", MAX_PAYLOAD_SIZE),
        ));
    }
    Ok(())
}

/// Command deleting a file on the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFile {
    name: String,
}

impl DeleteFile {
    /// Creates a new delete command.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, not ASCII or too long.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_file_name("name", &name)?;
        Ok(Self { name })
    }

    /// Name of the file to delete.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Command for DeleteFile {
    type Response = ();

    fn encode(&self, request_id: u8) -> Result<Vec<u8>> {
        RequestHeader::file(SERVICE_DELETE_FILE, request_id, 0, false).encode(self.name.as_bytes())
    }

    fn decode_response(&self, _header: &ResponseHeader, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("delete file {}", self.name)
    }
}

/// Value types stored in controller variables.
pub trait Variable: Copy + Send + Sync + 'static {
    /// Command number of the variable type.
    const COMMAND: u16;
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Name of the variable type.
    const NAME: &'static str;

    /// Appends the little-endian encoding.
    fn encode(self, out: &mut Vec<u8>);

    /// Decodes from the first [`SIZE`](Self::SIZE) bytes of `data`.
    fn decode(data: &[u8]) -> Self;
}

macro_rules! variable {
    ($type:ty, $command:expr, $name:expr) => {
        impl Variable for $type {
            const COMMAND: u16 = $command;
            const SIZE: usize = std::mem::size_of::<$type>();
            const NAME: &'static str = $name;

            fn encode(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(data: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$type>()];
                bytes.copy_from_slice(&data[..Self::SIZE]);
                <$type>::from_le_bytes(bytes)
            }
        }
    };
}

variable!(u8, 0x7A, "byte");
variable!(i16, 0x7B, "integer");
variable!(i32, 0x7C, "double");
variable!(f32, 0x7D, "real");

/// Command reading a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadVariable<T> {
    index: u16,
    _type: PhantomData<fn() -> T>,
}

impl<T: Variable> ReadVariable<T> {
    /// Creates a command reading the variable at `index`.
    pub fn new(index: u16) -> Self {
        Self {
            index,
            _type: PhantomData,
        }
    }
}

impl<T: Variable> Command for ReadVariable<T> {
    type Response = T;

    fn encode(&self, request_id: u8) -> Result<Vec<u8>> {
        RequestHeader::new(
            Division::Robot,
            T::COMMAND,
            self.index,
            1,
            SERVICE_GET_ATTRIBUTE_SINGLE,
            request_id,
        )
        .encode(&[])
    }

    fn decode_response(&self, _header: &ResponseHeader, payload: &[u8]) -> Result<T> {
        if payload.len() < T::SIZE {
            return Err(HseError::malformed(format!(
                "{} variable reply holds {} bytes, expected at least {}",
                T::NAME,
                payload.len(),
                T::SIZE
            )));
        }
        Ok(T::decode(payload))
    }

    fn describe(&self) -> String {
        format!("read {} variable {}", T::NAME, self.index)
    }
}

/// Command writing a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteVariable<T> {
    index: u16,
    value: T,
}

impl<T: Variable> WriteVariable<T> {
    /// Creates a command writing `value` to the variable at `index`.
    pub fn new(index: u16, value: T) -> Self {
        Self { index, value }
    }
}

impl<T: Variable> Command for WriteVariable<T> {
    type Response = ();

    fn encode(&self, request_id: u8) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(T::SIZE);
        self.value.encode(&mut payload);
        RequestHeader::new(
            Division::Robot,
            T::COMMAND,
            self.index,
            1,
            SERVICE_SET_ATTRIBUTE_SINGLE,
            request_id,
        )
        .encode(&payload)
    }

    fn decode_response(&self, _header: &ResponseHeader, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("write {} variable {}", T::NAME, self.index)
    }
}
