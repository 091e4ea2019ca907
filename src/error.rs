//! Error types for the High Speed Ethernet Server protocol.

use std::io;
use thiserror::Error;

/// Result type alias for HSE operations.
pub type Result<T> = std::result::Result<T, HseError>;

/// Errors that can occur while talking to a controller.
///
/// Errors that belong to a specific request are returned from that request's
/// operation. Errors that can not be attributed to any pending request
/// (transport failures on the receive path, malformed datagrams, replies for
/// unknown request IDs) are reported to the error handler installed with
/// [`Client::set_error_handler`](crate::Client::set_error_handler).
#[derive(Debug, Error)]
pub enum HseError {
    /// Socket level failure while connecting, sending or receiving.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// A datagram could not be decoded.
    #[error("Malformed response: {reason}")]
    MalformedResponse {
        /// Description of what was wrong with the datagram.
        reason: String,
    },

    /// A well-formed reply arrived for a request ID without a registered handler.
    #[error("No handler for request ID {request_id}")]
    UnknownRequest {
        /// Request ID carried by the reply.
        request_id: u8,
    },

    /// A handler was registered for a request ID that is still pending.
    ///
    /// This indicates a bug in request ID allocation, not a runtime condition.
    #[error("Request ID {request_id} is already taken, can not register handler")]
    DuplicateRequestId {
        /// The request ID that was already registered.
        request_id: u8,
    },

    /// The controller rejected a command.
    #[error("Command failed: status 0x{status:02X}, extra status 0x{extra_status:04X}")]
    CommandFailed {
        /// Status byte from the response header.
        status: u8,
        /// Extra status word from the response header.
        extra_status: u16,
    },

    /// No reply arrived in time.
    #[error("Timeout waiting for {waiting_for}")]
    Timeout {
        /// What was being waited for.
        waiting_for: String,
    },

    /// A block of a multi-datagram transfer arrived out of sequence.
    #[error("Unexpected block number: expected {expected}, received {received}")]
    UnexpectedBlock {
        /// Block number that was expected next.
        expected: u32,
        /// Block number that was received.
        received: u32,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// The session has no socket yet.
    #[error("Client is not connected")]
    NotConnected,

    /// The session already has a socket.
    #[error("Client is already open")]
    AlreadyOpen,

    /// The session was closed.
    #[error("Client is closed")]
    Closed,
}

impl HseError {
    /// Creates a new `MalformedResponse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use yaskawa_hse::HseError;
    ///
    /// let err = HseError::malformed("response does not start with magic bytes");
    /// ```
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `CommandFailed` error.
    pub fn command_failed(status: u8, extra_status: u16) -> Self {
        Self::CommandFailed {
            status,
            extra_status,
        }
    }

    /// Creates a new `Timeout` error.
    pub fn timeout(waiting_for: impl Into<String>) -> Self {
        Self::Timeout {
            waiting_for: waiting_for.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use yaskawa_hse::HseError;
    ///
    /// let err = HseError::invalid_parameter("name", "must not be empty");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors reported by the controller itself.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }
}
