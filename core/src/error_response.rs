//! Error responses, the 6-byte tuple the gateway sends for a rejected push
//!
//! Format: [command:1 = 8][status:1][identifier:4]
//!
//! The identifier names the notification the gateway rejected. When several
//! notifications are in flight it may belong to an earlier write than the one
//! just checked, so attribution is best effort.

use crate::transport::{Transport, TransportError};
use std::fmt;
use std::time::Duration;
use tracing::warn;

pub const ERROR_RESPONSE_LEN: usize = 6;

/// Command byte of an error response
pub const ERROR_COMMAND: u8 = 8;

/// How long to wait for an error response after a checked send
pub const ERROR_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Rejection reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub command: u8,
    pub status: u8,
    pub identifier: [u8; 4],
}

impl ErrorResponse {
    /// Parse the first six bytes of `data`
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ERROR_RESPONSE_LEN {
            return None;
        }
        Some(Self {
            command: data[0],
            status: data[1],
            identifier: [data[2], data[3], data[4], data[5]],
        })
    }

    pub fn to_bytes(&self) -> [u8; ERROR_RESPONSE_LEN] {
        let [a, b, c, d] = self.identifier;
        [self.command, self.status, a, b, c, d]
    }

    pub fn is_error_command(&self) -> bool {
        self.command == ERROR_COMMAND
    }

    pub fn status_description(&self) -> &'static str {
        match self.status {
            0 => "No errors encountered",
            1 => "Processing error",
            2 => "Missing device token",
            3 => "Missing topic",
            4 => "Missing payload",
            5 => "Invalid token size",
            6 => "Invalid topic size",
            7 => "Invalid payload size",
            8 => "Invalid token",
            10 => "Shutdown",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status {} ({}) for identifier {}",
            self.status,
            self.status_description(),
            hex::encode(self.identifier)
        )
    }
}

/// Wait up to `timeout` for an error response.
///
/// `None` means nothing arrived in time, which callers treat as success.
/// A reply shorter than six bytes leaves the stream misaligned, so it is
/// reported as `TruncatedResponse` and the connection must be torn down.
pub fn read_error_response(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Option<ErrorResponse>, TransportError> {
    let Some(bytes) = transport.read(ERROR_RESPONSE_LEN, timeout)? else {
        return Ok(None);
    };
    match ErrorResponse::from_bytes(&bytes) {
        Some(response) => Ok(Some(response)),
        None => {
            warn!(got = bytes.len(), "Truncated error response");
            Err(TransportError::TruncatedResponse { got: bytes.len() })
        }
    }
}
