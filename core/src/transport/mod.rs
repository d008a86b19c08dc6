// Transport seam between delivery logic and the gateway
//
// `Transport` is the seam: the TLS channel implements it for real traffic and
// tests substitute scripted or mocked transports.

pub mod credentials;
pub mod tls;

pub use credentials::Credentials;
pub use tls::{TlsChannel, TlsTransportFactory};

use crate::channel::ChannelKind;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Missing push certificate")]
    MissingCertificate,

    #[error("Missing private key for push certificate")]
    MissingPrivateKey,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Trying to open half-open connection")]
    HalfOpen,

    #[error("Error with connection to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("Truncated error response: got {got} of 6 bytes")]
    TruncatedResponse { got: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Errors no reconnect can fix: bad or missing credentials and broken
    /// connection state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::MissingCertificate
                | TransportError::MissingPrivateKey
                | TransportError::InvalidCredentials(_)
                | TransportError::HalfOpen
        )
    }
}

/// A lazily connected, blocking byte stream to one gateway.
///
/// I/O methods connect first when no connection is open.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Open the connection. A no-op when already open.
    fn connect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Write the whole buffer
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    /// Read up to `len` bytes, waiting at most `timeout`.
    /// `None` when nothing arrived in time.
    fn read(&mut self, len: usize, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the connection. Never fails; close errors are logged.
    fn teardown(&mut self);
}

/// Creates the transport behind each new pool entry
pub trait TransportFactory: Send + Sync {
    fn open(&self, kind: ChannelKind) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(ChannelKind) -> Box<dyn Transport> + Send + Sync,
{
    fn open(&self, kind: ChannelKind) -> Box<dyn Transport> {
        self(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TransportError::MissingCertificate.is_fatal());
        assert!(TransportError::HalfOpen.is_fatal());
        assert!(TransportError::InvalidCredentials("bad key".into()).is_fatal());

        let io = TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!io.is_fatal());

        let connection = TransportError::Connection {
            host: "gateway.push.apple.com".into(),
            port: 2195,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(!connection.is_fatal());
        assert!(connection.to_string().contains("gateway.push.apple.com:2195"));
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_kind: ChannelKind| -> Box<dyn Transport> { Box::new(MockTransport::new()) };
        let transport = factory.open(ChannelKind::Sandbox);
        drop(transport);
    }
}
