//! TLS channel: one TCP socket wrapped in client-authenticated TLS
//!
//! The socket is opened lazily by the first I/O call and reopened after a
//! teardown. TCP and TLS handles are held separately; exactly one of them
//! being present is a broken state that `connect` refuses to paper over.

use super::{Credentials, Transport, TransportError, TransportFactory};
use crate::channel::{ChannelKind, Endpoint, Endpoints};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default limit for the TCP connect and, separately, the TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Blocking TLS connection to one gateway endpoint
pub struct TlsChannel {
    endpoint: Endpoint,
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
    tcp: Option<TcpStream>,
    tls: Option<ClientConnection>,
}

impl TlsChannel {
    pub fn new(endpoint: Endpoint, credentials: &Credentials, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            config: credentials.client_config(),
            connect_timeout,
            tcp: None,
            tls: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connection_error(&self, source: io::Error) -> TransportError {
        TransportError::Connection {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            source,
        }
    }

    fn open_tcp(&self) -> Result<TcpStream, TransportError> {
        let addrs = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| self.connection_error(e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(self.connection_error(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        })))
    }

    fn handshake(&self, tcp: &mut TcpStream) -> Result<ClientConnection, TransportError> {
        let server_name = ServerName::try_from(self.endpoint.host.clone()).map_err(|e| {
            TransportError::Handshake {
                host: self.endpoint.host.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut tls = ClientConnection::new(Arc::clone(&self.config), server_name).map_err(|e| {
            TransportError::Handshake {
                host: self.endpoint.host.clone(),
                reason: e.to_string(),
            }
        })?;

        // The handshake gets its own connect_timeout budget
        let limit = self.connect_timeout.max(MIN_SOCKET_TIMEOUT);
        let deadline = Instant::now() + limit;
        set_io_timeouts(tcp, Some(limit)).map_err(|e| self.connection_error(e))?;

        while tls.is_handshaking() {
            if Instant::now() >= deadline {
                return Err(self.handshake_timeout());
            }
            tls.complete_io(tcp).map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => self.handshake_timeout(),
                _ => self.connection_error(e),
            })?;
        }

        set_io_timeouts(tcp, None).map_err(|e| self.connection_error(e))?;
        Ok(tls)
    }

    fn handshake_timeout(&self) -> TransportError {
        error!(endpoint = %self.endpoint, "TLS handshake timed out");
        self.connection_error(io::Error::new(
            io::ErrorKind::TimedOut,
            "TLS handshake timed out",
        ))
    }

    /// Plaintext stream over the open connection, connecting first if needed
    fn stream(
        &mut self,
    ) -> Result<rustls::Stream<'_, ClientConnection, TcpStream>, TransportError> {
        self.connect()?;
        match (self.tls.as_mut(), self.tcp.as_mut()) {
            (Some(tls), Some(tcp)) => Ok(rustls::Stream::new(tls, tcp)),
            _ => Err(TransportError::HalfOpen),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if let Some(tcp) = &self.tcp {
            tcp.set_read_timeout(timeout)?;
        }
        Ok(())
    }
}

impl Transport for TlsChannel {
    fn connect(&mut self) -> Result<(), TransportError> {
        match (&self.tcp, &self.tls) {
            (Some(_), Some(_)) => return Ok(()),
            (None, None) => {}
            _ => {
                error!(endpoint = %self.endpoint, "Trying to open half-open connection");
                return Err(TransportError::HalfOpen);
            }
        }

        info!(endpoint = %self.endpoint, "Setting up TLS connection to push gateway");
        let mut tcp = self.open_tcp()?;
        SockRef::from(&tcp)
            .set_keepalive(true)
            .map_err(|e| self.connection_error(e))?;

        let tls = self.handshake(&mut tcp)?;
        self.tcp = Some(tcp);
        self.tls = Some(tls);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.tcp.is_some() && self.tls.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.stream()?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.stream()?.flush()?;
        Ok(())
    }

    fn read(&mut self, len: usize, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.connect()?;
        // A zero timeout would mean "block forever" to the socket
        self.set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))?;

        let result = read_up_to(&mut self.stream()?, len);

        if let Err(e) = self.set_read_timeout(None) {
            error!(endpoint = %self.endpoint, error = %e, "Failed to clear read timeout");
        }
        result
    }

    fn teardown(&mut self) {
        debug!(endpoint = %self.endpoint, "Closing connections...");

        if let (Some(tls), Some(tcp)) = (self.tls.as_mut(), self.tcp.as_mut()) {
            tls.send_close_notify();
            if let Err(e) = tls.write_tls(tcp) {
                error!(endpoint = %self.endpoint, error = %e, "Error closing TLS session");
            }
        }
        self.tls = None;

        if let Some(tcp) = self.tcp.take() {
            if let Err(e) = tcp.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    error!(endpoint = %self.endpoint, error = %e, "Error closing TCP socket");
                }
            }
        }
    }
}

impl Drop for TlsChannel {
    fn drop(&mut self) {
        if self.tcp.is_some() || self.tls.is_some() {
            self.teardown();
        }
    }
}

fn set_io_timeouts(tcp: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)
}

/// Fill up to `len` bytes; stop early on timeout or end of stream
fn read_up_to(reader: &mut impl Read, len: usize) -> Result<Option<Vec<u8>>, TransportError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some(buf))
}

/// Opens a `TlsChannel` per pool entry, all sharing one set of credentials
#[derive(Debug, Clone)]
pub struct TlsTransportFactory {
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
    connect_timeout: Duration,
}

impl TlsTransportFactory {
    pub fn new(credentials: Arc<Credentials>, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            endpoints,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl TransportFactory for TlsTransportFactory {
    fn open(&self, kind: ChannelKind) -> Box<dyn Transport> {
        Box::new(TlsChannel::new(
            self.endpoints.get(kind).clone(),
            &self.credentials,
            self.connect_timeout,
        ))
    }
}
