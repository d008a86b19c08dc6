//! Delivery: encode, write, optionally verify, retry with reconnect
//!
//! One `send` is:
//! 1. build and encode the notification (no I/O on validation failure)
//! 2. lock the pooled connection for the channel and context
//! 3. remember the token for failure attribution
//! 4. write the packet
//! 5. when checking, flush and wait briefly for an error response
//! 6. on an I/O failure, reconnect and replay the same bytes, at most
//!    `max_retries` times
//!
//! The connection lock is held for the whole sequence, which serializes every
//! send on the shared restricted channel.

use crate::channel::ChannelKind;
use crate::error_response::{read_error_response, ErrorResponse, ERROR_READ_TIMEOUT};
use crate::notification::{Message, Notification, NotificationError, Style};
use crate::pool::{ConnectionPool, ContextId, PooledConnection};
use crate::transport::TransportError;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Reconnect-and-retry budget for one send
pub const TIMES_TO_RETRY_SOCKET_ERROR: u32 = 2;

/// Pause between a failed write and the reconnect
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DeliveryError {
    /// Whether a reconnect could make the next attempt succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Notification(_) => false,
            DeliveryError::Transport(e) => !e.is_fatal(),
        }
    }
}

/// Result of a send that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written, and no error response arrived if one was checked for
    Sent,
    /// The gateway answered with an error response; the connection is kept
    Rejected(ErrorResponse),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }
}

/// Retry and verification timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub error_read_timeout: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            max_retries: TIMES_TO_RETRY_SOCKET_ERROR,
            retry_delay: RETRY_DELAY,
            error_read_timeout: ERROR_READ_TIMEOUT,
        }
    }
}

/// Sends notifications through a shared connection pool
pub struct DeliveryManager {
    pool: Arc<ConnectionPool>,
    options: DeliveryOptions,
}

impl DeliveryManager {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self::with_options(pool, DeliveryOptions::default())
    }

    pub fn with_options(pool: Arc<ConnectionPool>, options: DeliveryOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Send one notification.
    ///
    /// Returns `Rejected` when a checked send got an error response, and an
    /// error when the message is invalid or the gateway stayed unreachable
    /// through every retry.
    pub fn send(
        &self,
        context: ContextId,
        token: &str,
        message: &Message,
        kind: ChannelKind,
        style: &Style,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let notification = Notification::new(token, message, style)?;
        self.send_notification(context, &notification, kind, should_verify(style))
    }

    /// Send an already built notification
    pub fn send_notification(
        &self,
        context: ContextId,
        notification: &Notification,
        kind: ChannelKind,
        verify: bool,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let bytes = notification.encode();
        let mut conn = self.pool.acquire(kind, context);

        info!(
            connection = conn.id(),
            channel = %kind,
            token = %notification.token_hex(),
            message = %notification.payload(),
            "Sending notification"
        );
        conn.record_token(notification.token_hex());

        self.deliver(&mut conn, &bytes, verify)
    }

    /// Close every pooled connection
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn deliver(
        &self,
        conn: &mut PooledConnection,
        bytes: &[u8],
        verify: bool,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut retries = 0;

        loop {
            let result = if retries == 0 {
                self.attempt(conn, bytes, verify)
            } else {
                self.retry(conn, bytes, verify)
            };

            let err = match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            error!(
                connection = conn.id(),
                channel = %conn.kind(),
                attempt = retries,
                recent = %conn.recent(),
                error = %err,
                "Push gateway send failed"
            );

            if !err.is_retryable() || retries >= self.options.max_retries {
                error!(
                    connection = conn.id(),
                    channel = %conn.kind(),
                    failures = retries + 1,
                    "Gave up sending notification"
                );
                return Err(err);
            }
            retries += 1;
        }
    }

    fn retry(
        &self,
        conn: &mut PooledConnection,
        bytes: &[u8],
        verify: bool,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if !self.options.retry_delay.is_zero() {
            thread::sleep(self.options.retry_delay);
        }
        conn.reconnect()?;
        self.attempt(conn, bytes, verify)
    }

    fn attempt(
        &self,
        conn: &mut PooledConnection,
        bytes: &[u8],
        verify: bool,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let transport = conn.transport();
        transport.write(bytes)?;
        if !verify {
            return Ok(DeliveryOutcome::Sent);
        }

        transport.flush()?;
        match read_error_response(transport, self.options.error_read_timeout)? {
            None => Ok(DeliveryOutcome::Sent),
            Some(response) => {
                if !response.is_error_command() {
                    warn!(
                        connection = conn.id(),
                        command = response.command,
                        "Unexpected command in error response"
                    );
                }
                error!(
                    connection = conn.id(),
                    channel = %conn.kind(),
                    status = response.status,
                    identifier = %hex::encode(response.identifier),
                    recent = %conn.recent(),
                    "Gateway rejected notification: {}",
                    response.status_description()
                );
                Ok(DeliveryOutcome::Rejected(response))
            }
        }
    }
}

/// Explicit debug wins; otherwise check one in `debug_sample` sends
fn should_verify(style: &Style) -> bool {
    if style.debug {
        return true;
    }
    match style.debug_sample {
        Some(one_in) if one_in > 0 => rand::thread_rng().gen_range(0..one_in) == 0,
        _ => false,
    }
}
