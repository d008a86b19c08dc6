//! Notifications: device token, JSON payload and wire style for one push
//!
//! A `Notification` is validated and encoded when it is built, so a message
//! that is missing every recognized key or that serializes past the payload
//! ceiling never reaches the network.

pub mod codec;

pub use codec::{decode_frame, decode_simple, normalize_token, DecodedNotification, ItemId};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Largest JSON payload the gateway accepts, in bytes
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Alert budget that still leaves room for a badge, a sound and a little
/// custom data under `MAX_PAYLOAD_SIZE`. Callers can check against it before
/// building a notification.
pub const MAX_ALERT_LENGTH: usize = 199;

/// A message must carry at least one of these keys
pub const RECOGNIZED_KEYS: [&str; 4] = ["alert", "badge", "sound", "content-available"];

pub const DEFAULT_PRIORITY: u8 = 10;

/// Default lifetime of a notification on the gateway
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Notification construction and codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(
        "Payload bytesize of {0} is > the maximum allowed size of {MAX}",
        MAX = MAX_PAYLOAD_SIZE
    )]
    PayloadTooLarge(usize),

    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    #[error("Buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("Unexpected command byte: {0}")]
    UnexpectedCommand(u8),

    #[error("Unknown frame item: {0}")]
    UnknownItem(u8),

    #[error("Frame item {item} has length {len}")]
    InvalidItemLength { item: u8, len: usize },

    #[error("Frame is missing item {0}")]
    MissingItem(u8),

    #[error("JSON error: {0}")]
    Json(String),
}

/// Wire layout of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Legacy command 0 layout
    Simple,
    /// Command 2 layout with tagged items
    #[default]
    Frame,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Simple => write!(f, "simple"),
            Format::Frame => write!(f, "frame"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Format::Simple),
            "frame" => Ok(Format::Frame),
            other => Err(format!("unknown format '{}' (expected simple or frame)", other)),
        }
    }
}

/// Caller-supplied message options.
///
/// `alert`, `badge`, `sound` and `content-available` end up under `aps`,
/// as does any other top-level key. Keys inside a `custom` object are merged
/// into the root of the JSON document instead:
///
/// ```text
/// {"alert": "Stuff", "custom": {"code": 23}}
///   => {"aps": {"alert": "Stuff"}, "code": 23}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Shorthand for a message that only carries an alert
    pub fn alert(text: impl Into<String>) -> Self {
        Self::new().with("alert", text.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True when at least one recognized key is present
    pub fn is_valid(&self) -> bool {
        RECOGNIZED_KEYS.iter().any(|key| self.0.contains_key(*key))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<&str> for Message {
    fn from(alert: &str) -> Self {
        Message::alert(alert)
    }
}

impl From<String> for Message {
    fn from(alert: String) -> Self {
        Message::alert(alert)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = NotificationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::String(alert) => Ok(Message::alert(alert)),
            other => Err(NotificationError::InvalidPayload(format!(
                "message must be a JSON object or string, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Per-send options: wire layout, frame fields and error checking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Style {
    pub format: Format,
    /// Defaults to the first four token bytes
    pub identifier: Option<[u8; 4]>,
    /// Absolute expiry in unix seconds, defaults to an hour from now
    pub expiry: Option<u32>,
    pub priority: Option<u8>,
    /// Check the gateway for an error response after this send
    pub debug: bool,
    /// Check for an error response on roughly one in N sends
    pub debug_sample: Option<u32>,
}

impl Style {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_identifier(mut self, identifier: [u8; 4]) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_debug_sample(mut self, one_in: u32) -> Self {
        self.debug_sample = Some(one_in);
        self
    }
}

/// A validated notification, ready to encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    token: Vec<u8>,
    payload: String,
    format: Format,
    identifier: [u8; 4],
    expiry: u32,
    priority: u8,
}

impl Notification {
    /// Build a notification for a hex device token.
    ///
    /// Fails with `InvalidPayload` when no recognized key is present,
    /// `PayloadTooLarge` when the JSON exceeds `MAX_PAYLOAD_SIZE` and
    /// `InvalidToken` when the token is not hex.
    pub fn new(token: &str, message: &Message, style: &Style) -> Result<Self, NotificationError> {
        let payload = codec::package_message(message)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NotificationError::PayloadTooLarge(payload.len()));
        }

        let token = codec::decode_token(token)?;
        let identifier = style
            .identifier
            .unwrap_or_else(|| default_identifier(&token));

        Ok(Self {
            token,
            payload,
            format: style.format,
            identifier,
            expiry: style.expiry.unwrap_or_else(default_expiry),
            priority: style.priority.unwrap_or(DEFAULT_PRIORITY),
        })
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }

    /// The packaged JSON document
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn identifier(&self) -> [u8; 4] {
        self.identifier
    }

    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Complete packet, ready to write to the gateway
    pub fn encode(&self) -> Vec<u8> {
        match self.format {
            Format::Simple => codec::encode_simple(&self.token, self.payload.as_bytes()),
            Format::Frame => codec::encode_frame(
                &self.token,
                self.payload.as_bytes(),
                self.identifier,
                self.expiry,
                self.priority,
            ),
        }
    }
}

fn default_identifier(token: &[u8]) -> [u8; 4] {
    match token.get(..4).and_then(|head| <[u8; 4]>::try_from(head).ok()) {
        Some(identifier) => identifier,
        None => {
            let mut identifier = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut identifier);
            identifier
        }
    }
}

fn default_expiry() -> u32 {
    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        + DEFAULT_EXPIRY;
    u32::try_from(expiry.as_secs()).unwrap_or(u32::MAX)
}
