//! Delivery channels and the gateway endpoints behind them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port shared by every gateway host
pub const GATEWAY_PORT: u16 = 2195;

pub const PRODUCTION_HOST: &str = "gateway.push.apple.com";
pub const SANDBOX_HOST: &str = "gateway.sandbox.push.apple.com";

/// Enterprise certificates are presented to the production gateway
pub const RESTRICTED_HOST: &str = PRODUCTION_HOST;

/// Logical delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Production gateway, one connection per calling context
    Production,
    /// Sandbox gateway, one connection per calling context
    Sandbox,
    /// Enterprise gateway, a single connection for the whole process
    Restricted,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Production,
        ChannelKind::Sandbox,
        ChannelKind::Restricted,
    ];

    /// Whether every context shares one connection on this channel
    pub fn is_shared(&self) -> bool {
        matches!(self, ChannelKind::Restricted)
    }

    /// Well-known gateway host for this channel
    pub fn default_host(&self) -> &'static str {
        match self {
            ChannelKind::Production => PRODUCTION_HOST,
            ChannelKind::Sandbox => SANDBOX_HOST,
            ChannelKind::Restricted => RESTRICTED_HOST,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Production => write!(f, "production"),
            ChannelKind::Sandbox => write!(f, "sandbox"),
            ChannelKind::Restricted => write!(f, "restricted"),
        }
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(ChannelKind::Production),
            "sandbox" => Ok(ChannelKind::Sandbox),
            "restricted" | "enterprise" => Ok(ChannelKind::Restricted),
            other => Err(format!(
                "unknown channel '{}' (expected production, sandbox or restricted)",
                other
            )),
        }
    }
}

/// Host/port pair of one gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The well-known endpoint of a channel
    pub fn default_for(kind: ChannelKind) -> Self {
        Self::new(kind.default_host(), GATEWAY_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Endpoint for each channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub production: Endpoint,
    pub sandbox: Endpoint,
    pub restricted: Endpoint,
}

impl Endpoints {
    pub fn get(&self, kind: ChannelKind) -> &Endpoint {
        match kind {
            ChannelKind::Production => &self.production,
            ChannelKind::Sandbox => &self.sandbox,
            ChannelKind::Restricted => &self.restricted,
        }
    }

    pub fn get_mut(&mut self, kind: ChannelKind) -> &mut Endpoint {
        match kind {
            ChannelKind::Production => &mut self.production,
            ChannelKind::Sandbox => &mut self.sandbox,
            ChannelKind::Restricted => &mut self.restricted,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            production: Endpoint::default_for(ChannelKind::Production),
            sandbox: Endpoint::default_for(ChannelKind::Sandbox),
            restricted: Endpoint::default_for(ChannelKind::Restricted),
        }
    }
}
