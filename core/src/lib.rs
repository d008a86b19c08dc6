// apn-core: binary-protocol push notification sender
//
// Encodes notifications into the gateway's byte layouts, keeps a pool of
// certificate-authenticated TLS connections per channel and calling context,
// and delivers with bounded retry-and-reconnect.
//
//   DeliveryManager::send
//     -> Notification::new / encode
//     -> ConnectionPool::acquire
//     -> Transport::write
//     -> read_error_response (debug sends only)

pub mod channel;
pub mod config;
pub mod delivery;
pub mod error_response;
pub mod notification;
pub mod pool;
pub mod recent;
pub mod transport;

use std::sync::Arc;

pub use channel::{ChannelKind, Endpoint, Endpoints};
pub use config::{ConfigError, PushConfig};
pub use delivery::{DeliveryError, DeliveryManager, DeliveryOptions, DeliveryOutcome};
pub use error_response::{read_error_response, ErrorResponse};
pub use notification::{Format, Message, Notification, NotificationError, Style};
pub use pool::{Clock, ConnectionGuard, ConnectionPool, ContextId, SystemClock};
pub use recent::RecentTokenLog;
pub use transport::{Credentials, TlsTransportFactory, Transport, TransportError, TransportFactory};

/// Install a stderr `tracing` subscriber unless one is already set.
///
/// For library embedders and tests that have no subscriber of their own; the
/// `apn` binary installs its own layered backend instead. `RUST_LOG` wins over
/// `default_filter`. Calling it again is a no-op.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();
}

/// Wire up TLS transports, the pool and a delivery manager from a config
/// and already loaded credentials.
pub fn build_manager(config: &PushConfig, credentials: Credentials) -> DeliveryManager {
    let factory = TlsTransportFactory::new(Arc::new(credentials), config.endpoints.clone())
        .with_connect_timeout(config.connect_timeout());
    let pool = ConnectionPool::with_clock(
        Arc::new(factory),
        Arc::new(SystemClock),
        config.idle_interval(),
    );
    DeliveryManager::with_options(Arc::new(pool), config.delivery_options())
}
