//! Connection pool keyed by channel and calling context
//!
//! Production and sandbox connections are keyed by the caller's `ContextId`,
//! so workers never share a socket. The restricted channel has a single entry
//! for the whole process; the guard returned by `acquire` is its exclusive
//! lock and is held for the entire send.
//!
//! Idle connections are reconnected when next acquired. Nothing runs in the
//! background and entries are never evicted.

use crate::channel::ChannelKind;
use crate::recent::RecentTokenLog;
use crate::transport::{Transport, TransportError, TransportFactory};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A connection unused for longer than this is reconnected on next use
pub const IDLE_RECONNECTION_INTERVAL: Duration = Duration::from_secs(120);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies the calling worker; each context gets its own connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// A context id not handed out before in this process
    pub fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Time source for idle checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A transport plus the bookkeeping the pool keeps for it
pub struct PooledConnection {
    id: u64,
    kind: ChannelKind,
    transport: Box<dyn Transport>,
    recent: RecentTokenLog,
    last_access: Option<Instant>,
}

impl PooledConnection {
    pub fn new(id: u64, kind: ChannelKind, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            kind,
            transport,
            recent: RecentTokenLog::new(),
            last_access: None,
        }
    }

    /// Pool-unique id, used as a log prefix
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn recent(&self) -> &RecentTokenLog {
        &self.recent
    }

    pub fn record_token(&mut self, token: impl Into<String>) {
        self.recent.push(token);
    }

    pub fn last_access(&self) -> Option<Instant> {
        self.last_access
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Tear down then connect again
    pub fn reconnect(&mut self) -> Result<(), TransportError> {
        self.transport.teardown();
        self.transport.connect()
    }

    pub fn teardown(&mut self) {
        self.transport.teardown();
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("connected", &self.transport.is_connected())
            .field("recent", &self.recent)
            .field("last_access", &self.last_access)
            .finish()
    }
}

/// Exclusive access to one pooled connection
pub type ConnectionGuard = ArcMutexGuard<RawMutex, PooledConnection>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    kind: ChannelKind,
    /// `None` for the shared restricted entry
    context: Option<ContextId>,
}

impl PoolKey {
    fn new(kind: ChannelKind, context: ContextId) -> Self {
        let context = if kind.is_shared() { None } else { Some(context) };
        Self { kind, context }
    }
}

/// Pool of gateway connections
pub struct ConnectionPool {
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    idle_interval: Duration,
    entries: Mutex<HashMap<PoolKey, Arc<Mutex<PooledConnection>>>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_clock(factory, Arc::new(SystemClock), IDLE_RECONNECTION_INTERVAL)
    }

    pub fn with_clock(
        factory: Arc<dyn TransportFactory>,
        clock: Arc<dyn Clock>,
        idle_interval: Duration,
    ) -> Self {
        Self {
            factory,
            clock,
            idle_interval,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Lock the connection for `(kind, context)`, creating it on first use.
    ///
    /// `context` is ignored on the restricted channel. A connection idle for
    /// longer than the idle interval is reconnected before it is returned; if
    /// that reconnect fails the connection is left closed and the next write
    /// opens it.
    pub fn acquire(&self, kind: ChannelKind, context: ContextId) -> ConnectionGuard {
        let entry = self.entry(PoolKey::new(kind, context));
        let mut conn = entry.lock_arc();

        let now = self.clock.now();
        if let Some(last) = conn.last_access {
            let idle = now.saturating_duration_since(last);
            if idle > self.idle_interval {
                info!(
                    connection = conn.id,
                    channel = %kind,
                    idle_secs = idle.as_secs(),
                    "Connection idle too long, reconnecting"
                );
                if let Err(e) = conn.reconnect() {
                    warn!(
                        connection = conn.id,
                        channel = %kind,
                        error = %e,
                        "Idle reconnect failed, will connect on next write"
                    );
                }
            }
        }
        conn.last_access = Some(now);

        conn
    }

    fn entry(&self, key: PoolKey) -> Arc<Mutex<PooledConnection>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!(
                connection = id,
                channel = %key.kind,
                context = ?key.context,
                "Creating pooled connection"
            );
            Arc::new(Mutex::new(PooledConnection::new(
                id,
                key.kind,
                self.factory.open(key.kind),
            )))
        });
        Arc::clone(entry)
    }

    /// Number of pool entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close every connection. Entries stay and reconnect lazily.
    pub fn shutdown(&self) {
        let entries: Vec<_> = self.entries.lock().values().cloned().collect();
        for entry in entries {
            entry.lock().teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn idle_transport(reconnects: usize) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_teardown().times(reconnects).return_const(());
        transport.expect_connect().times(reconnects).returning(|| Ok(()));
        transport.expect_is_connected().return_const(true);
        transport
    }

    fn pool_with(transport: MockTransport, clock: Arc<ManualClock>) -> ConnectionPool {
        let slot = Mutex::new(Some(transport));
        let factory = move |_kind: ChannelKind| -> Box<dyn Transport> {
            Box::new(slot.lock().take().expect("one connection expected"))
        };
        ConnectionPool::with_clock(Arc::new(factory), clock, IDLE_RECONNECTION_INTERVAL)
    }

    #[test]
    fn test_contexts_get_separate_connections() {
        let factory = |_kind: ChannelKind| -> Box<dyn Transport> { Box::new(MockTransport::new()) };
        let pool = ConnectionPool::new(Arc::new(factory));

        let a = pool.acquire(ChannelKind::Production, ContextId::new(1)).id();
        let b = pool.acquire(ChannelKind::Production, ContextId::new(2)).id();
        let a_again = pool.acquire(ChannelKind::Production, ContextId::new(1)).id();
        let sandbox = pool.acquire(ChannelKind::Sandbox, ContextId::new(1)).id();

        assert_ne!(a, b);
        assert_eq!(a, a_again);
        assert_ne!(a, sandbox);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_restricted_shares_one_entry() {
        let factory = |_kind: ChannelKind| -> Box<dyn Transport> { Box::new(MockTransport::new()) };
        let pool = ConnectionPool::new(Arc::new(factory));

        let first = pool.acquire(ChannelKind::Restricted, ContextId::new(1)).id();
        let second = pool.acquire(ChannelKind::Restricted, ContextId::new(2)).id();

        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_idle_past_interval_reconnects() {
        let clock = Arc::new(ManualClock::new());
        let pool = pool_with(idle_transport(1), Arc::clone(&clock));

        drop(pool.acquire(ChannelKind::Production, ContextId::new(1)));
        clock.advance(Duration::from_secs(121));
        drop(pool.acquire(ChannelKind::Production, ContextId::new(1)));
    }

    #[test]
    fn test_idle_within_interval_keeps_connection() {
        let clock = Arc::new(ManualClock::new());
        let pool = pool_with(idle_transport(0), Arc::clone(&clock));

        drop(pool.acquire(ChannelKind::Sandbox, ContextId::new(1)));
        clock.advance(Duration::from_secs(119));
        drop(pool.acquire(ChannelKind::Sandbox, ContextId::new(1)));
    }

    #[test]
    fn test_access_refreshes_idle_window() {
        let clock = Arc::new(ManualClock::new());
        let pool = pool_with(idle_transport(0), Arc::clone(&clock));

        for _ in 0..4 {
            drop(pool.acquire(ChannelKind::Restricted, ContextId::new(7)));
            clock.advance(Duration::from_secs(100));
        }
    }

    #[test]
    fn test_failed_idle_reconnect_still_returns_connection() {
        let clock = Arc::new(ManualClock::new());
        let mut transport = MockTransport::new();
        transport.expect_teardown().times(1).return_const(());
        transport.expect_connect().times(1).returning(|| {
            Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )))
        });
        let pool = pool_with(transport, Arc::clone(&clock));

        drop(pool.acquire(ChannelKind::Production, ContextId::new(1)));
        clock.advance(Duration::from_secs(300));
        let conn = pool.acquire(ChannelKind::Production, ContextId::new(1));
        assert_eq!(conn.last_access(), Some(clock.now()));
    }

    #[test]
    fn test_shutdown_tears_down_entries() {
        let mut transport = MockTransport::new();
        transport.expect_teardown().times(1).return_const(());
        let pool = pool_with(transport, Arc::new(ManualClock::new()));

        drop(pool.acquire(ChannelKind::Production, ContextId::new(1)));
        pool.shutdown();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_context_id_next_is_unique() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert_ne!(a, b);
        assert_eq!(ContextId::from(5).to_string(), "ctx-5");
    }
}
