use crate::messages::WireConfig;
use crate::network::connection::Connection;
use crate::network::transport::{ServerAddress, Transport};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, trace, warn};

pub const DEFAULT_MAX_CONNECTIONS_PER_SERVER: usize = 8;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STALE_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// How `acquire` picks among the eligible servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerSelection {
    /// First eligible server in configured order that has a free slot
    InOrder,
    /// Prefer servers with an idle connection, then the fewest live
    /// connections; ties are broken randomly
    #[default]
    LeastLoaded,
}

/// Configuration for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections_per_server: usize,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    /// Bound on reading each late reply off a reused timed-out connection
    pub stale_reply_timeout: Duration,
    pub selection: ServerSelection,
    pub wire_config: WireConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: DEFAULT_MAX_CONNECTIONS_PER_SERVER,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stale_reply_timeout: DEFAULT_STALE_REPLY_TIMEOUT,
            selection: ServerSelection::default(),
            wire_config: WireConfig::default(),
        }
    }
}

/// What happened to a connection during the attempt that borrowed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exchange completed; the connection goes back to the idle set
    Healthy,
    /// Transport or codec failure; the connection is closed
    Failed,
    /// No response in time; kept once, closed on the second timeout.
    /// The late reply is discarded before the connection is reused.
    TimedOut,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No server available: all {excluded} known servers are excluded")]
    NoServerAvailable { excluded: usize },

    #[error("No server available: no connection slot freed within {timeout:?}")]
    AcquireTimeout { timeout: Duration },

    #[error("Failed to connect to {server}: {source}")]
    Connect {
        server: ServerAddress,
        #[source]
        source: io::Error,
    },
}

impl PoolError {
    /// Both exclusion and acquire timeout mean there is nothing left to try
    pub fn is_no_server_available(&self) -> bool {
        matches!(
            self,
            PoolError::NoServerAvailable { .. } | PoolError::AcquireTimeout { .. }
        )
    }
}

/// Per-server connection counts
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub server: ServerAddress,
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub servers: Vec<ServerStatus>,
    pub connects: u64,
    pub connect_failures: u64,
    pub evictions: u64,
}

impl PoolStatus {
    pub fn server(&self, server: &ServerAddress) -> Option<&ServerStatus> {
        self.servers.iter().find(|status| &status.server == server)
    }

    pub fn live_connections(&self) -> usize {
        self.servers.iter().map(|status| status.live).sum()
    }
}

struct ServerSlot {
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    // Idle plus checked-out connections
    live: AtomicUsize,
}

struct PoolInner {
    servers: Vec<ServerAddress>,
    slots: HashMap<ServerAddress, ServerSlot>,
    transport: Arc<dyn Transport>,
    config: PoolConfig,
    released: Notify,
    next_connection_id: AtomicU64,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    evictions: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds one connection slot on a server.
///
/// Dropping the lease frees the slot and wakes waiting acquirers. A lease
/// still holding its connection when dropped counts that connection as
/// evicted, which is how cancelled attempts give their connection back.
struct Lease {
    pool: Arc<PoolInner>,
    server: ServerAddress,
    permit: Option<OwnedSemaphorePermit>,
    holds_connection: bool,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.holds_connection {
            if let Some(slot) = self.pool.slots.get(&self.server) {
                slot.live.fetch_sub(1, Ordering::AcqRel);
            }
            self.pool.evictions.fetch_add(1, Ordering::Relaxed);
        }
        drop(self.permit.take());
        self.pool.released.notify_waiters();
    }
}

/// A connection checked out of the pool for exactly one attempt
pub struct PooledConnection {
    connection: Connection,
    lease: Lease,
}

impl PooledConnection {
    /// Return the connection to its pool
    pub fn release(self, outcome: Outcome) {
        let PooledConnection {
            mut connection,
            mut lease,
        } = self;

        let keep = match outcome {
            Outcome::Healthy => true,
            Outcome::TimedOut => {
                connection.record_timeout();
                connection.timeouts() <= 1
            }
            Outcome::Failed => false,
        };

        if keep {
            if let Some(slot) = lease.pool.slots.get(&lease.server) {
                trace!(
                    connection_id = connection.id(),
                    server = %lease.server,
                    ?outcome,
                    "Returning connection to idle set"
                );
                lock(&slot.idle).push_back(connection);
                lease.holds_connection = false;
            }
        } else {
            debug!(
                connection_id = connection.id(),
                server = %lease.server,
                ?outcome,
                "Closing connection"
            );
            drop(connection);
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}

/// Owns live connections to a fixed set of servers.
///
/// Connections are opened lazily, reused across operations, and bounded per
/// server. Cloning the pool shares the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(servers: Vec<ServerAddress>, transport: Arc<dyn Transport>, config: PoolConfig) -> Self {
        let mut unique = Vec::with_capacity(servers.len());
        for server in servers {
            if !unique.contains(&server) {
                unique.push(server);
            }
        }

        let permits_per_server = config.max_connections_per_server.max(1);
        let slots = unique
            .iter()
            .map(|server| {
                let slot = ServerSlot {
                    permits: Arc::new(Semaphore::new(permits_per_server)),
                    idle: Mutex::new(VecDeque::new()),
                    live: AtomicUsize::new(0),
                };
                (server.clone(), slot)
            })
            .collect();

        info!(
            "Connection pool created for {} servers, {} connections per server",
            unique.len(),
            permits_per_server
        );

        Self {
            inner: Arc::new(PoolInner {
                servers: unique,
                slots,
                transport,
                config,
                released: Notify::new(),
                next_connection_id: AtomicU64::new(1),
                connects: AtomicU64::new(0),
                connect_failures: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn servers(&self) -> &[ServerAddress] {
        &self.inner.servers
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection to any server not in `exclude`.
    ///
    /// Waits for a free slot when every eligible server is at capacity,
    /// bounded by the configured acquire timeout.
    #[instrument(level = "debug", skip(self, exclude), fields(excluded = exclude.len()))]
    pub async fn acquire(&self, exclude: &HashSet<ServerAddress>) -> Result<PooledConnection, PoolError> {
        let candidates: Vec<&ServerAddress> = self
            .inner
            .servers
            .iter()
            .filter(|server| !exclude.contains(*server))
            .collect();
        if candidates.is_empty() {
            debug!("Every known server is excluded");
            return Err(PoolError::NoServerAvailable {
                excluded: exclude.len(),
            });
        }

        let timeout = self.inner.config.acquire_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for release notifications before looking, so a
            // release between the look and the wait is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(lease) = self.try_reserve(&candidates) {
                return self.checkout(lease).await;
            }

            trace!("All eligible servers at capacity, waiting for a release");
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                warn!(timeout = ?timeout, "Timed out waiting for a free connection slot");
                return Err(PoolError::AcquireTimeout { timeout });
            }
        }
    }

    fn try_reserve(&self, candidates: &[&ServerAddress]) -> Option<Lease> {
        let mut ranked: Vec<(&ServerAddress, &ServerSlot)> = candidates
            .iter()
            .filter_map(|server| self.inner.slots.get(*server).map(|slot| (*server, slot)))
            .collect();

        if self.inner.config.selection == ServerSelection::LeastLoaded {
            ranked.shuffle(&mut rand::thread_rng());
            // Stable sort keeps the shuffled order among equally loaded servers
            ranked.sort_by_cached_key(|(_, slot)| {
                let has_idle = !lock(&slot.idle).is_empty();
                (!has_idle, slot.live.load(Ordering::Acquire))
            });
        }

        ranked.into_iter().find_map(|(server, slot)| {
            Arc::clone(&slot.permits)
                .try_acquire_owned()
                .ok()
                .map(|permit| Lease {
                    pool: Arc::clone(&self.inner),
                    server: server.clone(),
                    permit: Some(permit),
                    holds_connection: false,
                })
        })
    }

    async fn checkout(&self, mut lease: Lease) -> Result<PooledConnection, PoolError> {
        let slot = &self.inner.slots[&lease.server];

        loop {
            let idle = lock(&slot.idle).pop_front();
            let Some(mut connection) = idle else {
                break;
            };
            lease.holds_connection = true;

            if connection.owed_replies() > 0 {
                let timeout = self.inner.config.stale_reply_timeout;
                if let Err(error) = connection.discard_owed_replies(timeout).await {
                    warn!(
                        connection_id = connection.id(),
                        server = %lease.server,
                        "Closing connection still owing a reply: {}",
                        error
                    );
                    drop(connection);
                    slot.live.fetch_sub(1, Ordering::AcqRel);
                    self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                    lease.holds_connection = false;
                    continue;
                }
            }

            connection.touch();
            debug!(
                connection_id = connection.id(),
                server = %lease.server,
                "Reusing idle connection"
            );
            return Ok(PooledConnection { connection, lease });
        }

        let connect_timeout = self.inner.config.connect_timeout;
        let connect = self.inner.transport.connect(&lease.server);
        let stream = match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.inner.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to connect to {}: {}", lease.server, source);
                return Err(PoolError::Connect {
                    server: lease.server.clone(),
                    source,
                });
            }
            Err(_elapsed) => {
                self.inner.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Connect to {} timed out after {:?}", lease.server, connect_timeout);
                return Err(PoolError::Connect {
                    server: lease.server.clone(),
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", connect_timeout),
                    ),
                });
            }
        };

        slot.live.fetch_add(1, Ordering::AcqRel);
        lease.holds_connection = true;
        self.inner.connects.fetch_add(1, Ordering::Relaxed);

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, server = %lease.server, "Opened new connection");
        let connection = Connection::new(
            id,
            lease.server.clone(),
            stream,
            self.inner.config.wire_config.clone(),
        );
        Ok(PooledConnection { connection, lease })
    }

    /// Return a checked-out connection, annotated with the attempt outcome
    pub fn release(&self, connection: PooledConnection, outcome: Outcome) {
        connection.release(outcome);
    }

    /// Close idle connections unused for longer than `max_idle`
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let mut pruned = 0;
        for (server, slot) in &self.inner.slots {
            let stale: Vec<Connection> = {
                let mut idle = lock(&slot.idle);
                let (stale, fresh): (VecDeque<Connection>, VecDeque<Connection>) = idle
                    .drain(..)
                    .partition(|connection| connection.last_used().elapsed() >= max_idle);
                *idle = fresh;
                stale.into_iter().collect()
            };
            if !stale.is_empty() {
                debug!("Pruning {} idle connections to {}", stale.len(), server);
                slot.live.fetch_sub(stale.len(), Ordering::AcqRel);
                self.inner.evictions.fetch_add(stale.len() as u64, Ordering::Relaxed);
                pruned += stale.len();
            }
        }
        pruned
    }

    /// Close every idle connection; checked-out connections are unaffected
    pub fn close_idle(&self) -> usize {
        self.prune_idle(Duration::ZERO)
    }

    pub fn status(&self) -> PoolStatus {
        let max = self.inner.config.max_connections_per_server.max(1);
        let servers = self
            .inner
            .servers
            .iter()
            .filter_map(|server| {
                let slot = self.inner.slots.get(server)?;
                Some(ServerStatus {
                    server: server.clone(),
                    live: slot.live.load(Ordering::Acquire),
                    idle: lock(&slot.idle).len(),
                    in_use: max - slot.permits.available_permits(),
                })
            })
            .collect();

        PoolStatus {
            servers,
            connects: self.inner.connects.load(Ordering::Relaxed),
            connect_failures: self.inner.connect_failures.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("servers", &self.inner.servers)
            .field("config", &self.inner.config)
            .finish()
    }
}
