//! Pooled-connection manager: one cached outbound connection per logical
//! destination, with keep-alive and TTL-eviction background loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use skiff_types::LogicalNode;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::channel::{Channel, Connector};
use crate::error::NetError;
use crate::message::{WireRequest, WireResponse};

/// Pool timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Interval between keep-alive passes.
    pub keepalive_interval: Duration,
    /// Interval between TTL-eviction sweeps.
    pub sweep_interval: Duration,
    /// Idle age after which a connection is evicted.
    pub idle_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(25),
            sweep_interval: Duration::from_secs(10 * 60),
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// One pooled connection. At most one per logical node is reachable from
/// the pool at any time; once its channel leaves a usable state it is
/// replaced and never handed out again.
pub struct PooledConnection {
    node: LogicalNode,
    channel: Arc<dyn Channel>,
    created: Instant,
    /// Calls currently in flight on this connection.
    in_flight: AtomicU32,
}

impl PooledConnection {
    /// The destination this connection serves.
    pub fn node(&self) -> &LogicalNode {
        &self.node
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// When the connection was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// RAII handle to an acquired connection.
///
/// Holds the in-flight count for its lifetime; the count drops on all exit
/// paths when the guard does. [`ConnectionGuard::call`] aborts the
/// connection on any RPC failure so a stale channel is never silently
/// retried within the same call.
pub struct ConnectionGuard {
    conn: Arc<PooledConnection>,
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("node", self.conn.node())
            .field("in_flight", &self.conn.in_flight())
            .finish()
    }
}

impl ConnectionGuard {
    /// The pooled connection behind this guard.
    pub fn connection(&self) -> &Arc<PooledConnection> {
        &self.conn
    }

    /// Issue a request on the connection, aborting it on failure.
    pub async fn call(&self, request: &WireRequest) -> Result<WireResponse, NetError> {
        match self.conn.channel.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Mark the connection faulted and tear it down off the hot path.
    /// The next acquire for this node creates a replacement.
    pub fn abort(&self) {
        self.conn.channel.mark_faulted();
        let channel = self.conn.channel.clone();
        tokio::spawn(async move {
            channel.close().await;
        });
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PoolInner {
    conns: HashMap<LogicalNode, Arc<PooledConnection>>,
    /// Last acquire or successful keep-alive per node. Drives eviction.
    last_active: HashMap<LogicalNode, Instant>,
}

/// Per-logical-name cache of outbound connections.
///
/// A single pool-wide mutex guards the map. It is deliberately held across
/// the (rare) connect path as well: concurrent acquires for the same name
/// would otherwise each open a connection and overwrite one another, which
/// is exactly the single-flight guarantee the pool exists to provide.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionPool {
    /// Create a pool over the given connector. Background loops are not
    /// running until [`ConnectionPool::start`] is called.
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            connector,
            config,
            inner: Mutex::new(PoolInner {
                conns: HashMap::new(),
                last_active: HashMap::new(),
            }),
            shutdown_tx,
        })
    }

    /// Spawn the keep-alive and TTL-eviction loops.
    pub fn start(self: &Arc<Self>) {
        let pool = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.keepalive_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => pool.keepalive_pass().await,
                    _ = shutdown_rx.changed() => {
                        debug!("keep-alive loop stopped");
                        break;
                    }
                }
            }
        });

        let pool = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => pool.sweep_pass().await,
                    _ = shutdown_rx.changed() => {
                        debug!("eviction loop stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the background loops. In-flight guards stay valid.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get a healthy connection to `node`, creating or replacing as needed.
    pub async fn acquire(&self, node: &LogicalNode) -> Result<ConnectionGuard, NetError> {
        if *self.shutdown_tx.borrow() {
            return Err(NetError::PoolShutDown);
        }

        let mut inner = self.inner.lock().await;

        let reusable = match inner.conns.get(node) {
            Some(conn)
                if conn.channel.state().is_usable()
                    && conn.channel.scheme() == self.connector.scheme() =>
            {
                Some(conn.clone())
            }
            Some(conn) => {
                // Unhealthy or scheme-mismatched: discard off the hot path.
                debug!(
                    %node,
                    state = ?conn.channel.state(),
                    "replacing pooled connection"
                );
                let old = conn.clone();
                inner.conns.remove(node);
                tokio::spawn(async move {
                    old.channel.close().await;
                });
                None
            }
            None => None,
        };

        let conn = match reusable {
            Some(conn) => conn,
            None => {
                let channel = self.connector.connect(node).await?;
                let conn = Arc::new(PooledConnection {
                    node: node.clone(),
                    channel,
                    created: Instant::now(),
                    in_flight: AtomicU32::new(0),
                });
                inner.conns.insert(node.clone(), conn.clone());
                info!(%node, "opened pooled connection");
                conn
            }
        };

        inner.last_active.insert(node.clone(), Instant::now());
        conn.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionGuard { conn })
    }

    /// One keep-alive pass: ping every connection that is not unhealthy.
    ///
    /// The candidate list is snapshotted under the lock; pings happen
    /// outside it. Ping failures are ignored here — the next acquire
    /// observes the faulted state and replaces the connection.
    pub(crate) async fn keepalive_pass(&self) {
        let candidates: Vec<Arc<PooledConnection>> = {
            let inner = self.inner.lock().await;
            inner
                .conns
                .values()
                .filter(|conn| conn.channel.state().is_usable())
                .cloned()
                .collect()
        };

        for conn in candidates {
            match conn.channel.ping().await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    inner.last_active.insert(conn.node.clone(), Instant::now());
                    debug!(node = %conn.node, in_flight = conn.in_flight(), "keep-alive ok");
                }
                Err(e) => {
                    warn!(node = %conn.node, "keep-alive ping failed: {e}");
                }
            }
        }
    }

    /// One eviction pass: drop connections idle longer than the TTL.
    pub(crate) async fn sweep_pass(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let expired: Vec<LogicalNode> = inner
            .last_active
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > self.config.idle_ttl)
            .map(|(node, _)| node.clone())
            .collect();

        for node in expired {
            inner.last_active.remove(&node);
            // A timestamp without a connection is a no-op, not an error.
            if let Some(conn) = inner.conns.remove(&node) {
                info!(%node, "evicting idle connection");
                tokio::spawn(async move {
                    conn.channel.close().await;
                });
            }
        }
    }

    /// Number of pooled connections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.conns.len()
    }

    /// Whether the pool holds no connections.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.conns.is_empty()
    }

    /// Whether a connection for `node` is currently pooled.
    pub async fn contains(&self, node: &LogicalNode) -> bool {
        self.inner.lock().await.conns.contains_key(node)
    }
}
