//! Bounded pool of reusable transport handles.
//!
//! Every pool mutation happens under one mutex per pool. The lock is never
//! held across an await: acquisition is synchronous, and the background
//! health checker marks free entries as probing, probes them unlocked, then
//! relocks to apply the verdicts. Probing never hides an entry from
//! `acquire`; an entry that fails its probe while borrowed is discarded when
//! it is released.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vector_core::{Connection, Connector, Endpoint, VectorError, VectorResult};

/// Configuration for connection pool behavior
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: usize,
    /// Maximum time a free connection can stay unused before eviction
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Interval between background health scans
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

struct PoolEntry {
    id: u64,
    endpoint: Endpoint,
    handle: Arc<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
    probing: bool,
    /// Failed a probe while borrowed; removed on release
    discard: bool,
}

impl PoolEntry {
    fn is_idle_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        !self.in_use && now.duration_since(self.last_used) > idle_timeout
    }
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    next_id: u64,
    closed: bool,
}

impl PoolState {
    fn release(&mut self, id: u64) {
        let Some(index) = self.entries.iter().position(|e| e.id == id) else {
            return;
        };
        if self.entries[index].discard {
            self.entries.swap_remove(index);
            debug!(connection_id = id, "Discarded unhealthy connection on release");
            return;
        }
        let entry = &mut self.entries[index];
        entry.in_use = false;
        entry.last_used = Instant::now();
    }
}

/// A bounded pool of transport handles, keyed by endpoint.
pub struct ConnectionPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    state: Arc<Mutex<PoolState>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create an empty pool; handles are created lazily on first need.
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            config,
            connector,
            state: Arc::new(Mutex::new(PoolState::default())),
            health_task: Mutex::new(None),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow a connection bound to `endpoint`.
    ///
    /// A free, non-expired entry for the endpoint is reused; otherwise a new
    /// handle is created if the pool has capacity. The connection returns to
    /// the pool when the guard is dropped, on every exit path.
    ///
    /// # Errors
    /// Returns `VectorError::PoolExhausted` when every slot is in use
    pub fn acquire(&self, endpoint: &Endpoint) -> VectorResult<PooledConnection> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(VectorError::internal("connection pool is closed"));
        }

        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        state
            .entries
            .retain(|entry| !entry.is_idle_expired(now, idle_timeout));

        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| !entry.in_use && entry.endpoint == *endpoint)
        {
            entry.in_use = true;
            entry.last_used = now;
            return Ok(PooledConnection {
                id: entry.id,
                endpoint: entry.endpoint.clone(),
                handle: Arc::clone(&entry.handle),
                pool: Arc::downgrade(&self.state),
            });
        }

        if state.entries.len() >= self.config.max_connections {
            debug!(
                endpoint = %endpoint,
                max_connections = self.config.max_connections,
                "Connection pool exhausted"
            );
            return Err(VectorError::pool_exhausted(
                endpoint.to_string(),
                self.config.max_connections,
            ));
        }

        let handle = self.connector.connect(endpoint)?;
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(PoolEntry {
            id,
            endpoint: endpoint.clone(),
            handle: Arc::clone(&handle),
            created_at: now,
            last_used: now,
            in_use: true,
            probing: false,
            discard: false,
        });
        debug!(
            endpoint = %endpoint,
            connection_id = id,
            connector = self.connector.name(),
            total = state.entries.len(),
            "Created pooled connection"
        );

        Ok(PooledConnection {
            id,
            endpoint: endpoint.clone(),
            handle,
            pool: Arc::downgrade(&self.state),
        })
    }

    /// Return a connection to the pool.
    ///
    /// Equivalent to dropping the guard.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Run one health scan: evict idle-expired entries and probe the rest of
    /// the free entries, removing those whose probe fails.
    ///
    /// Entries stay available to `acquire` while their probe is in flight. A
    /// failed entry that was borrowed meanwhile is removed when released.
    ///
    /// Returns the number of evicted or condemned connections.
    pub async fn check_health(&self) -> usize {
        run_health_scan(&self.state, self.config.idle_timeout).await
    }

    /// Spawn the background health checker on the current runtime.
    ///
    /// Does nothing when called outside a runtime or when already running.
    pub fn start_health_checker(&self) {
        let mut task = self.health_task.lock();
        if task.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, pool health checker not started");
            return;
        };

        let state = Arc::downgrade(&self.state);
        let period = self.config.health_check_interval;
        let idle_timeout = self.config.idle_timeout;

        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                run_health_scan(&state, idle_timeout).await;
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Pool health checker started");
    }

    /// Current pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let in_use = state.entries.iter().filter(|e| e.in_use).count();
        let oldest = state
            .entries
            .iter()
            .map(|e| e.created_at.elapsed())
            .max();
        PoolStats {
            total: state.entries.len(),
            in_use,
            idle: state.entries.len() - in_use,
            max_connections: self.config.max_connections,
            oldest_connection_age: oldest,
        }
    }

    /// Stop the health checker and drop every pooled connection.
    ///
    /// Connections still borrowed are discarded when their guards drop.
    pub fn close(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.closed = true;
        info!(connections = dropped, "Connection pool closed");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("connector", &self.connector.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Entries marked as probing; clears the marks on drop.
struct ProbeReservation<'a> {
    state: &'a Mutex<PoolState>,
    ids: Vec<u64>,
}

impl Drop for ProbeReservation<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        for entry in &mut state.entries {
            if self.ids.contains(&entry.id) {
                entry.probing = false;
            }
        }
    }
}

async fn run_health_scan(state: &Mutex<PoolState>, idle_timeout: Duration) -> usize {
    let (expired, probes) = {
        let mut guard = state.lock();
        let now = Instant::now();
        let before = guard.entries.len();
        guard
            .entries
            .retain(|entry| !entry.is_idle_expired(now, idle_timeout));
        let expired = before - guard.entries.len();

        let probes: Vec<(u64, Arc<dyn Connection>)> = guard
            .entries
            .iter_mut()
            .filter(|entry| !entry.in_use && !entry.probing)
            .map(|entry| {
                entry.probing = true;
                (entry.id, Arc::clone(&entry.handle))
            })
            .collect();
        (expired, probes)
    };

    if expired > 0 {
        warn!(evicted = expired, "Evicted idle-expired pooled connections");
    }
    if probes.is_empty() {
        return expired;
    }

    let reservation = ProbeReservation {
        state,
        ids: probes.iter().map(|(id, _)| *id).collect(),
    };

    let results = join_all(probes.iter().map(|(id, handle)| async move {
        (*id, handle.heartbeat().await)
    }))
    .await;

    let failed: Vec<u64> = results
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(()) => None,
            Err(error) => {
                warn!(connection_id = id, error = %error, "Pooled connection failed health probe");
                Some(id)
            }
        })
        .collect();

    if !failed.is_empty() {
        let mut guard = state.lock();
        for entry in guard.entries.iter_mut().filter(|e| failed.contains(&e.id)) {
            entry.discard = true;
        }
        guard
            .entries
            .retain(|entry| entry.in_use || !failed.contains(&entry.id));
    }
    drop(reservation);

    expired + failed.len()
}

/// A borrowed connection; returns itself to the pool when dropped.
pub struct PooledConnection {
    id: u64,
    endpoint: Endpoint,
    handle: Arc<dyn Connection>,
    pool: Weak<Mutex<PoolState>>,
}

impl PooledConnection {
    /// Pool-assigned connection id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint the connection is bound to
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.lock().release(self.id);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pooled connections
    pub total: usize,
    /// Connections currently borrowed
    pub in_use: usize,
    /// Connections free for reuse
    pub idle: usize,
    /// Maximum pool size
    pub max_connections: usize,
    /// Age of the oldest pooled connection
    #[serde(with = "humantime_serde")]
    pub oldest_connection_age: Option<Duration>,
}

impl PoolStats {
    /// Get pool utilization as a fraction of capacity
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_connections as f64
        }
    }
}
