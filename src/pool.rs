//! Bounded pool of reusable remote-capability connections.
//!
//! Acquisition is idle-first: an idle connection is reused before a new
//! one is opened, and the pool never exceeds its configured ceiling.
//! When the pool is saturated, acquirers park in a FIFO queue and are
//! woken by releases. Connections are handed out inside a
//! [`ConnectionGuard`] that returns them on drop, so every exit path
//! (success, error, abandoned wait) releases exactly once.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Opens handles to the remote capability. Injected by the caller; the
/// pool never knows what a handle actually is.
#[async_trait]
pub trait Connector<H>: Send + Sync {
    async fn connect(&self) -> Result<H, PoolError>;
}

/// A connection owned by the pool and borrowed by one caller at a time.
#[derive(Debug)]
pub struct PooledConnection<H> {
    pub id: Uuid,
    pub handle: H,
    created_at: Instant,
    last_used: Instant,
}

impl<H> PooledConnection<H> {
    fn new(handle: H) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            handle,
            created_at: now,
            last_used: now,
        }
    }

    /// How long ago this connection was opened.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// How long ago this connection last finished an operation.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used.elapsed()
    }
}

/// Point-in-time pool counters. Never blocks beyond the internal lock.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
}

struct PoolState<H> {
    idle: VecDeque<PooledConnection<H>>,
    /// Longest-waiting acquirer at the front. Senders whose receiver has
    /// been dropped (abandoned waits) are skipped at release time.
    waiters: VecDeque<oneshot::Sender<PooledConnection<H>>>,
    total: usize,
    in_use: usize,
    draining: bool,
}

struct PoolShared<H> {
    state: Mutex<PoolState<H>>,
    /// Signalled whenever an in-use connection comes back during drain.
    drain_progress: Notify,
    connector: Arc<dyn Connector<H>>,
    config: PoolConfig,
}

impl<H: Send + 'static> PoolShared<H> {
    /// Return a connection to the pool: hand it to the longest parked
    /// acquirer, or mark it idle. Runs entirely under the state lock so a
    /// released connection can never be lost between release and wake.
    fn release(&self, mut conn: PooledConnection<H>) {
        conn.last_used = Instant::now();
        let mut state = self.state.lock().expect("pool lock poisoned");

        if state.draining {
            state.total -= 1;
            state.in_use -= 1;
            drop(state);
            self.drain_progress.notify_waiters();
            return; // connection closed by drop
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(conn) {
                Ok(()) => return, // handed off, stays in use
                Err(returned) => conn = returned,
            }
        }

        state.in_use -= 1;
        state.idle.push_back(conn);
    }

    /// Undo a slot reservation after a failed connect.
    fn abandon_slot(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.total -= 1;
        state.in_use -= 1;
        drop(state);
        self.drain_progress.notify_waiters();
    }
}

/// Scoped borrow of a [`PooledConnection`]; releases on drop.
pub struct ConnectionGuard<H: Send + 'static> {
    conn: Option<PooledConnection<H>>,
    shared: Arc<PoolShared<H>>,
}

impl<H: Send + 'static> std::fmt::Debug for ConnectionGuard<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("conn_id", &self.conn.as_ref().map(|c| c.id))
            .finish()
    }
}

impl<H: Send + 'static> Deref for ConnectionGuard<H> {
    type Target = PooledConnection<H>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("guard accessed after release")
    }
}

impl<H: Send + 'static> DerefMut for ConnectionGuard<H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("guard accessed after release")
    }
}

impl<H: Send + 'static> Drop for ConnectionGuard<H> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}

/// Bounded connection pool. See module docs for the acquisition rules.
pub struct ConnectionPool<H: Send + 'static> {
    shared: Arc<PoolShared<H>>,
}

impl<H: Send + 'static> ConnectionPool<H> {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector<H>>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    waiters: VecDeque::new(),
                    total: 0,
                    in_use: 0,
                    draining: false,
                }),
                drain_progress: Notify::new(),
                connector,
                config,
            }),
        }
    }

    /// Open connections until `min_connections` exist. Called once at
    /// startup; safe to call again (it tops up, never exceeds the ceiling).
    pub async fn warm(&self) -> Result<(), PoolError> {
        loop {
            {
                let mut state = self.shared.state.lock().expect("pool lock poisoned");
                if state.draining || state.total >= self.shared.config.min_connections {
                    return Ok(());
                }
                state.total += 1; // reserve before the await
                state.in_use += 1;
            }
            match self.shared.connector.connect().await {
                Ok(handle) => {
                    let conn = PooledConnection::new(handle);
                    tracing::debug!(conn_id = %conn.id, "pool warmed connection");
                    let mut state = self.shared.state.lock().expect("pool lock poisoned");
                    state.in_use -= 1;
                    state.idle.push_back(conn);
                }
                Err(e) => {
                    self.shared.abandon_slot();
                    return Err(e);
                }
            }
        }
    }

    /// Borrow a connection: reuse an idle one, open a new one below the
    /// ceiling, or park FIFO until a release. Fails with
    /// [`PoolError::AcquireTimeout`] once the configured wait bound
    /// elapses and with [`PoolError::Drained`] after `drain()` has begun.
    pub async fn acquire(&self) -> Result<ConnectionGuard<H>, PoolError> {
        // Decide what to do while holding the lock, but perform every
        // `.await` after the lock scope ends. A conditional `drop` of the
        // guard would leave its storage slot (and a drop flag) live across
        // the connect await, which makes the future `!Send`; returning a
        // plain decision keeps the `MutexGuard` entirely out of the async
        // state machine.
        enum Acquired<H: Send + 'static> {
            Connect,
            Park(oneshot::Receiver<PooledConnection<H>>),
        }

        let decision = {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            if state.draining {
                return Err(PoolError::Drained);
            }

            if let Some(conn) = state.idle.pop_front() {
                state.in_use += 1;
                return Ok(self.guard(conn));
            }

            if state.total < self.shared.config.max_connections {
                state.total += 1; // reserve before the await
                state.in_use += 1;
                Acquired::Connect
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Acquired::Park(rx)
            }
        };

        let wait = match decision {
            Acquired::Connect => {
                return match self.shared.connector.connect().await {
                    Ok(handle) => {
                        let conn = PooledConnection::new(handle);
                        tracing::debug!(conn_id = %conn.id, "pool opened connection");
                        Ok(self.guard(conn))
                    }
                    Err(e) => {
                        self.shared.abandon_slot();
                        Err(e)
                    }
                };
            }
            Acquired::Park(rx) => rx,
        };

        match tokio::time::timeout(self.shared.config.acquire_timeout, wait).await {
            Ok(Ok(conn)) => Ok(self.guard(conn)),
            // Sender dropped: drain started while we were parked.
            Ok(Err(_)) => Err(PoolError::Drained),
            // Our sender stays queued; releases skip it once the receiver
            // is gone.
            Err(_) => Err(PoolError::AcquireTimeout {
                waited: self.shared.config.acquire_timeout,
            }),
        }
    }

    /// Scoped execution: acquire, run `op` with the guard, release when
    /// the guard drops — even if `op`'s future errors or is dropped.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, PoolError>
    where
        F: FnOnce(ConnectionGuard<H>) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        Ok(op(guard).await)
    }

    /// Stop accepting acquisitions, fail parked waiters, wait for in-use
    /// connections to come back, and close everything. Idempotent.
    pub async fn drain(&self) {
        let dropped_waiters = {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            state.draining = true;
            let closed_idle = state.idle.len();
            state.idle.clear();
            state.total -= closed_idle;
            state.waiters.drain(..).collect::<Vec<_>>()
        };
        // Receivers observe the dropped senders as `Drained`.
        drop(dropped_waiters);

        loop {
            let released = self.shared.drain_progress.notified();
            if self.shared.state.lock().expect("pool lock poisoned").in_use == 0 {
                break;
            }
            released.await;
        }

        tracing::info!("connection pool drained");
    }

    /// Point-in-time counters. Abandoned waits are not counted.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().expect("pool lock poisoned");
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.in_use,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    fn guard(&self, conn: PooledConnection<H>) -> ConnectionGuard<H> {
        ConnectionGuard {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Connector that yields sequence numbers and counts how many
    /// connections were ever opened.
    struct SeqConnector {
        opened: AtomicUsize,
    }

    impl SeqConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector<usize> for SeqConnector {
        async fn connect(&self) -> Result<usize, PoolError> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector<usize> for FailingConnector {
        async fn connect(&self) -> Result<usize, PoolError> {
            Err(PoolError::Connect {
                reason: "refused".to_string(),
            })
        }
    }

    fn config(min: usize, max: usize, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            acquire_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn acquire_reuses_released_connection() {
        let connector = SeqConnector::new();
        let pool = ConnectionPool::new(config(0, 3, 100), connector.clone());

        let first_id = {
            let guard = pool.acquire().await.unwrap();
            guard.id
        };

        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.id, first_id);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn warm_opens_min_connections() {
        let connector = SeqConnector::new();
        let pool = ConnectionPool::new(config(2, 5, 100), connector.clone());
        pool.warm().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);

        // A second warm is a no-op.
        pool.warm().await.unwrap();
        assert_eq!(pool.stats().total, 2);
    }

    #[tokio::test]
    async fn ceiling_blocks_then_timeout() {
        let pool = ConnectionPool::new(config(0, 1, 50), SeqConnector::new());

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { .. }));
        drop(held);

        // Release after the timed-out wait still lands in the idle set.
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn waiter_woken_by_release() {
        let pool = Arc::new(ConnectionPool::new(config(0, 1, 500), SeqConnector::new()));

        let held = pool.acquire().await.unwrap();
        let held_id = held.id;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let guard = pool.acquire().await.unwrap();
                guard.id
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().waiting, 1);
        drop(held);

        let woken_id = waiter.await.unwrap();
        assert_eq!(woken_id, held_id);
    }

    #[tokio::test]
    async fn waiters_served_fifo() {
        let pool = Arc::new(ConnectionPool::new(config(0, 1, 500), SeqConnector::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = pool.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let pool = Arc::clone(&pool);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = pool.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Ensure deterministic parking order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn execute_releases_on_error() {
        let pool = ConnectionPool::new(config(0, 1, 100), SeqConnector::new());

        let result: Result<std::result::Result<(), String>, PoolError> = pool
            .execute(|_conn| async { Err("operation blew up".to_string()) })
            .await;
        assert!(result.unwrap().is_err());

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn connect_failure_does_not_leak_slot() {
        let pool = ConnectionPool::new(config(0, 1, 50), Arc::new(FailingConnector));

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));

        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn drain_rejects_new_acquires() {
        let pool = ConnectionPool::new(config(0, 2, 50), SeqConnector::new());
        pool.acquire().await.unwrap(); // guard dropped immediately
        pool.drain().await;

        assert!(matches!(pool.acquire().await, Err(PoolError::Drained)));
        assert_eq!(pool.stats().total, 0);
    }

    #[tokio::test]
    async fn drain_fails_parked_waiters() {
        let pool = Arc::new(ConnectionPool::new(config(0, 1, 500), SeqConnector::new()));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let drainer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Drained)));
        drop(held);
        drainer.await.unwrap();
        assert_eq!(pool.stats().total, 0);
    }

    #[tokio::test]
    async fn drain_waits_for_in_use() {
        let pool = Arc::new(ConnectionPool::new(config(0, 1, 100), SeqConnector::new()));

        let guard = pool.acquire().await.unwrap();
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        pool.drain().await;
        holder.await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn stats_track_states() {
        let pool = ConnectionPool::new(config(0, 2, 100), SeqConnector::new());

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.idle, 0);

        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 2);
    }
}
