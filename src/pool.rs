//! Database connection pooling.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::{Connection, Result, executor::Executor, transport::PgTransport};

/// Assigns each [`Pool`] a process-unique id, used to tell pools apart in
/// [`crate::session`]'s cross-pool guard and as the type registry's pool namespace.
fn next_pool_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

mod config;
mod worker;

pub use config::PoolConfig;

/// Options for [`Pool::checkout`].
///
/// Defaults to queueing indefinitely behind a 30 second timeout; `queue(false)` turns a
/// checkout on an exhausted pool into an immediate [`PoolFull`][crate::error::ErrorKind::PoolFull]
/// instead of waiting for a connection to free up.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutOpts {
    queue: bool,
    timeout: Duration,
}

impl Default for CheckoutOpts {
    fn default() -> Self {
        Self { queue: true, timeout: Duration::from_secs(30) }
    }
}

impl CheckoutOpts {
    /// Whether to wait in line for a connection when the pool is at capacity. Defaults to `true`.
    pub fn queue(mut self, queue: bool) -> Self {
        self.queue = queue;
        self
    }

    /// How long to wait in the queue before giving up. Only relevant when `queue(true)`.
    /// Defaults to 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Database connection pool.
#[derive(Clone, Debug)]
pub struct Pool {
    handle: worker::WorkerHandle,
    id: u64,
}

impl Pool {
    /// Create [`Pool`] and try to create one connection.
    pub async fn connect(url: &str) -> Result<Self> {
        PoolConfig::from_env().connect(url).await
    }

    /// Create [`Pool`] without trying to create connection.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        PoolConfig::from_env().connect_lazy(url)
    }

    /// Create [`Pool`] and try to create one connection.
    ///
    /// See [`Config::from_env`][1] for more details on env.
    ///
    /// [1]: crate::Config::from_env
    pub async fn connect_env() -> Result<Pool> {
        Self::connect_with(PoolConfig::from_env()).await
    }

    /// Create [`Pool`] and try to create one connection.
    pub async fn connect_with(config: PoolConfig) -> Result<Self> {
        let (handle,worker) = worker::WorkerHandle::new(config);
        tokio::spawn(worker);
        Ok(Self { handle, id: next_pool_id() })
    }

    /// Create [`Pool`] without trying to create connection.
    pub fn connect_lazy_with(config: PoolConfig) -> Self {
        let (handle,worker) = worker::WorkerHandle::new(config);
        tokio::spawn(worker);
        Self { handle, id: next_pool_id() }
    }

    /// Process-unique id for this pool. Two [`Pool`] values obtained by cloning the
    /// same pool (e.g. across tasks) compare equal; two pools from separate
    /// `connect*` calls never do, even if they point at the same database.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn poll_connection(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<Connection>> {
        self.handle.poll_acquire(cx)
    }

    /// Check out a connection with explicit queueing/timeout behavior.
    ///
    /// Plain [`Executor::connection`] always queues with no timeout; use this when a caller
    /// needs to fail fast on an exhausted pool or bound how long it is willing to wait.
    pub async fn checkout(&self, opts: CheckoutOpts) -> Result<PoolConnection> {
        let started = Instant::now();
        let mut this = self.clone();

        let conn = if opts.queue {
            match tokio::time::timeout(opts.timeout, std::future::poll_fn(|cx| this.poll_connection(cx))).await {
                Ok(result) => result?,
                Err(_elapsed) => return Err(crate::Error::pool_timeout()),
            }
        } else {
            std::future::poll_fn(|cx| this.handle.poll_try_acquire(cx)).await?
        };

        Ok(PoolConnection { pool: self.clone(), conn: Some(conn), queue_time: started.elapsed(), broken: false })
    }
}

impl Executor for Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { pool: Some(self), started: Instant::now() }
    }
}

impl Executor for &Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { pool: Some(self.clone()), started: Instant::now() }
    }
}

impl Executor for &mut Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { pool: Some(self.clone()), started: Instant::now() }
    }
}

/// Future returned from [`Pool`] implementation of [`Executor::connection`].
#[derive(Debug)]
pub struct PoolConnect {
    pool: Option<Pool>,
    started: Instant,
}

impl Future for PoolConnect {
    type Output = Result<PoolConnection>;

    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let conn = std::task::ready!(self.pool.as_mut().unwrap().poll_connection(cx)?);
        std::task::Poll::Ready(Ok(PoolConnection {
            conn: Some(conn),
            pool: self.pool.take().unwrap(),
            queue_time: self.started.elapsed(),
            broken: false,
        }))
    }
}

/// Instance of [`Pool`] with the checked out connection.
#[derive(Debug)]
pub struct PoolConnection {
    pool: Pool,
    conn: Option<Connection>,
    queue_time: Duration,
    broken: bool,
}

impl PoolConnection {
    /// Returns the [`Pool`] handle.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Returns the underlying [`Connection`].
    pub fn connection(&mut self) -> &mut Connection {
        // `conn` only `None` on drop
        self.conn.as_mut().unwrap()
    }

    /// How long this connection spent waiting to be checked out.
    pub fn queue_time(&self) -> Duration {
        self.queue_time
    }

    /// Marks this connection as broken and consumes it: on drop it is terminated and
    /// removed from the pool instead of being checked back in.
    ///
    /// Call this after observing a protocol-level failure (e.g. `unexpected_message`)
    /// that leaves the session's state indeterminate — returning it to the idle set
    /// would hand a corrupt connection to the next caller.
    pub fn discard(mut self) {
        self.broken = true;
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        let conn = self.conn.take().unwrap();
        if self.broken {
            self.pool.handle.discard(conn);
        } else {
            self.pool.handle.release(conn);
        }
    }
}

impl PgTransport for PoolConnection {
    fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<std::io::Result<()>> {
        self.connection().poll_flush(cx)
    }

    fn poll_recv<B: crate::postgres::BackendProtocol>(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<B>> {
        self.connection().poll_recv(cx)
    }

    fn ready_request(&mut self) {
        self.connection().ready_request();
    }

    fn send<F: crate::postgres::FrontendProtocol>(&mut self, message: F) {
        self.connection().send(message);
    }

    fn send_startup(&mut self, startup: crate::postgres::frontend::Startup) {
        self.connection().send_startup(startup);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<crate::statement::StatementName> {
        self.connection().get_stmt(sql)
    }

    fn add_stmt(&mut self, sql: u64, id: crate::statement::StatementName) {
        self.connection().add_stmt(sql, id);
    }
}

