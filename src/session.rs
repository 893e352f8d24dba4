//! Ambient, per-task connection binding.
//!
//! The query entrypoints in [`crate::query`] always take an explicit [`Executor`]; this
//! module layers the "no connection argument" shape on top by stashing a checked-out
//! connection (or an open transaction) in a [`tokio::task_local!`] slot for the duration
//! of a scope. [`with_conn`] and [`transaction`] are the only things that ever write to
//! the slot; it is always restored — on return, on error, and on panic/unwind, since
//! `tokio::task_local`'s `scope` future owns the value for exactly the lifetime of the
//! inner future and drops it when that future does, by ordinary Rust drop semantics.
use std::{
    future::Future,
    io,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use tokio::task_local;

use crate::{
    Error, Result,
    executor::Executor,
    pool::{CheckoutOpts, Pool, PoolConnection},
    postgres::{BackendProtocol, FrontendProtocol, backend, frontend},
    statement::StatementName,
    transaction::Transaction,
    transport::{PgTransport, PgTransportExt},
};

task_local! {
    static AMBIENT: Arc<Mutex<Slot>>;
}

struct Slot {
    pool_id: u64,
    binding: Binding,
}

enum Binding {
    Conn(PoolConnection),
    Tx(Transaction<PoolConnection>),
}

impl PgTransport for Binding {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        match self {
            Self::Conn(c) => c.poll_flush(cx),
            Self::Tx(t) => t.poll_flush(cx),
        }
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        match self {
            Self::Conn(c) => c.poll_recv(cx),
            Self::Tx(t) => t.poll_recv(cx),
        }
    }

    fn ready_request(&mut self) {
        match self {
            Self::Conn(c) => c.ready_request(),
            Self::Tx(t) => t.ready_request(),
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        match self {
            Self::Conn(c) => c.send(message),
            Self::Tx(t) => t.send(message),
        }
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        match self {
            Self::Conn(c) => c.send_startup(startup),
            Self::Tx(t) => t.send_startup(startup),
        }
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        match self {
            Self::Conn(c) => c.get_stmt(sql),
            Self::Tx(t) => t.get_stmt(sql),
        }
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        match self {
            Self::Conn(c) => c.add_stmt(sql, id),
            Self::Tx(t) => t.add_stmt(sql, id),
        }
    }
}

/// A zero-sized [`PgTransport`]/[`Executor`] that reaches into the ambient slot on
/// every call. Cheap to construct; never holds the connection across an `.await`
/// itself, so it carries no lifetime tied to the scope that created the binding.
#[derive(Debug, Clone, Copy)]
pub struct AmbientConnection;

impl Executor for AmbientConnection {
    type Transport = AmbientConnection;
    type Future = std::future::Ready<Result<AmbientConnection>>;

    fn connection(self) -> Self::Future {
        let bound = AMBIENT.try_with(|_| ()).is_ok();
        std::future::ready(match bound {
            true => Ok(AmbientConnection),
            false => Err(Error::no_ambient_connection()),
        })
    }
}

impl PgTransport for AmbientConnection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.poll_flush(cx))
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.poll_recv(cx))
    }

    fn ready_request(&mut self) {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.ready_request())
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.send(message))
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.send_startup(startup))
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.get_stmt(sql))
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        AMBIENT.with(|slot| slot.lock().unwrap().binding.add_stmt(sql, id))
    }
}

/// Entrypoint of the query API against the ambient connection.
///
/// # Errors
///
/// The returned fetch resolves to [`Error::no_ambient_connection`][1] if called outside
/// [`transaction`] or [`with_conn`].
///
/// [1]: crate::error::ErrorKind::NoAmbientConnection
#[inline]
pub fn query<'val, SQL>(sql: SQL) -> crate::query::Query<'val, SQL, AmbientConnection, crate::query::StreamRow<crate::Row>> {
    crate::query::query(sql, AmbientConnection)
}

/// Entrypoint of the query API against the ambient connection, for statements that
/// don't return rows. Alias of [`query`].
#[inline]
pub fn execute<'val, SQL>(sql: SQL) -> crate::query::Query<'val, SQL, AmbientConnection, crate::query::StreamRow<crate::Row>> {
    query(sql)
}

/// Like [`query`], decoding rows into `R` via [`FromRow`][crate::FromRow].
#[inline]
pub fn query_as<'val, SQL, R>(sql: SQL) -> crate::query::Query<'val, SQL, AmbientConnection, crate::query::StreamRow<R>> {
    crate::query::query_as(sql, AmbientConnection)
}

/// Like [`query`], decoding a single column via [`Decode`][crate::Decode].
#[inline]
pub fn query_scalar<'val, SQL, D>(sql: SQL) -> crate::query::Query<'val, SQL, AmbientConnection, crate::query::StreamScalar<D>> {
    crate::query::query_scalar(sql, AmbientConnection)
}

/// Binds `conn` as the ambient connection for the duration of `f`, restoring
/// whatever was bound before (if anything) once `f` resolves, errors, or unwinds.
///
/// Unlike [`transaction`], this does not send `BEGIN`/`COMMIT`: it only makes `conn`
/// implicit for nested [`query`]/[`execute`] calls inside `f`.
pub async fn with_conn<F, Fut, T>(conn: PoolConnection, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let pool_id = conn.pool().id();
    let slot = Arc::new(Mutex::new(Slot { pool_id, binding: Binding::Conn(conn) }));
    AMBIENT.scope(slot, f()).await
}

/// Runs `f` inside a transaction against `pool`, binding the transaction's connection
/// ambiently so nested [`query`]/[`execute`] calls don't need it threaded through.
///
/// - If an ambient connection is already bound (nested call, any pool): the nested
///   transaction is inlined — `f` just runs against the existing binding, with no
///   second `BEGIN`/`COMMIT` and no `SAVEPOINT` (this core does not expose one).
/// - Otherwise: checks out a connection from `pool`, sends `BEGIN`, binds it ambiently,
///   runs `f`, then `COMMIT`s on `Ok` or lets the bound [`Transaction`]'s `Drop` send
///   `ROLLBACK` on `Err` (drained lazily on the connection's next poll, same as the
///   explicit [`crate::transaction`] entrypoint).
pub async fn transaction<F, Fut, T, E>(pool: &Pool, f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<crate::Error>,
{
    if AMBIENT.try_with(|_| ()).is_ok() {
        return f().await;
    }

    // Same handshake as `phase::begin`, run directly on the owned `PoolConnection`:
    // `begin` is generic over `Exec: Executor`, which only a `&mut PoolConnection` (not
    // an owned one) satisfies, and the binding needs to own its connection to outlive
    // this function's stack frame for the duration of the ambient scope.
    let mut conn = pool.checkout(CheckoutOpts::default()).await?;
    conn.send(frontend::Query { sql: "BEGIN" });
    conn.flush().await.map_err(Error::from)?;
    conn.recv::<backend::CommandComplete>().await?;
    let ready = conn.recv::<backend::ReadyForQuery>().await?;
    assert_eq!(ready.tx_status, b'T');
    let tx = Transaction::new(conn);

    let slot = Arc::new(Mutex::new(Slot { pool_id: pool.id(), binding: Binding::Tx(tx) }));
    let handle = slot.clone();

    let result = AMBIENT.scope(slot, f()).await;

    // `scope` dropped its own clone once `f()` resolved; `handle` is the only one left.
    let slot = Arc::try_unwrap(handle)
        .unwrap_or_else(|_| unreachable!("ambient slot outlived its scope"))
        .into_inner()
        .unwrap();
    let tx = match slot.binding {
        Binding::Tx(tx) => tx,
        Binding::Conn(_) => unreachable!("transaction always binds a Transaction"),
    };

    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        },
        Err(err) => {
            drop(tx); // rolls back on drop, drained lazily on the connection's next poll
            Err(err)
        },
    }
}

/// An [`Executor`] that targets `pool`, honoring an existing ambient binding instead
/// of silently opening a second connection against it.
///
/// Built by [`in_pool`]; pass the result as the `exe` argument to [`crate::query::query`]
/// (or its siblings) to get the cross-pool guard for a specific call.
pub struct InPool {
    pool: Pool,
}

/// Targets `pool` for one call, honoring an ambient binding to the *same* pool and
/// refusing (rather than silently bypassing) an ambient binding to a *different* one.
///
/// ```no_run
/// # async fn app(main: pgcore::Pool, other: pgcore::Pool) -> pgcore::Result<()> {
/// pgcore::session::transaction(&main, || async {
///     // fails fast with `in_other_pool_transaction`, without touching `other`
///     pgcore::query::query("SELECT 1", pgcore::session::in_pool(&other)).fetch_all().await
/// }).await
/// # }
/// ```
pub fn in_pool(pool: &Pool) -> InPool {
    InPool { pool: pool.clone() }
}

/// [`InPool`]'s resolved transport: either the ambient connection (same pool) or a
/// freshly checked-out one (no ambient binding was active).
pub enum InPoolTransport {
    Ambient(AmbientConnection),
    Pooled(PoolConnection),
}

impl PgTransport for InPoolTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        match self {
            Self::Ambient(a) => a.poll_flush(cx),
            Self::Pooled(p) => p.poll_flush(cx),
        }
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        match self {
            Self::Ambient(a) => a.poll_recv(cx),
            Self::Pooled(p) => p.poll_recv(cx),
        }
    }

    fn ready_request(&mut self) {
        match self {
            Self::Ambient(a) => a.ready_request(),
            Self::Pooled(p) => p.ready_request(),
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        match self {
            Self::Ambient(a) => a.send(message),
            Self::Pooled(p) => p.send(message),
        }
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        match self {
            Self::Ambient(a) => a.send_startup(startup),
            Self::Pooled(p) => p.send_startup(startup),
        }
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        match self {
            Self::Ambient(a) => a.get_stmt(sql),
            Self::Pooled(p) => p.get_stmt(sql),
        }
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        match self {
            Self::Ambient(a) => a.add_stmt(sql, id),
            Self::Pooled(p) => p.add_stmt(sql, id),
        }
    }
}

impl Executor for InPool {
    type Transport = InPoolTransport;
    type Future = std::pin::Pin<Box<dyn Future<Output = Result<InPoolTransport>> + Send>>;

    fn connection(self) -> Self::Future {
        let pool = self.pool;
        Box::pin(async move {
            if let Ok(bound_pool_id) = AMBIENT.try_with(|slot| slot.lock().unwrap().pool_id) {
                if bound_pool_id != pool.id() {
                    return Err(Error::in_other_pool_transaction(bound_pool_id));
                }
                return Ok(InPoolTransport::Ambient(AmbientConnection));
            }

            Ok(InPoolTransport::Pooled(pool.connection().await?))
        })
    }
}
