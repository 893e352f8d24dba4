//! The [`Transaction`] type.
use std::io;

use crate::{
    Result,
    executor::Executor,
    postgres::{
        BackendProtocol, backend,
        frontend::{self, FrontendProtocol},
    },
    statement::StatementName,
    transport::{PgTransport, PgTransportExt},
};

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`begin`][crate::begin] function.
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: pgcore::Connection) -> pgcore::Result<()> {
/// let mut tx = pgcore::begin(&mut conn).await?;
///
/// pgcore::execute("insert into post(name) values('foo')", &mut tx)
///     .execute()
///     .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<IO: PgTransport> {
    io: IO,
    commited: bool,
}

impl<IO> Transaction<IO>
where
    IO: PgTransport
{
    pub(crate) fn new(io: IO) -> Self {
        Self { io, commited: false }
    }

    /// Commit transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "COMMIT" });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        let r = self.io.recv::<backend::ReadyForQuery>().await?;
        assert_eq!(r.tx_status,b'I');
        self.commited = true;
        Ok(())
    }
}

impl<IO> Drop for Transaction<IO>
where
    IO: PgTransport
{
    fn drop(&mut self) {
        if !self.commited {
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

impl<IO> PgTransport for Transaction<IO>
where
    IO: PgTransport
{
    fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<B>> {
        IO::poll_recv(&mut self.io, cx)
    }

    fn ready_request(&mut self) {
        IO::ready_request(&mut self.io)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        IO::send(&mut self.io, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        IO::send_startup(&mut self.io, startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        IO::get_stmt(&mut self.io, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        IO::add_stmt(&mut self.io, sql, id)
    }
}

/// Run `f` inside a transaction, committing on success and letting the
/// transaction's [`Drop`] roll back on error.
///
/// This is the explicit-closure counterpart to manually [`begin`][crate::begin]ning
/// and [`commit`][Transaction::commit]ing a [`Transaction`]: the closure is simpler
/// to use correctly, since it cannot forget to resolve the transaction.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: pgcore::Connection) -> pgcore::Result<()> {
/// pgcore::transaction(&mut conn, |tx| async move {
///     pgcore::execute("insert into post(name) values('foo')", tx)
///         .execute()
///         .await?;
///     Ok(())
/// }).await
/// # }
/// ```
pub async fn transaction<Exec, F, Fut, T, E>(exec: Exec, f: F) -> std::result::Result<T, E>
where
    Exec: Executor,
    F: FnOnce(&mut Transaction<Exec::Transport>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<crate::Error>,
{
    let mut tx = crate::phase::begin(exec).await?;
    let output = f(&mut tx).await?;
    tx.commit().await?;
    Ok(output)
}

