//! The [`Connection`] type.
mod config;

pub use config::{Config, ParseError, SslMode};

use std::{
    collections::HashMap,
    fmt, io,
    task::{Context, Poll, ready},
};

use bytes::{Buf, Bytes, BytesMut};
use md5::{Digest, Md5};

use crate::{
    Result,
    common::trace,
    io::{poll_read, poll_write_all},
    net::Socket,
    phase::{self, StartupResponse},
    postgres::{
        BackendProtocol,
        backend::{self, BackendMessage},
        frontend::{self, FrontendProtocol},
    },
    statement::StatementName,
    transport::PgTransport,
};

/// A single connection to a postgres server.
///
/// This is the lowest level of the crate's connection API: one TCP or Unix socket,
/// one statement cache, one in-flight request at a time. [`Pool`][crate::Pool] checks
/// these out and back in; [`Transaction`][crate::Transaction] wraps one to scope a
/// transaction block.
pub struct Connection {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    stmt_cache: HashMap<u64, StatementName>,
    backend_key_data: backend::BackendKeyData,
    /// set by `ready_request`, cleared once `ReadyForQuery` is observed
    drain: bool,
    /// `Terminate` already queued by `poll_shutdown`
    closing: bool,
}

impl Connection {
    /// Connect using the given url.
    ///
    /// See [`Config::parse`] for the url format.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect using config sourced from the environment.
    ///
    /// See [`Config::from_env`] for the environment variables read.
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect using the given [`Config`].
    pub async fn connect_with(config: Config) -> Result<Self> {
        let mut socket = Self::open_socket(&config).await?;

        negotiate_ssl(&mut socket, config.ssl_mode()).await?;

        let mut conn = Connection {
            socket,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(1024),
            stmt_cache: HashMap::new(),
            backend_key_data: backend::BackendKeyData { process_id: 0, secret_key: 0 },
            drain: false,
            closing: false,
        };

        let StartupResponse { backend_key_data } = phase::startup(&config, &mut conn).await?;
        conn.backend_key_data = backend_key_data;

        Ok(conn)
    }

    async fn open_socket(config: &Config) -> Result<Socket> {
        #[cfg(unix)]
        if let Some(path) = config.socket.as_ref() {
            return Ok(Socket::connect_unix(path.as_str()).await?);
        }

        #[cfg(unix)]
        if config.host.as_str() == "localhost" {
            let path = format!("/run/postgresql/.s.PGSQL.{}", config.port);
            if let Ok(socket) = Socket::connect_unix(&path).await {
                return Ok(socket);
            }
        }

        Ok(Socket::connect_tcp(config.host.as_str(), config.port).await?)
    }

    /// The process id and secret key the server reported during startup.
    ///
    /// Used to construct a `CancelRequest` on a fresh connection.
    pub fn backend_key_data(&self) -> &backend::BackendKeyData {
        &self.backend_key_data
    }

    pub(crate) fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        self.stmt_cache.get(&sql).cloned()
    }

    pub(crate) fn add_stmt(&mut self, sql: u64, id: StatementName) {
        self.stmt_cache.insert(sql, id);
    }

    pub(crate) fn ready_request(&mut self) {
        self.drain = true;
    }

    pub(crate) fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    pub(crate) fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    pub(crate) fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        poll_write_all(&mut self.socket, &mut self.write_buf, cx)
    }

    /// Read exactly one message frame off the wire, buffering partial reads.
    fn poll_frame(&mut self, cx: &mut Context) -> Poll<io::Result<(u8, Bytes)>> {
        loop {
            if self.read_buf.len() >= 5 {
                let len = u32::from_be_bytes(self.read_buf[1..5].try_into().unwrap()) as usize;
                let total = 1 + len;
                if self.read_buf.len() >= total {
                    let mut frame = self.read_buf.split_to(total).freeze();
                    let tag = frame.get_u8();
                    frame.advance(4);
                    return Poll::Ready(Ok((tag, frame)));
                }
            }

            let n = ready!(poll_read(&mut self.socket, &mut self.read_buf, cx))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }

    pub(crate) fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        loop {
            if !self.write_buf.is_empty() {
                ready!(self.poll_flush(cx))?;
            }

            let (tag, body) = ready!(self.poll_frame(cx))?;

            match tag {
                backend::ParameterStatus::MSGTYPE => {
                    let _status = backend::ParameterStatus::decode(tag, body)?;
                    trace!(name = %_status.name, value = %_status.value, "parameter status");
                    continue;
                }
                backend::NoticeResponse::MSGTYPE => {
                    let _notice = backend::NoticeResponse::decode(tag, body)?;
                    #[cfg(feature = "log")]
                    log::info!("{_notice:?}");
                    continue;
                }
                backend::NotificationResponse::MSGTYPE => {
                    let _notification = backend::NotificationResponse::decode(tag, body)?;
                    #[cfg(feature = "log")]
                    log::info!("{_notification:?}");
                    continue;
                }
                backend::ErrorResponse::MSGTYPE => {
                    let err = backend::ErrorResponse::decode(tag, body)?;
                    self.drain = true;
                    return Poll::Ready(Err(err.into()));
                }
                backend::ReadyForQuery::MSGTYPE if self.drain => {
                    self.drain = false;
                    continue;
                }
                _ if self.drain => continue,
                _ => return Poll::Ready(B::decode(tag, body).map_err(Into::into)),
            }
        }
    }

    /// Flush buffered writes and, if a previous error left the connection mid-drain,
    /// consume messages up to and including the next `ReadyForQuery`.
    ///
    /// Used by [`Pool`][crate::Pool] as its idle-connection healthcheck.
    pub(crate) fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        ready!(self.poll_flush(cx)?);

        while self.drain {
            ready!(self.poll_recv::<BackendMessage>(cx)?);
        }

        Poll::Ready(Ok(()))
    }

    /// Send `Terminate`, flush, then shut down the underlying socket.
    pub(crate) fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        if !self.closing {
            self.send(frontend::Terminate);
            self.closing = true;
        }

        ready!(self.poll_flush(cx)?);
        self.socket.poll_shutdown(cx)
    }
}

impl PgTransport for Connection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Connection::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        Connection::poll_recv(self, cx)
    }

    fn ready_request(&mut self) {
        Connection::ready_request(self);
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        Connection::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        Connection::send_startup(self, startup);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        Connection::get_stmt(self, sql)
    }

    fn add_stmt(&mut self, sql: u64, id: StatementName) {
        Connection::add_stmt(self, sql, id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket)
            .field("cached_statements", &self.stmt_cache.len())
            .field("drain", &self.drain)
            .finish()
    }
}

/// Probe the server for SSL support per `mode`.
///
/// This build carries no TLS stream, so `'S'` (server accepts/wants SSL) can only be
/// followed through when it's the same outcome as plaintext would give: never. Only
/// `Disable` is guaranteed to work against any server.
async fn negotiate_ssl(socket: &mut Socket, mode: SslMode) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    if mode == SslMode::Disable {
        return Ok(());
    }

    let mut buf = BytesMut::with_capacity(8);
    frontend::SslRequest.write(&mut buf);
    socket.write_all(&buf).await?;

    let mut resp = [0u8; 1];
    socket.read_exact(&mut resp).await?;

    match resp[0] {
        b'N' if mode == SslMode::Require => Err(crate::Error::ssl_refused()),
        b'N' => Ok(()),
        b'S' => Err(crate::Error::ssl_refused()),
        found => Err(crate::postgres::ProtocolError::unknown(found).into()),
    }
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut inner = Md5::new();
    inner.update(password.as_bytes());
    inner.update(user.as_bytes());
    let inner_hex = format!("{:x}", inner.finalize());

    let mut outer = Md5::new();
    outer.update(inner_hex.as_bytes());
    outer.update(salt);

    format!("md5{:x}", outer.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_password_is_stable() {
        let a = md5_password("postgres", "secret", [1, 2, 3, 4]);
        let b = md5_password("postgres", "secret", [1, 2, 3, 4]);
        assert_eq!(a, b);
        assert!(a.starts_with("md5"));
        assert_eq!(a.len(), 3 + 32);
    }

    #[test]
    fn md5_password_depends_on_user_and_salt() {
        let a = md5_password("postgres", "secret", [1, 2, 3, 4]);
        let b = md5_password("other", "secret", [1, 2, 3, 4]);
        let c = md5_password("postgres", "secret", [4, 3, 2, 1]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
