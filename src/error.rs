//! `postro` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    connection::ParseError,
    fetch::EmptyQueryError,
    phase::UnsupportedAuth,
    postgres::{ErrorResponse, ProtocolError},
    row::{DecodeError, RowNotFound},
};

/// A specialized [`Result`] type for `postro` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postro` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn empty_query() -> Self {
        ErrorKind::EmptyQuery(EmptyQueryError).into()
    }

    pub(crate) fn row_not_found() -> Self {
        ErrorKind::RowNotFound(RowNotFound).into()
    }

    /// Server requested or refused TLS negotiation, which this build does not support.
    pub(crate) fn ssl_refused() -> Self {
        ErrorKind::SslRefused.into()
    }

    /// Checkout timed out waiting for an idle connection.
    pub(crate) fn pool_timeout() -> Self {
        ErrorKind::PoolTimeout.into()
    }

    /// Pool has no idle connection and the caller opted out of queueing.
    pub(crate) fn pool_full() -> Self {
        ErrorKind::PoolFull.into()
    }

    /// [`crate::session::query`]/[`crate::session::execute`] called with no ambient
    /// connection bound (not inside [`crate::session::transaction`] or
    /// [`crate::session::with_conn`]).
    pub(crate) fn no_ambient_connection() -> Self {
        ErrorKind::NoAmbientConnection.into()
    }

    /// A pool-targeted call was made while the ambient binding belongs to a different pool.
    pub(crate) fn in_other_pool_transaction(pool_id: u64) -> Self {
        ErrorKind::InOtherPoolTransaction(pool_id).into()
    }
}

/// All possible error kind from `postro` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(ErrorResponse),
    Utf8(std::str::Utf8Error),
    RowNotFound(RowNotFound),
    EmptyQuery(EmptyQueryError),
    UnsupportedAuth(UnsupportedAuth),
    Decode(DecodeError),
    /// Server requested or refused TLS and this build has no TLS support.
    SslRefused,
    /// Checkout timed out waiting for an idle connection.
    PoolTimeout,
    /// Pool had no idle connection and the caller requested no queueing.
    PoolFull,
    /// No ambient connection is bound for the calling task.
    NoAmbientConnection,
    /// Ambient transaction is bound to a different pool than the one requested.
    InOtherPoolTransaction(u64),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));
from!(<EmptyQueryError>e => ErrorKind::EmptyQuery(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));

from!(<DecodeError>e => ErrorKind::Decode(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::RowNotFound(e) => e.fmt(f),
            Self::EmptyQuery(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::SslRefused => f.write_str("server requires/refuses TLS, which this build does not support"),
            Self::PoolTimeout => f.write_str("timed out waiting for an idle connection"),
            Self::PoolFull => f.write_str("pool has no idle connection and queueing was disabled"),
            Self::NoAmbientConnection => f.write_str("no ambient connection bound for this task"),
            Self::InOtherPoolTransaction(id) => {
                write!(f, "ambient transaction is bound to a different pool (id {id})")
            },
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

