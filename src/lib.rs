//! Postgres Driver
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use pgcore::Connection;
//!
//! # async fn app() -> pgcore::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let res = pgcore::query::<_, _, (i32,String)>("SELECT 420,$1", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()
//!     .await?;
//!
//! assert_eq!(res.0,420);
//! assert_eq!(res.1.as_str(),"Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Database Pooling:
//!
//! ```no_run
//! use pgcore::Pool;
//!
//! # async fn app() -> pgcore::Result<()> {
//! let mut pool = Pool::connect_env().await?;
//!
//! pgcore::execute("CREATE TEMP TABLE foo(id int)", &mut pool)
//!     .execute()
//!     .await?;
//!
//! let mut handles = vec![];
//!
//! for i in 0..14 {
//!     let mut pool = pool.clone();
//!     let t = tokio::spawn(async move {
//!         pgcore::execute("INSERT INTO foo(id) VALUES($1)", &mut pool)
//!             .bind(i)
//!             .execute()
//!             .await
//!     });
//!     handles.push(t);
//! }
//!
//! for h in handles {
//!     h.await.unwrap();
//! }
//!
//! let foos = pgcore::query::<_, _, (i32,)>("SELECT * FROM foo", &mut pool)
//!     .fetch_all()
//!     .await?;
//!
//! assert_eq!(foos.len(), 14);
//!
//! # Ok(())
//! # }
//! # mod tokio { pub fn spawn<F>(_: F) -> F { todo!() } }
//! ```

pub mod common;
mod io;
mod net;
mod ext;

// Protocol
pub mod postgres;

// Encoding
mod value;
pub mod encode;
pub mod types;

// Component
mod statement;
pub mod sql;
pub mod row;

// Operation
pub mod transport;
pub mod executor;
mod phase;
mod fetch;
pub mod query;
pub mod transaction;
pub mod session;

// Connection
pub mod connection;
pub mod pool;
pub mod type_registry;

mod error;


pub use encode::Encode;
pub use row::{Row, FromRow, Decode, DecodeError};
pub use sql::SqlExt;

pub use executor::Executor;
pub use connection::{Connection, Config};
pub use pool::{CheckoutOpts, Pool, PoolConfig, PoolConnection};
#[doc(inline)]
pub use query::{query, execute};
pub use phase::begin;
pub use transaction::{Transaction, transaction};
pub use error::{Error, Result};
