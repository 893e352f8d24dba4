//! Postgres frontend/backend wire protocol, version 3.0.
//!
//! ```text
//! frontend                        backend
//!    |  -- Startup ------------------> |
//!    |  <----------- Authentication -- |
//!    |  <----- ParameterStatus (...) -- |
//!    |  <------------ BackendKeyData -- |
//!    |  <-------------- ReadyForQuery -- |
//!    |                                 |
//!    |  -- Parse/Bind/Describe ------> |
//!    |  -- Execute/Sync -------------> |
//!    |  <---------- ParseComplete ---- |
//!    |  <----------- BindComplete ---- |
//!    |  <-- RowDescription/NoData ---- |
//!    |  <-- DataRow (0..N) ----------- |
//!    |  <- CommandComplete/PortalSusp. |
//!    |  <-------------- ReadyForQuery -- |
//! ```
//!
//! <https://www.postgresql.org/docs/current/protocol.html>
pub mod backend;
pub mod command_tag;
mod error;
pub mod frontend;
mod pg_format;
mod pg_type;

pub use backend::{BackendMessage, BackendProtocol, ErrorResponse, NoticeResponse, NotificationResponse};
pub use command_tag::CommandTag;
pub use error::ProtocolError;
pub use frontend::FrontendProtocol;
pub use pg_format::PgFormat;
pub use pg_type::{Oid, PgType};
