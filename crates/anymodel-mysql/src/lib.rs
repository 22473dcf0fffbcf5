//! MySQL driver and backend adapter for anymodel.
//!
//! The wire client speaks the classic client/server protocol over
//! `asupersync::net::TcpStream`: handshake v10, `mysql_native_password` and
//! the `caching_sha2_password` fast path, and the COM_QUERY text protocol.
//! `?` placeholders are bound client-side by escaping values into literals —
//! the binding model of the driver this layer was originally built on — after
//! the placeholder count has been verified against the bound values.
//!
//! [`MySqlConnection`] is the shared, lazily connecting handle;
//! [`MySqlBackend`] is the [`anymodel_core::Backend`] adapter on top of it,
//! generic over the connection for testability.

pub mod backend;
pub mod config;
pub mod connection;
pub mod escape;
pub mod protocol;

pub use backend::MySqlBackend;
pub use config::MySqlConfig;
pub use connection::MySqlConnection;
