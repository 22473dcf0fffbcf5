//! PostgreSQL driver and backend adapter for anymodel.
//!
//! The wire client speaks protocol 3.0 over `asupersync::net::TcpStream`:
//! startup, cleartext/MD5/SCRAM-SHA-256 authentication, and the extended
//! query protocol (Parse/Bind/Describe/Execute/Sync) with text-format
//! parameters and results. [`PostgresConnection`] is the shared, lazily
//! connecting handle implementing the driver contract; [`PostgresBackend`]
//! is the [`anymodel_core::Backend`] adapter on top of it, generic over the
//! connection so its reconciliation and query paths are testable against a
//! scripted fake.

pub mod backend;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod scram;
pub mod types;

pub use backend::PostgresBackend;
pub use config::PgConfig;
pub use connection::PostgresConnection;
