//! Async PostgreSQL connection.
//!
//! [`PgWireConnection`] owns the socket and speaks the protocol;
//! [`PostgresConnection`] is the shared handle the rest of the workspace
//! uses: it connects lazily on the first statement, and when a statement
//! fails because the connection died it clears the handle so the next call
//! transparently attempts exactly one reconnect.

// Allow `impl Future` return types in trait methods - intentional for async trait compat
#![allow(clippy::manual_async_fn)]

use std::collections::HashMap;
use std::future::Future;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use md5::{Digest, Md5};

use anymodel_core::{
    ColumnSet, ConnectionError, ConnectionErrorKind, DatabaseError, Dialect, Error, Result, Row,
    SqlConnection, Value, connection::count_placeholders,
};

use crate::config::PgConfig;
use crate::protocol::{
    BackendMessage, ErrorFields, FrontendMessage, MessageReader, MessageWriter, PROTOCOL_VERSION,
};
use crate::scram::ScramClient;
use crate::types::{decode_value, encode_value};

/// Result of one extended-query round trip.
#[derive(Debug)]
pub struct PgQueryResult {
    /// Decoded result rows.
    pub rows: Vec<Row>,
    /// Command tag, e.g. `UPDATE 3`.
    pub command_tag: Option<String>,
}

fn connection_error(kind: ConnectionErrorKind, message: String) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message,
        source: None,
    })
}

fn disconnected(message: String, source: Option<std::io::Error>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message,
        source: source.map(|e| Box::new(e) as _),
    })
}

fn error_from_fields(fields: &ErrorFields) -> Error {
    // Reword syntax errors so the caller sees that the generated SQL, not
    // their data, is at fault.
    let message = if fields.code == "42601" {
        format!("syntax error in generated SQL: {}", fields.message)
    } else {
        fields.message.clone()
    };
    Error::Database(DatabaseError {
        code: Some(fields.code.clone()),
        message,
    })
}

/// `md5` + hex(md5(hex(md5(password + user)) + salt)), the MD5 auth response.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
    let mut inner = Md5::new();
    inner.update(password.as_bytes());
    inner.update(user.as_bytes());
    let inner_hex = hex(&inner.finalize());

    let mut outer = Md5::new();
    outer.update(inner_hex.as_bytes());
    outer.update(salt);
    format!("md5{}", hex(&outer.finalize()))
}

fn parse_rows_affected(tag: Option<&str>) -> u64 {
    tag.and_then(|t| t.rsplit(' ').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// A raw protocol connection over one TCP stream.
pub struct PgWireConnection {
    stream: TcpStream,
    reader: MessageReader,
    writer: MessageWriter,
    read_buf: Vec<u8>,
    parameters: HashMap<String, String>,
}

impl std::fmt::Debug for PgWireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgWireConnection")
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

impl PgWireConnection {
    /// Connect, authenticate, and read the startup parameter reports.
    pub async fn connect(config: &PgConfig) -> Outcome<Self, Error> {
        let addr = config.socket_addr();
        let socket_addr = match (config.host.as_str(), config.port).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(a) => a,
                None => {
                    return Outcome::Err(connection_error(
                        ConnectionErrorKind::Connect,
                        format!("no addresses resolved for {addr}"),
                    ));
                }
            },
            Err(e) => {
                return Outcome::Err(connection_error(
                    ConnectionErrorKind::Connect,
                    format!("failed to resolve {addr}: {e}"),
                ));
            }
        };

        let stream = match TcpStream::connect_timeout(socket_addr, config.connect_timeout).await {
            Ok(s) => s,
            Err(e) => {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                return Outcome::Err(connection_error(
                    kind,
                    format!("failed to connect to {addr}: {e}"),
                ));
            }
        };
        stream.set_nodelay(true).ok();

        let mut conn = Self {
            stream,
            reader: MessageReader::new(),
            writer: MessageWriter::new(),
            read_buf: vec![0u8; 8192],
            parameters: HashMap::new(),
        };

        if let Outcome::Err(e) = conn
            .send_message(&FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: config.startup_params(),
            })
            .await
        {
            return Outcome::Err(e);
        }

        match conn.handle_auth(config).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        match conn.read_startup_messages().await {
            Outcome::Ok(()) => {
                tracing::debug!(addr = %addr, "postgres connection established");
                Outcome::Ok(conn)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn handle_auth(&mut self, config: &PgConfig) -> Outcome<(), Error> {
        let password = || {
            config.password.as_deref().ok_or_else(|| {
                connection_error(
                    ConnectionErrorKind::Auth,
                    "server requires a password but none was configured".to_string(),
                )
            })
        };

        loop {
            let msg = match self.receive_message().await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match msg {
                BackendMessage::AuthenticationOk => return Outcome::Ok(()),
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = match password() {
                        Ok(p) => p.to_string(),
                        Err(e) => return Outcome::Err(e),
                    };
                    if let Outcome::Err(e) = self
                        .send_message(&FrontendMessage::PasswordMessage(password))
                        .await
                    {
                        return Outcome::Err(e);
                    }
                }
                BackendMessage::AuthenticationMd5Password(salt) => {
                    let password = match password() {
                        Ok(p) => p.to_string(),
                        Err(e) => return Outcome::Err(e),
                    };
                    let hash = md5_password(&config.user, &password, salt);
                    if let Outcome::Err(e) =
                        self.send_message(&FrontendMessage::PasswordMessage(hash)).await
                    {
                        return Outcome::Err(e);
                    }
                }
                BackendMessage::AuthenticationSasl(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
                        return Outcome::Err(connection_error(
                            ConnectionErrorKind::Auth,
                            format!("unsupported SASL mechanisms: {mechanisms:?}"),
                        ));
                    }
                    let password = match password() {
                        Ok(p) => p.to_string(),
                        Err(e) => return Outcome::Err(e),
                    };
                    match self.scram_auth(&config.user, &password).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
                BackendMessage::ErrorResponse(fields) => {
                    return Outcome::Err(error_from_fields(&fields));
                }
                other => {
                    return Outcome::Err(Error::protocol(format!(
                        "unexpected message during auth: {other:?}"
                    )));
                }
            }
        }
    }

    async fn scram_auth(&mut self, user: &str, password: &str) -> Outcome<(), Error> {
        let mut client = ScramClient::new(user, password);

        if let Outcome::Err(e) = self
            .send_message(&FrontendMessage::SaslInitialResponse {
                mechanism: "SCRAM-SHA-256".to_string(),
                data: client.client_first(),
            })
            .await
        {
            return Outcome::Err(e);
        }

        let server_first = match self.receive_message().await {
            Outcome::Ok(BackendMessage::AuthenticationSaslContinue(data)) => data,
            Outcome::Ok(BackendMessage::ErrorResponse(fields)) => {
                return Outcome::Err(error_from_fields(&fields));
            }
            Outcome::Ok(other) => {
                return Outcome::Err(Error::protocol(format!(
                    "expected SASL continue, got: {other:?}"
                )));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let client_final = match client.process_server_first(&server_first) {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        };
        if let Outcome::Err(e) = self
            .send_message(&FrontendMessage::SaslResponse(client_final))
            .await
        {
            return Outcome::Err(e);
        }

        let server_final = match self.receive_message().await {
            Outcome::Ok(BackendMessage::AuthenticationSaslFinal(data)) => data,
            Outcome::Ok(BackendMessage::ErrorResponse(fields)) => {
                return Outcome::Err(error_from_fields(&fields));
            }
            Outcome::Ok(other) => {
                return Outcome::Err(Error::protocol(format!(
                    "expected SASL final, got: {other:?}"
                )));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if let Err(e) = client.verify_server_final(&server_final) {
            return Outcome::Err(e);
        }

        match self.receive_message().await {
            Outcome::Ok(BackendMessage::AuthenticationOk) => Outcome::Ok(()),
            Outcome::Ok(BackendMessage::ErrorResponse(fields)) => {
                Outcome::Err(error_from_fields(&fields))
            }
            Outcome::Ok(other) => Outcome::Err(Error::protocol(format!(
                "expected AuthenticationOk, got: {other:?}"
            ))),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn read_startup_messages(&mut self) -> Outcome<(), Error> {
        loop {
            let msg = match self.receive_message().await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match msg {
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData { .. } => {}
                BackendMessage::ReadyForQuery(_) => return Outcome::Ok(()),
                BackendMessage::ErrorResponse(fields) => {
                    return Outcome::Err(error_from_fields(&fields));
                }
                BackendMessage::NoticeResponse(_) => {}
                other => {
                    return Outcome::Err(Error::protocol(format!(
                        "unexpected startup message: {other:?}"
                    )));
                }
            }
        }
    }

    /// Run one parameterized statement through the extended protocol.
    pub async fn run_extended(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<PgQueryResult, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let mut encoded = Vec::with_capacity(params.len());
        for value in params {
            match encode_value(value) {
                Ok(v) => encoded.push(v),
                Err(e) => return Outcome::Err(e),
            }
        }

        let sequence = [
            FrontendMessage::Parse {
                query: sql.to_string(),
                param_types: vec![0; params.len()],
            },
            FrontendMessage::Bind { params: encoded },
            FrontendMessage::DescribePortal,
            FrontendMessage::Execute,
            FrontendMessage::Sync,
        ];
        for msg in &sequence {
            if let Outcome::Err(e) = self.send_message(msg).await {
                return Outcome::Err(e);
            }
        }

        let mut field_descs = None;
        let mut columns: Option<Arc<ColumnSet>> = None;
        let mut rows: Vec<Row> = Vec::new();
        let mut command_tag = None;
        let mut error: Option<Error> = None;

        loop {
            let msg = match self.receive_message().await {
                Outcome::Ok(m) => m,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            match msg {
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::NoData
                | BackendMessage::PortalSuspended
                | BackendMessage::ParameterDescription
                | BackendMessage::EmptyQueryResponse
                | BackendMessage::NoticeResponse(_) => {}
                BackendMessage::RowDescription(desc) => {
                    let names: Vec<String> = desc.iter().map(|f| f.name.clone()).collect();
                    columns = Some(Arc::new(ColumnSet::new(names)));
                    field_descs = Some(desc);
                }
                BackendMessage::DataRow(raw_values) => {
                    if error.is_some() {
                        continue;
                    }
                    let (Some(desc), Some(cols)) = (&field_descs, &columns) else {
                        error = Some(Error::protocol("DataRow received before RowDescription"));
                        continue;
                    };
                    if raw_values.len() != desc.len() {
                        error = Some(Error::protocol("DataRow field count mismatch"));
                        continue;
                    }
                    let mut values = Vec::with_capacity(raw_values.len());
                    let mut failed = None;
                    for (i, raw) in raw_values.into_iter().enumerate() {
                        match raw {
                            None => values.push(Value::Null),
                            Some(bytes) => match decode_value(desc[i].type_oid, &bytes) {
                                Ok(v) => values.push(v),
                                Err(e) => {
                                    failed = Some(e);
                                    break;
                                }
                            },
                        }
                    }
                    match failed {
                        Some(e) => error = Some(e),
                        None => rows.push(Row::new(Arc::clone(cols), values)),
                    }
                }
                BackendMessage::CommandComplete(tag) => {
                    command_tag = Some(tag);
                }
                BackendMessage::ErrorResponse(fields) => {
                    // Keep draining until ReadyForQuery so the connection
                    // stays usable for the next statement.
                    error = Some(error_from_fields(&fields));
                }
                BackendMessage::ReadyForQuery(_) => break,
                other => {
                    error = Some(Error::protocol(format!(
                        "unexpected message in query cycle: {other:?}"
                    )));
                }
            }
        }

        match error {
            Some(e) => Outcome::Err(e),
            None => Outcome::Ok(PgQueryResult { rows, command_tag }),
        }
    }

    async fn send_message(&mut self, msg: &FrontendMessage) -> Outcome<(), Error> {
        let data = self.writer.write(msg).to_vec();
        let mut written = 0;
        while written < data.len() {
            match std::future::poll_fn(|task_cx| {
                std::pin::Pin::new(&mut self.stream).poll_write(task_cx, &data[written..])
            })
            .await
            {
                Ok(0) => {
                    return Outcome::Err(disconnected(
                        "connection closed while writing".to_string(),
                        None,
                    ));
                }
                Ok(n) => written += n,
                Err(e) => {
                    return Outcome::Err(disconnected(
                        format!("failed to write to server: {e}"),
                        Some(e),
                    ));
                }
            }
        }
        match std::future::poll_fn(|task_cx| {
            std::pin::Pin::new(&mut self.stream).poll_flush(task_cx)
        })
        .await
        {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(disconnected(format!("failed to flush stream: {e}"), Some(e))),
        }
    }

    async fn receive_message(&mut self) -> Outcome<BackendMessage, Error> {
        loop {
            match self.reader.next_message() {
                Ok(Some(msg)) => return Outcome::Ok(msg),
                Ok(None) => {}
                Err(e) => return Outcome::Err(Error::protocol(format!("protocol error: {e}"))),
            }

            let mut read_buf = ReadBuf::new(&mut self.read_buf);
            match std::future::poll_fn(|task_cx| {
                std::pin::Pin::new(&mut self.stream).poll_read(task_cx, &mut read_buf)
            })
            .await
            {
                Ok(()) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        return Outcome::Err(disconnected(
                            "connection closed by server".to_string(),
                            None,
                        ));
                    }
                    let filled = read_buf.filled().to_vec();
                    self.reader.feed(&filled);
                }
                Err(e) => {
                    return Outcome::Err(match e.kind() {
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                            Error::Timeout
                        }
                        _ => disconnected(format!("failed to read from server: {e}"), Some(e)),
                    });
                }
            }
        }
    }
}

/// Shared, lazily-connecting PostgreSQL connection.
///
/// Cloning shares the underlying handle. The first statement establishes the
/// connection; a statement failing on a dead connection clears the handle so
/// the next statement performs exactly one reconnect attempt.
pub struct PostgresConnection {
    config: PgConfig,
    inner: Arc<Mutex<Option<PgWireConnection>>>,
}

impl Clone for PostgresConnection {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl PostgresConnection {
    /// Create a connection handle; no I/O happens until the first statement.
    #[must_use]
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a handle from a `postgres://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// The configuration this handle connects with.
    #[must_use]
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    async fn run(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<PgQueryResult, Error> {
        let expected = count_placeholders(sql, Dialect::Postgres);
        if expected != params.len() {
            return Outcome::Err(Error::UndefinedBindValue {
                expected,
                actual: params.len(),
            });
        }

        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::protocol("failed to acquire connection lock"));
        };
        if guard.is_none() {
            // No live handle: attempt exactly one connect.
            match PgWireConnection::connect(&self.config).await {
                Outcome::Ok(conn) => *guard = Some(conn),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        let conn = guard.as_mut().expect("connection populated above");
        let result = conn.run_extended(cx, sql, params).await;
        if let Outcome::Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            ..
        })) = &result
        {
            // Drop the dead handle; the next statement reconnects.
            tracing::warn!("postgres connection lost, clearing handle");
            *guard = None;
        }
        result
    }
}

impl SqlConnection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let this = self.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            match this.run(cx, &sql, &params).await {
                Outcome::Ok(result) => Outcome::Ok(result.rows),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let this = self.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            match this.run(cx, &sql, &params).await {
                Outcome::Ok(result) => {
                    Outcome::Ok(parse_rows_affected(result.command_tag.as_deref()))
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let this = self.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let result = match this.run(cx, &sql, &params).await {
                Outcome::Ok(r) => r,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let id = result
                .rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_i64);
            match id {
                Some(id) => Outcome::Ok(id),
                None => Outcome::Err(Error::database(
                    "INSERT did not return an id; the statement needs a RETURNING clause",
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password_shape() {
        let a = md5_password("app", "secret", [1, 2, 3, 4]);
        assert!(a.starts_with("md5"));
        assert_eq!(a.len(), 35);
        assert!(a[3..].chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic, salt-sensitive.
        assert_eq!(a, md5_password("app", "secret", [1, 2, 3, 4]));
        assert_ne!(a, md5_password("app", "secret", [4, 3, 2, 1]));
        assert_ne!(a, md5_password("app", "other", [1, 2, 3, 4]));
    }

    #[test]
    fn test_parse_rows_affected() {
        assert_eq!(parse_rows_affected(Some("UPDATE 3")), 3);
        assert_eq!(parse_rows_affected(Some("INSERT 0 1")), 1);
        assert_eq!(parse_rows_affected(Some("DELETE 0")), 0);
        assert_eq!(parse_rows_affected(Some("CREATE TABLE")), 0);
        assert_eq!(parse_rows_affected(None), 0);
    }

    #[test]
    fn test_syntax_errors_are_reworded() {
        let err = error_from_fields(&ErrorFields {
            severity: "ERROR".to_string(),
            code: "42601".to_string(),
            message: "syntax error at or near \"FORM\"".to_string(),
        });
        assert!(err.to_string().contains("syntax error in generated SQL"));

        let err = error_from_fields(&ErrorFields {
            severity: "ERROR".to_string(),
            code: "23505".to_string(),
            message: "duplicate key value".to_string(),
        });
        assert!(err.to_string().contains("duplicate key value"));
        assert!(!err.to_string().contains("generated SQL"));
    }
}
