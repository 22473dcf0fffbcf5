//! Async MySQL connection.
//!
//! [`MySqlWireConnection`] owns the socket and speaks the protocol;
//! [`MySqlConnection`] is the shared handle that connects lazily, binds `?`
//! placeholders client-side, and clears a dead handle so the next statement
//! performs exactly one reconnect attempt.

#![allow(clippy::manual_async_fn)]

use std::future::Future;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};

use anymodel_core::{
    ColumnSet, ConnectionError, ConnectionErrorKind, DatabaseError, Dialect, Error, Result, Row,
    SqlConnection, Value, connection::count_placeholders,
};

use crate::config::MySqlConfig;
use crate::escape::bind_placeholders;
use crate::protocol::auth::{scramble_caching_sha2, scramble_native_password};
use crate::protocol::handshake::{build_handshake_response, parse_handshake};
use crate::protocol::packet::{PacketReader, write_packet};
use crate::protocol::text::{
    decode_column_value, is_eof, is_err, is_ok, parse_column_definition, parse_err, parse_ok,
    parse_text_row,
};

const COM_QUERY: u8 = 0x03;

/// Result of one COM_QUERY round trip.
#[derive(Debug)]
pub struct MySqlQueryResult {
    /// Decoded result rows (empty for non-SELECT statements).
    pub rows: Vec<Row>,
    /// Rows affected, from the OK packet.
    pub affected_rows: u64,
    /// Generated auto-increment id, from the OK packet.
    pub last_insert_id: u64,
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

fn database_error(code: u16, message: String) -> Error {
    // Reword syntax errors so the caller sees that the generated SQL, not
    // their data, is at fault.
    let message = if code == 1064 {
        format!("syntax error in generated SQL: {message}")
    } else {
        message
    };
    Error::Database(DatabaseError {
        code: Some(code.to_string()),
        message,
    })
}

fn scramble_for_plugin(plugin: &str, password: &str, seed: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        "mysql_native_password" => Ok(scramble_native_password(password, seed)),
        "caching_sha2_password" => Ok(scramble_caching_sha2(password, seed)),
        other => Err(connection_error(
            ConnectionErrorKind::Auth,
            format!("unsupported auth plugin {other:?}"),
        )),
    }
}

/// A raw protocol connection over one TCP stream.
pub struct MySqlWireConnection {
    stream: TcpStream,
    reader: PacketReader,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for MySqlWireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlWireConnection").finish_non_exhaustive()
    }
}

impl MySqlWireConnection {
    /// Connect and authenticate.
    pub async fn connect(config: &MySqlConfig) -> Outcome<Self, Error> {
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
            reader: PacketReader::new(),
            read_buf: vec![0u8; 8192],
        };

        let (seq, payload) = match conn.receive_packet().await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if is_err(&payload) {
            return match parse_err(&payload) {
                Ok((code, message)) => Outcome::Err(database_error(code, message)),
                Err(e) => Outcome::Err(Error::protocol(format!("malformed ERR packet: {e}"))),
            };
        }
        let handshake = match parse_handshake(&payload) {
            Ok(h) => h,
            Err(e) => {
                return Outcome::Err(Error::protocol(format!("malformed handshake: {e}")));
            }
        };
        tracing::debug!(
            server = %handshake.server_version,
            plugin = %handshake.auth_plugin,
            "received mysql handshake"
        );

        let password = config.password.as_deref().unwrap_or("");
        let auth_response =
            match scramble_for_plugin(&handshake.auth_plugin, password, &handshake.scramble) {
                Ok(r) => r,
                Err(e) => return Outcome::Err(e),
            };
        let response = build_handshake_response(
            &config.user,
            &auth_response,
            config.database.as_deref(),
            &handshake.auth_plugin,
        );
        if let Outcome::Err(e) = conn.send_packet(seq.wrapping_add(1), &response).await {
            return Outcome::Err(e);
        }

        match conn.finish_auth(password).await {
            Outcome::Ok(()) => {
                tracing::debug!(addr = %addr, "mysql connection established");
                Outcome::Ok(conn)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn finish_auth(&mut self, password: &str) -> Outcome<(), Error> {
        loop {
            let (seq, payload) = match self.receive_packet().await {
                Outcome::Ok(p) => p,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if is_ok(&payload) {
                return Outcome::Ok(());
            }
            if is_err(&payload) {
                return match parse_err(&payload) {
                    Ok((code, message)) => Outcome::Err(connection_error(
                        ConnectionErrorKind::Auth,
                        format!("authentication failed ({code}): {message}"),
                    )),
                    Err(e) => Outcome::Err(Error::protocol(format!("malformed ERR packet: {e}"))),
                };
            }
            match payload.first().copied() {
                // AuthSwitchRequest: plugin name + new seed.
                Some(0xfe) => {
                    let mut cursor = crate::protocol::packet::Cursor::new(&payload[1..]);
                    let plugin = match cursor.cstr() {
                        Ok(p) => p,
                        Err(e) => {
                            return Outcome::Err(Error::protocol(format!(
                                "malformed auth switch: {e}"
                            )));
                        }
                    };
                    let seed = cursor.rest();
                    let seed = seed.strip_suffix(&[0]).unwrap_or(seed);
                    let response = match scramble_for_plugin(&plugin, password, seed) {
                        Ok(r) => r,
                        Err(e) => return Outcome::Err(e),
                    };
                    if let Outcome::Err(e) =
                        self.send_packet(seq.wrapping_add(1), &response).await
                    {
                        return Outcome::Err(e);
                    }
                }
                // AuthMoreData: caching_sha2 fast-auth verdict.
                Some(0x01) => match payload.get(1).copied() {
                    Some(3) => {} // fast auth succeeded; OK packet follows
                    Some(4) => {
                        return Outcome::Err(connection_error(
                            ConnectionErrorKind::Auth,
                            "caching_sha2_password full authentication requires TLS; \
                             seed the server cache or use mysql_native_password"
                                .to_string(),
                        ));
                    }
                    other => {
                        return Outcome::Err(Error::protocol(format!(
                            "unexpected auth-more-data byte: {other:?}"
                        )));
                    }
                },
                other => {
                    return Outcome::Err(Error::protocol(format!(
                        "unexpected packet during auth: {other:?}"
                    )));
                }
            }
        }
    }

    /// Run one statement (placeholders already bound) through COM_QUERY.
    pub async fn query_text(&mut self, cx: &Cx, sql: &str) -> Outcome<MySqlQueryResult, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let mut command = Vec::with_capacity(sql.len() + 1);
        command.push(COM_QUERY);
        command.extend_from_slice(sql.as_bytes());
        if let Outcome::Err(e) = self.send_packet(0, &command).await {
            return Outcome::Err(e);
        }

        let (_, payload) = match self.receive_packet().await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if is_ok(&payload) {
            return match parse_ok(&payload) {
                Ok(ok) => Outcome::Ok(MySqlQueryResult {
                    rows: Vec::new(),
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                }),
                Err(e) => Outcome::Err(Error::protocol(format!("malformed OK packet: {e}"))),
            };
        }
        if is_err(&payload) {
            return match parse_err(&payload) {
                Ok((code, message)) => Outcome::Err(database_error(code, message)),
                Err(e) => Outcome::Err(Error::protocol(format!("malformed ERR packet: {e}"))),
            };
        }

        // Result set: column count, column definitions, EOF, rows, EOF.
        let column_count = {
            let mut cursor = crate::protocol::packet::Cursor::new(&payload);
            match cursor.lenenc_int() {
                Ok(n) => n as usize,
                Err(e) => {
                    return Outcome::Err(Error::protocol(format!(
                        "malformed column count: {e}"
                    )));
                }
            }
        };

        let mut column_types = Vec::with_capacity(column_count);
        let mut names = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let (_, payload) = match self.receive_packet().await {
                Outcome::Ok(p) => p,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match parse_column_definition(&payload) {
                Ok(col) => {
                    names.push(col.name);
                    column_types.push(col.column_type);
                }
                Err(e) => {
                    return Outcome::Err(Error::protocol(format!(
                        "malformed column definition: {e}"
                    )));
                }
            }
        }

        // EOF after the column definitions.
        match self.receive_packet().await {
            Outcome::Ok((_, payload)) if is_eof(&payload) => {}
            Outcome::Ok(_) => {
                return Outcome::Err(Error::protocol("expected EOF after column definitions"));
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let columns = Arc::new(ColumnSet::new(names));
        let mut rows = Vec::new();
        loop {
            let (_, payload) = match self.receive_packet().await {
                Outcome::Ok(p) => p,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if is_eof(&payload) {
                break;
            }
            if is_err(&payload) {
                return match parse_err(&payload) {
                    Ok((code, message)) => Outcome::Err(database_error(code, message)),
                    Err(e) => {
                        Outcome::Err(Error::protocol(format!("malformed ERR packet: {e}")))
                    }
                };
            }
            let raw = match parse_text_row(&payload, column_count) {
                Ok(r) => r,
                Err(e) => {
                    return Outcome::Err(Error::protocol(format!("malformed result row: {e}")));
                }
            };
            let values = raw
                .into_iter()
                .enumerate()
                .map(|(i, cell)| match cell {
                    None => Value::Null,
                    Some(text) => decode_column_value(column_types[i], text),
                })
                .collect();
            rows.push(Row::new(Arc::clone(&columns), values));
        }

        Outcome::Ok(MySqlQueryResult {
            rows,
            affected_rows: 0,
            last_insert_id: 0,
        })
    }

    async fn send_packet(&mut self, seq: u8, payload: &[u8]) -> Outcome<(), Error> {
        let data = write_packet(seq, payload);
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

    async fn receive_packet(&mut self) -> Outcome<(u8, Vec<u8>), Error> {
        loop {
            match self.reader.next_packet() {
                Ok(Some(packet)) => return Outcome::Ok(packet),
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

/// Shared, lazily-connecting MySQL connection.
pub struct MySqlConnection {
    config: MySqlConfig,
    inner: Arc<Mutex<Option<MySqlWireConnection>>>,
}

impl Clone for MySqlConnection {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Create a connection handle; no I/O happens until the first statement.
    #[must_use]
    pub fn new(config: MySqlConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a handle from a `mysql://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(MySqlConfig::from_url(url)?))
    }

    /// The configuration this handle connects with.
    #[must_use]
    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    async fn run(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<MySqlQueryResult, Error> {
        let expected = count_placeholders(sql, Dialect::MySql);
        if expected != params.len() {
            return Outcome::Err(Error::UndefinedBindValue {
                expected,
                actual: params.len(),
            });
        }
        let bound = match bind_placeholders(sql, params) {
            Ok(b) => b,
            Err(e) => return Outcome::Err(e),
        };

        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::protocol("failed to acquire connection lock"));
        };
        if guard.is_none() {
            // No live handle: attempt exactly one connect.
            match MySqlWireConnection::connect(&self.config).await {
                Outcome::Ok(conn) => *guard = Some(conn),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        let conn = guard.as_mut().expect("connection populated above");
        let result = conn.query_text(cx, &bound).await;
        if let Outcome::Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            ..
        })) = &result
        {
            // Drop the dead handle; the next statement reconnects.
            tracing::warn!("mysql connection lost, clearing handle");
            *guard = None;
        }
        result
    }
}

impl SqlConnection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
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
                Outcome::Ok(result) => Outcome::Ok(result.affected_rows),
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
            match this.run(cx, &sql, &params).await {
                Outcome::Ok(result) => Outcome::Ok(result.last_insert_id as i64),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
