//! Error types shared across the workspace.
//!
//! One [`Error`] enum covers the whole layer. Validation and schema failures
//! are raised synchronously before any backend I/O; driver-native failures are
//! wrapped in [`ConnectionError`] / [`DatabaseError`] and passed through.

use std::fmt;

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for every anymodel operation.
#[derive(Debug)]
pub enum Error {
    /// Payload validation failed (unknown field, required, length, FK).
    Validation(ValidationError),
    /// Declared schema is internally inconsistent.
    Schema(SchemaError),
    /// Establishing or using a driver connection failed.
    Connection(ConnectionError),
    /// The database rejected a statement (constraint violation, syntax, ...).
    Database(DatabaseError),
    /// The wire protocol was violated by the server or the client.
    Protocol(String),
    /// The query is not expressible on this backend
    /// (e.g. MySQL offset without limit).
    UnsupportedQuery(String),
    /// A connection URL carried the wrong scheme for this backend.
    ProtocolMismatch {
        /// Scheme the backend expects, e.g. `mysql`.
        expected: &'static str,
        /// The offending URL.
        url: String,
    },
    /// The number of bound values does not match the statement's
    /// placeholders; caught before the statement is issued.
    UndefinedBindValue {
        /// Placeholders in the statement.
        expected: usize,
        /// Values actually bound.
        actual: usize,
    },
    /// No default backend registered and none passed explicitly.
    NoDefaultConnection,
    /// An I/O deadline elapsed.
    Timeout,
}

impl Error {
    /// Shorthand for a validation failure on a named field.
    #[must_use]
    pub fn validation(field: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Error::Validation(ValidationError {
            field: field.into(),
            kind,
        })
    }

    /// Shorthand for a schema failure on a named table.
    #[must_use]
    pub fn schema(table: impl Into<String>, kind: SchemaErrorKind) -> Self {
        Error::Schema(SchemaError {
            table: table.into(),
            kind,
        })
    }

    /// Shorthand for a database-side failure.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database(DatabaseError {
            code: None,
            message: message.into(),
        })
    }

    /// Shorthand for a protocol violation.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// Shorthand for a connection failure without an underlying source.
    #[must_use]
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "{e}"),
            Error::Schema(e) => write!(f, "{e}"),
            Error::Connection(e) => write!(f, "{e}"),
            Error::Database(e) => write!(f, "{e}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::UnsupportedQuery(msg) => write!(f, "unsupported query: {msg}"),
            Error::ProtocolMismatch { expected, url } => {
                write!(f, "connection URL {url:?} does not use the {expected} scheme")
            }
            Error::UndefinedBindValue { expected, actual } => write!(
                f,
                "statement has {expected} placeholders but {actual} values were bound"
            ),
            Error::NoDefaultConnection => write!(f, "no default connection registered"),
            Error::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|s| s as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

/// A payload validation failure, raised before any backend I/O.
#[derive(Debug)]
pub struct ValidationError {
    /// The offending field name.
    pub field: String,
    /// What went wrong.
    pub kind: ValidationErrorKind,
}

/// Kinds of payload validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// The field is not declared in the model's schema.
    UnknownField,
    /// A required field was not supplied on insert.
    RequiredMissing,
    /// A required field was supplied as null.
    RequiredNull,
    /// A string exceeded the declared size.
    TooLong {
        /// Declared maximum length.
        max: u32,
        /// Supplied length.
        actual: usize,
    },
    /// The referenced parent row does not exist.
    ForeignKey {
        /// Referenced table.
        table: String,
        /// Referenced field.
        field: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValidationErrorKind::UnknownField => {
                write!(f, "unknown field {:?}", self.field)
            }
            ValidationErrorKind::RequiredMissing => {
                write!(f, "required field {:?} is missing", self.field)
            }
            ValidationErrorKind::RequiredNull => {
                write!(f, "required field {:?} must not be null", self.field)
            }
            ValidationErrorKind::TooLong { max, actual } => write!(
                f,
                "field {:?} is {actual} characters long, maximum is {max}",
                self.field
            ),
            ValidationErrorKind::ForeignKey { table, field } => write!(
                f,
                "field {:?} references {table}.{field} but no such row exists",
                self.field
            ),
        }
    }
}

/// A declared-schema inconsistency.
#[derive(Debug)]
pub struct SchemaError {
    /// The table whose schema is invalid.
    pub table: String,
    /// What went wrong.
    pub kind: SchemaErrorKind,
}

/// Kinds of declared-schema inconsistencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Two fields share a name.
    DuplicateField(String),
    /// More than one auto-increment field declared.
    MultipleAutoFields(String),
    /// Auto-increment on a non-integer field.
    AutoTypeInvalid(String),
    /// A size bound on a non-string field.
    SizeOnNonString(String),
    /// An index references a field the schema does not declare.
    FieldNotFoundForIndex {
        /// The index's effective name.
        index: String,
        /// The undeclared field.
        field: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SchemaErrorKind::DuplicateField(name) => {
                write!(f, "table {:?} declares field {name:?} twice", self.table)
            }
            SchemaErrorKind::MultipleAutoFields(name) => write!(
                f,
                "table {:?} declares a second auto field {name:?}",
                self.table
            ),
            SchemaErrorKind::AutoTypeInvalid(name) => write!(
                f,
                "auto field {name:?} on table {:?} must be INT or BIGINT",
                self.table
            ),
            SchemaErrorKind::SizeOnNonString(name) => write!(
                f,
                "field {name:?} on table {:?} declares a size but is not a STRING",
                self.table
            ),
            SchemaErrorKind::FieldNotFoundForIndex { index, field } => write!(
                f,
                "index {index:?} on table {:?} references undeclared field {field:?}",
                self.table
            ),
        }
    }
}

/// A failure establishing or using a driver connection.
#[derive(Debug)]
pub struct ConnectionError {
    /// Classification of the failure.
    pub kind: ConnectionErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Underlying driver/io error, when available.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Classification of connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Could not establish the TCP connection.
    Connect,
    /// The server actively refused the connection.
    Refused,
    /// Authentication failed or is unsupported.
    Auth,
    /// The connection dropped mid-operation.
    Disconnected,
    /// SSL/TLS negotiation failed or is unsupported.
    Ssl,
    /// Other I/O failure.
    Io,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConnectionErrorKind::Connect => "connect",
            ConnectionErrorKind::Refused => "refused",
            ConnectionErrorKind::Auth => "auth",
            ConnectionErrorKind::Disconnected => "disconnected",
            ConnectionErrorKind::Ssl => "ssl",
            ConnectionErrorKind::Io => "io",
        };
        write!(f, "connection error ({kind}): {}", self.message)
    }
}

/// A database-side failure passed through from the driver.
#[derive(Debug)]
pub struct DatabaseError {
    /// Backend-specific error code (SQLSTATE, MySQL errno), when known.
    pub code: Option<String>,
    /// Backend-provided message.
    pub message: String,
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "database error [{code}]: {}", self.message),
            None => write!(f, "database error: {}", self.message),
        }
    }
}
