//! Message definitions and frontend encoding.

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608; // 3 << 16

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Startup message (no type byte); first message after connecting.
    Startup {
        /// Protocol version (196608 for 3.0).
        version: i32,
        /// Connection parameters (user, database, ...).
        params: Vec<(String, String)>,
    },
    /// Password response for cleartext and MD5 authentication.
    PasswordMessage(String),
    /// SASL mechanism selection plus initial client data.
    SaslInitialResponse {
        /// Mechanism name, e.g. `SCRAM-SHA-256`.
        mechanism: String,
        /// Initial response data.
        data: Vec<u8>,
    },
    /// SASL continuation data.
    SaslResponse(Vec<u8>),
    /// Parse the unnamed prepared statement.
    Parse {
        /// SQL with `$1`, `$2`, ... placeholders.
        query: String,
        /// Parameter type OIDs (0 lets the server infer).
        param_types: Vec<u32>,
    },
    /// Bind parameters to the unnamed portal (text format).
    Bind {
        /// Parameter values; `None` is NULL.
        params: Vec<Option<Vec<u8>>>,
    },
    /// Describe the unnamed portal.
    DescribePortal,
    /// Execute the unnamed portal to completion.
    Execute,
    /// End of the extended-query sequence; requests ReadyForQuery.
    Sync,
    /// Close the connection.
    Terminate,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name.
    pub name: String,
    /// Type OID.
    pub type_oid: u32,
    /// Format code (0 text, 1 binary).
    pub format: i16,
}

/// Fields of an ErrorResponse/NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity, e.g. `ERROR`.
    pub severity: String,
    /// SQLSTATE code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Messages sent from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication accepted.
    AuthenticationOk,
    /// Server wants the cleartext password.
    AuthenticationCleartextPassword,
    /// Server wants an MD5 response with this salt.
    AuthenticationMd5Password([u8; 4]),
    /// Server offers these SASL mechanisms.
    AuthenticationSasl(Vec<String>),
    /// SASL server-first/continuation data.
    AuthenticationSaslContinue(Vec<u8>),
    /// SASL server-final data.
    AuthenticationSaslFinal(Vec<u8>),
    /// Runtime parameter report during startup.
    ParameterStatus {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: String,
    },
    /// Cancellation key data (unused by this client, parsed for protocol
    /// completeness).
    BackendKeyData {
        /// Server process id.
        process_id: i32,
        /// Cancellation secret.
        secret_key: i32,
    },
    /// Server is ready for the next query cycle.
    ReadyForQuery(u8),
    /// Result-set column metadata.
    RowDescription(Vec<FieldDescription>),
    /// One result row; `None` entries are NULL.
    DataRow(Vec<Option<Vec<u8>>>),
    /// Statement finished with this command tag.
    CommandComplete(String),
    /// Parse finished.
    ParseComplete,
    /// Bind finished.
    BindComplete,
    /// Statement produces no rows.
    NoData,
    /// The query string was empty.
    EmptyQueryResponse,
    /// Portal ran out of rows (row-limited Execute; unused here).
    PortalSuspended,
    /// Parameter type metadata (ignored).
    ParameterDescription,
    /// Server error.
    ErrorResponse(ErrorFields),
    /// Server notice (ignored beyond logging).
    NoticeResponse(ErrorFields),
}

/// Encoder for frontend messages, reusing one internal buffer.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    /// Create a writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a message, returning the wire bytes.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();
        match msg {
            FrontendMessage::Startup { version, params } => {
                self.begin_untyped();
                self.put_i32(*version);
                for (name, value) in params {
                    self.put_cstr(name);
                    self.put_cstr(value);
                }
                self.buf.push(0);
                self.finish_untyped();
            }
            FrontendMessage::PasswordMessage(password) => {
                self.begin(b'p');
                self.put_cstr(password);
                self.finish();
            }
            FrontendMessage::SaslInitialResponse { mechanism, data } => {
                self.begin(b'p');
                self.put_cstr(mechanism);
                self.put_i32(i32::try_from(data.len()).unwrap_or(i32::MAX));
                self.buf.extend_from_slice(data);
                self.finish();
            }
            FrontendMessage::SaslResponse(data) => {
                self.begin(b'p');
                self.buf.extend_from_slice(data);
                self.finish();
            }
            FrontendMessage::Parse { query, param_types } => {
                self.begin(b'P');
                self.put_cstr(""); // unnamed statement
                self.put_cstr(query);
                self.put_i16(i16::try_from(param_types.len()).unwrap_or(0));
                for oid in param_types {
                    self.put_i32(*oid as i32);
                }
                self.finish();
            }
            FrontendMessage::Bind { params } => {
                self.begin(b'B');
                self.put_cstr(""); // unnamed portal
                self.put_cstr(""); // unnamed statement
                // One format code, text, applied to all parameters.
                if params.is_empty() {
                    self.put_i16(0);
                } else {
                    self.put_i16(1);
                    self.put_i16(0);
                }
                self.put_i16(i16::try_from(params.len()).unwrap_or(0));
                for param in params {
                    match param {
                        None => self.put_i32(-1),
                        Some(bytes) => {
                            self.put_i32(i32::try_from(bytes.len()).unwrap_or(i32::MAX));
                            self.buf.extend_from_slice(bytes);
                        }
                    }
                }
                self.put_i16(0); // default (text) result formats
                self.finish();
            }
            FrontendMessage::DescribePortal => {
                self.begin(b'D');
                self.buf.push(b'P');
                self.put_cstr("");
                self.finish();
            }
            FrontendMessage::Execute => {
                self.begin(b'E');
                self.put_cstr("");
                self.put_i32(0); // no row limit
                self.finish();
            }
            FrontendMessage::Sync => {
                self.begin(b'S');
                self.finish();
            }
            FrontendMessage::Terminate => {
                self.begin(b'X');
                self.finish();
            }
        }
        &self.buf
    }

    fn begin(&mut self, ty: u8) {
        self.buf.push(ty);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
    }

    fn finish(&mut self) {
        let len = (self.buf.len() - 1) as i32;
        self.buf[1..5].copy_from_slice(&len.to_be_bytes());
    }

    fn begin_untyped(&mut self) {
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
    }

    fn finish_untyped(&mut self) {
        let len = self.buf.len() as i32;
        self.buf[0..4].copy_from_slice(&len.to_be_bytes());
    }

    fn put_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_encoding() {
        let mut writer = MessageWriter::new();
        let bytes = writer.write(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: vec![("user".to_string(), "app".to_string())],
        });
        // length covers the whole message
        let len = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len());
        assert_eq!(
            i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            PROTOCOL_VERSION
        );
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_typed_message_length_excludes_type_byte() {
        let mut writer = MessageWriter::new();
        let bytes = writer.write(&FrontendMessage::Sync).to_vec();
        assert_eq!(bytes[0], b'S');
        assert_eq!(i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 4);
        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn test_bind_null_and_value() {
        let mut writer = MessageWriter::new();
        let bytes = writer
            .write(&FrontendMessage::Bind {
                params: vec![None, Some(b"42".to_vec())],
            })
            .to_vec();
        assert_eq!(bytes[0], b'B');
        // portal "" + statement "" -> two lone NUL bytes after the header
        assert_eq!(bytes[5], 0);
        assert_eq!(bytes[6], 0);
        // one text format code for all params
        assert_eq!(&bytes[7..11], &[0, 1, 0, 0]);
        // two params, first NULL (-1), second "42"
        assert_eq!(&bytes[11..13], &[0, 2]);
        assert_eq!(&bytes[13..17], &(-1i32).to_be_bytes());
        assert_eq!(&bytes[17..21], &2i32.to_be_bytes());
        assert_eq!(&bytes[21..23], b"42");
    }

    #[test]
    fn test_parse_encoding() {
        let mut writer = MessageWriter::new();
        let bytes = writer
            .write(&FrontendMessage::Parse {
                query: "SELECT 1".to_string(),
                param_types: vec![],
            })
            .to_vec();
        assert_eq!(bytes[0], b'P');
        let len = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(len as usize, bytes.len() - 1);
    }
}
