//! Incremental backend-message decoder.

use std::fmt;

use super::messages::{BackendMessage, ErrorFields, FieldDescription};

/// Errors while decoding backend messages.
#[derive(Debug)]
pub enum ProtocolError {
    /// Invalid length prefix encountered.
    InvalidLength(i32),
    /// Message exceeds the configured maximum size.
    MessageTooLarge(usize),
    /// Unknown message type byte.
    UnknownMessageType(u8),
    /// Non-UTF-8 string in a message.
    Utf8,
    /// Message ended before a field could be read.
    UnexpectedEof,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidLength(len) => write!(f, "invalid message length: {len}"),
            ProtocolError::MessageTooLarge(len) => write!(f, "message too large: {len} bytes"),
            ProtocolError::UnknownMessageType(ty) => {
                write!(f, "unknown message type: 0x{ty:02x}")
            }
            ProtocolError::Utf8 => write!(f, "invalid utf-8 in message"),
            ProtocolError::UnexpectedEof => write!(f, "unexpected end of message"),
        }
    }
}

impl std::error::Error for ProtocolError {}

const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Buffering reader: feed raw socket bytes in, pull whole messages out.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    /// Create an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to decode the next complete message; `Ok(None)` means more bytes
    /// are needed.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>, ProtocolError> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        let ty = self.buf[0];
        let len = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        if len < 4 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let body_len = (len as usize) - 4;
        if body_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(body_len));
        }
        if self.buf.len() < 5 + body_len {
            return Ok(None);
        }
        let body: Vec<u8> = self.buf[5..5 + body_len].to_vec();
        self.buf.drain(..5 + body_len);
        decode_body(ty, &body).map(Some)
    }
}

fn decode_body(ty: u8, body: &[u8]) -> Result<BackendMessage, ProtocolError> {
    let mut cursor = Cursor { body, pos: 0 };
    match ty {
        b'R' => {
            let code = cursor.i32()?;
            match code {
                0 => Ok(BackendMessage::AuthenticationOk),
                3 => Ok(BackendMessage::AuthenticationCleartextPassword),
                5 => {
                    let salt = cursor.bytes(4)?;
                    Ok(BackendMessage::AuthenticationMd5Password([
                        salt[0], salt[1], salt[2], salt[3],
                    ]))
                }
                10 => {
                    let mut mechanisms = Vec::new();
                    loop {
                        let s = cursor.cstr()?;
                        if s.is_empty() {
                            break;
                        }
                        mechanisms.push(s);
                    }
                    Ok(BackendMessage::AuthenticationSasl(mechanisms))
                }
                11 => Ok(BackendMessage::AuthenticationSaslContinue(cursor.rest())),
                12 => Ok(BackendMessage::AuthenticationSaslFinal(cursor.rest())),
                other => Err(ProtocolError::UnknownMessageType(other as u8)),
            }
        }
        b'S' => Ok(BackendMessage::ParameterStatus {
            name: cursor.cstr()?,
            value: cursor.cstr()?,
        }),
        b'K' => Ok(BackendMessage::BackendKeyData {
            process_id: cursor.i32()?,
            secret_key: cursor.i32()?,
        }),
        b'Z' => Ok(BackendMessage::ReadyForQuery(cursor.u8()?)),
        b'T' => {
            let count = cursor.i16()?;
            let mut fields = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let name = cursor.cstr()?;
                let _table_oid = cursor.i32()?;
                let _attnum = cursor.i16()?;
                let type_oid = cursor.i32()? as u32;
                let _typlen = cursor.i16()?;
                let _typmod = cursor.i32()?;
                let format = cursor.i16()?;
                fields.push(FieldDescription {
                    name,
                    type_oid,
                    format,
                });
            }
            Ok(BackendMessage::RowDescription(fields))
        }
        b'D' => {
            let count = cursor.i16()?;
            let mut values = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let len = cursor.i32()?;
                if len < 0 {
                    values.push(None);
                } else {
                    values.push(Some(cursor.bytes(len as usize)?.to_vec()));
                }
            }
            Ok(BackendMessage::DataRow(values))
        }
        b'C' => Ok(BackendMessage::CommandComplete(cursor.cstr()?)),
        b'1' => Ok(BackendMessage::ParseComplete),
        b'2' => Ok(BackendMessage::BindComplete),
        b'n' => Ok(BackendMessage::NoData),
        b'I' => Ok(BackendMessage::EmptyQueryResponse),
        b's' => Ok(BackendMessage::PortalSuspended),
        b't' => Ok(BackendMessage::ParameterDescription),
        b'E' => Ok(BackendMessage::ErrorResponse(error_fields(&mut cursor)?)),
        b'N' => Ok(BackendMessage::NoticeResponse(error_fields(&mut cursor)?)),
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn error_fields(cursor: &mut Cursor<'_>) -> Result<ErrorFields, ProtocolError> {
    let mut fields = ErrorFields::default();
    loop {
        let code = cursor.u8()?;
        if code == 0 {
            break;
        }
        let value = cursor.cstr()?;
        match code {
            b'S' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            _ => {}
        }
    }
    Ok(fields)
}

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.body.get(self.pos).ok_or(ProtocolError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn i16(&mut self) -> Result<i16, ProtocolError> {
        let bytes = self.bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, n: usize) -> Result<&[u8], ProtocolError> {
        if self.pos + n > self.body.len() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn cstr(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        while self.pos < self.body.len() && self.body[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.body.len() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let s = std::str::from_utf8(&self.body[start..self.pos])
            .map_err(|_| ProtocolError::Utf8)?
            .to_string();
        self.pos += 1; // consume the NUL
        Ok(s)
    }

    fn rest(&mut self) -> Vec<u8> {
        let out = self.body[self.pos..].to_vec();
        self.pos = self.body.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ty: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![ty];
        out.extend_from_slice(&((body.len() as i32) + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_partial_then_complete() {
        let mut reader = MessageReader::new();
        let bytes = message(b'Z', &[b'I']);
        reader.feed(&bytes[..3]);
        assert!(reader.next_message().unwrap().is_none());
        reader.feed(&bytes[3..]);
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::ReadyForQuery(b'I'))
        );
        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn test_auth_messages() {
        let mut reader = MessageReader::new();
        reader.feed(&message(b'R', &0i32.to_be_bytes()));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::AuthenticationOk)
        );

        let mut body = 5i32.to_be_bytes().to_vec();
        body.extend_from_slice(&[1, 2, 3, 4]);
        reader.feed(&message(b'R', &body));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::AuthenticationMd5Password([1, 2, 3, 4]))
        );

        let mut body = 10i32.to_be_bytes().to_vec();
        body.extend_from_slice(b"SCRAM-SHA-256\0\0");
        reader.feed(&message(b'R', &body));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::AuthenticationSasl(vec![
                "SCRAM-SHA-256".to_string()
            ]))
        );
    }

    #[test]
    fn test_row_description_and_data_row() {
        let mut reader = MessageReader::new();
        let mut body = 1i16.to_be_bytes().to_vec();
        body.extend_from_slice(b"id\0");
        body.extend_from_slice(&0i32.to_be_bytes()); // table oid
        body.extend_from_slice(&0i16.to_be_bytes()); // attnum
        body.extend_from_slice(&23i32.to_be_bytes()); // int4
        body.extend_from_slice(&4i16.to_be_bytes()); // typlen
        body.extend_from_slice(&(-1i32).to_be_bytes()); // typmod
        body.extend_from_slice(&0i16.to_be_bytes()); // text format
        reader.feed(&message(b'T', &body));
        let Some(BackendMessage::RowDescription(fields)) = reader.next_message().unwrap() else {
            panic!("expected RowDescription");
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "id");
        assert_eq!(fields[0].type_oid, 23);

        let mut body = 2i16.to_be_bytes().to_vec();
        body.extend_from_slice(&1i32.to_be_bytes());
        body.push(b'7');
        body.extend_from_slice(&(-1i32).to_be_bytes());
        reader.feed(&message(b'D', &body));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::DataRow(vec![Some(b"7".to_vec()), None]))
        );
    }

    #[test]
    fn test_error_response_fields() {
        let mut reader = MessageReader::new();
        let body = b"SERROR\0C42601\0Msyntax error\0\0";
        reader.feed(&message(b'E', body));
        let Some(BackendMessage::ErrorResponse(fields)) = reader.next_message().unwrap() else {
            panic!("expected ErrorResponse");
        };
        assert_eq!(fields.severity, "ERROR");
        assert_eq!(fields.code, "42601");
        assert_eq!(fields.message, "syntax error");
    }

    #[test]
    fn test_invalid_length_rejected() {
        let mut reader = MessageReader::new();
        reader.feed(&[b'Z', 0, 0, 0, 2]);
        assert!(matches!(
            reader.next_message(),
            Err(ProtocolError::InvalidLength(2))
        ));
    }
}
