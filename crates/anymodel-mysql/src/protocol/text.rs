//! COM_QUERY text-protocol response parsing.

use anymodel_core::Value;

use super::packet::{Cursor, ProtocolError};

/// Column type bytes this layer distinguishes.
mod column_type {
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const YEAR: u8 = 13;
    pub const JSON: u8 = 245;
}

/// A parsed OK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows affected by the statement.
    pub affected_rows: u64,
    /// Generated auto-increment id, when the statement produced one.
    pub last_insert_id: u64,
}

/// Whether a payload is an OK packet.
#[must_use]
pub fn is_ok(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0x00
}

/// Whether a payload is an ERR packet.
#[must_use]
pub fn is_err(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xff
}

/// Whether a payload is a (pre-DEPRECATE_EOF) EOF packet.
#[must_use]
pub fn is_eof(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xfe && payload.len() < 9
}

/// Parse an OK payload.
pub fn parse_ok(payload: &[u8]) -> Result<OkPacket, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    cursor.skip(1)?; // header byte
    let affected_rows = cursor.lenenc_int()?;
    let last_insert_id = cursor.lenenc_int()?;
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
    })
}

/// Parse an ERR payload into `(errno, message)`.
pub fn parse_err(payload: &[u8]) -> Result<(u16, String), ProtocolError> {
    let mut cursor = Cursor::new(payload);
    cursor.skip(1)?; // header byte
    let code = cursor.u16()?;
    let mut rest = cursor.rest();
    // Protocol 4.1 carries a '#' marker plus a 5-byte SQLSTATE.
    if rest.first() == Some(&b'#') && rest.len() >= 6 {
        rest = &rest[6..];
    }
    let message = String::from_utf8(rest.to_vec()).map_err(|_| ProtocolError::Utf8)?;
    Ok((code, message))
}

/// A column definition from a result-set header.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    /// Column (alias) name.
    pub name: String,
    /// Wire column type byte.
    pub column_type: u8,
}

/// Parse a protocol-4.1 column definition payload.
pub fn parse_column_definition(payload: &[u8]) -> Result<ColumnDefinition, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let _catalog = cursor.lenenc_str()?;
    let _schema = cursor.lenenc_str()?;
    let _table = cursor.lenenc_str()?;
    let _org_table = cursor.lenenc_str()?;
    let name = cursor.lenenc_str()?;
    let _org_name = cursor.lenenc_str()?;
    let _fixed_len = cursor.lenenc_int()?; // always 0x0c
    let _charset = cursor.u16()?;
    let _column_length = cursor.u32()?;
    let column_type = cursor.u8()?;
    Ok(ColumnDefinition { name, column_type })
}

/// Parse one text-protocol result row; `None` entries are NULL (0xfb).
pub fn parse_text_row(
    payload: &[u8],
    column_count: usize,
) -> Result<Vec<Option<String>>, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let mut values = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if cursor.remaining() == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        if payload[payload.len() - cursor.remaining()] == 0xfb {
            cursor.skip(1)?;
            values.push(None);
        } else {
            values.push(Some(cursor.lenenc_str()?));
        }
    }
    Ok(values)
}

/// Decode one text cell by its column type.
#[must_use]
pub fn decode_column_value(column_type: u8, text: String) -> Value {
    match column_type {
        column_type::TINY
        | column_type::SHORT
        | column_type::LONG
        | column_type::LONGLONG
        | column_type::INT24
        | column_type::YEAR => match text.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(text),
        },
        column_type::JSON => match serde_json::from_str(&text) {
            Ok(json) => Value::Json(json),
            Err(_) => Value::Text(text),
        },
        _ => Value::Text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_classifiers() {
        assert!(is_ok(&[0x00, 0, 0]));
        assert!(is_err(&[0xff, 0, 0]));
        assert!(is_eof(&[0xfe, 0, 0, 0, 0]));
        // A lenenc row starting 0xfe with >= 9 bytes is not an EOF.
        assert!(!is_eof(&[0xfe, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_parse_ok() {
        // header, affected=2, last_insert_id=5, status, warnings
        let ok = parse_ok(&[0x00, 2, 5, 0x02, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(ok.affected_rows, 2);
        assert_eq!(ok.last_insert_id, 5);
    }

    #[test]
    fn test_parse_err_with_sqlstate() {
        let mut payload = vec![0xff];
        payload.extend_from_slice(&1064u16.to_le_bytes());
        payload.extend_from_slice(b"#42000You have an error in your SQL syntax");
        let (code, message) = parse_err(&payload).unwrap();
        assert_eq!(code, 1064);
        assert_eq!(message, "You have an error in your SQL syntax");
    }

    #[test]
    fn test_parse_column_definition() {
        fn lenenc(s: &str, out: &mut Vec<u8>) {
            out.push(s.len() as u8);
            out.extend_from_slice(s.as_bytes());
        }
        let mut payload = Vec::new();
        lenenc("def", &mut payload);
        lenenc("main", &mut payload);
        lenenc("users", &mut payload);
        lenenc("users", &mut payload);
        lenenc("name", &mut payload);
        lenenc("name", &mut payload);
        payload.push(0x0c);
        payload.extend_from_slice(&45u16.to_le_bytes()); // charset
        payload.extend_from_slice(&255u32.to_le_bytes()); // length
        payload.push(253); // VAR_STRING
        payload.extend_from_slice(&0u16.to_le_bytes()); // flags
        payload.push(0); // decimals
        payload.extend_from_slice(&[0, 0]); // filler

        let col = parse_column_definition(&payload).unwrap();
        assert_eq!(col.name, "name");
        assert_eq!(col.column_type, 253);
    }

    #[test]
    fn test_parse_text_row_with_null() {
        let mut payload = Vec::new();
        payload.push(1);
        payload.push(b'7');
        payload.push(0xfb); // NULL
        payload.push(5);
        payload.extend_from_slice(b"arg_a");
        let row = parse_text_row(&payload, 3).unwrap();
        assert_eq!(
            row,
            vec![Some("7".to_string()), None, Some("arg_a".to_string())]
        );
    }

    #[test]
    fn test_decode_column_value() {
        assert_eq!(decode_column_value(3, "42".to_string()), Value::Int(42));
        assert_eq!(decode_column_value(8, "-1".to_string()), Value::Int(-1));
        assert_eq!(
            decode_column_value(253, "x".to_string()),
            Value::Text("x".to_string())
        );
        assert_eq!(
            decode_column_value(245, "[1,2]".to_string()),
            Value::Json(serde_json::json!([1, 2]))
        );
        // TINYINT(1) booleans surface as integers; the model layer coerces.
        assert_eq!(decode_column_value(1, "1".to_string()), Value::Int(1));
    }
}
