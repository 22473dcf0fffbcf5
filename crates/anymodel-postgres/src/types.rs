//! Text-format value encoding and decoding.

use anymodel_core::{Error, Result, Value};

mod oid {
    pub const BOOL: u32 = 16;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const JSONB: u32 = 3802;
}

/// Encode a bound value for the text format; `None` is NULL.
///
/// Parameters are sent with type OID 0 so the server infers types from the
/// statement, which is what lets one encoding cover every column type here.
pub fn encode_value(value: &Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(if *b { b"true".to_vec() } else { b"false".to_vec() })),
        Value::Int(i) => Ok(Some(i.to_string().into_bytes())),
        Value::Text(s) => Ok(Some(s.clone().into_bytes())),
        Value::Json(j) => Ok(Some(j.to_string().into_bytes())),
        Value::Array(_) => Err(Error::protocol(
            "array values must be expanded by the query compiler before binding",
        )),
    }
}

/// Decode one text-format column by its type OID.
pub fn decode_value(type_oid: u32, bytes: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::protocol(format!("non-UTF-8 value for oid {type_oid}")))?;
    match type_oid {
        oid::BOOL => match text {
            "t" | "true" => Ok(Value::Bool(true)),
            "f" | "false" => Ok(Value::Bool(false)),
            other => Err(Error::protocol(format!("invalid boolean value {other:?}"))),
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::protocol(format!("invalid integer value {text:?}"))),
        oid::JSON | oid::JSONB => serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|e| Error::protocol(format!("invalid json value: {e}"))),
        // Everything else (varchar, text, numeric, timestamps, ...) is
        // surfaced as its text representation.
        _ => Ok(Value::Text(text.to_string())),
    }
}
