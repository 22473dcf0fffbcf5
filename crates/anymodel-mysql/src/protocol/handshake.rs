//! Handshake v10 parsing and the 4.1 handshake response.

use super::capabilities::{
    CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_SECURE_CONNECTION, DEFAULT_CLIENT_FLAGS,
};
use super::packet::{Cursor, ProtocolError};
use super::CHARSET_UTF8MB4;

/// The server greeting.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Server version string, e.g. `8.0.36`.
    pub server_version: String,
    /// Connection thread id.
    pub thread_id: u32,
    /// The 20-byte auth seed (scramble).
    pub scramble: Vec<u8>,
    /// Server capability flags.
    pub capabilities: u32,
    /// Announced auth plugin, e.g. `mysql_native_password`.
    pub auth_plugin: String,
}

/// Parse a handshake v10 payload.
pub fn parse_handshake(payload: &[u8]) -> Result<Handshake, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let protocol_version = cursor.u8()?;
    if protocol_version != 10 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let server_version = cursor.cstr()?;
    let thread_id = cursor.u32()?;

    let mut scramble = cursor.bytes(8)?.to_vec();
    cursor.skip(1)?; // filler
    let cap_low = u32::from(cursor.u16()?);
    let _charset = cursor.u8()?;
    let _status = cursor.u16()?;
    let cap_high = u32::from(cursor.u16()?);
    let capabilities = cap_low | (cap_high << 16);
    let auth_data_len = cursor.u8()?;
    cursor.skip(10)?; // reserved

    // Part 2 is max(13, len - 8) bytes with a trailing NUL.
    let part2_len = usize::from(auth_data_len.max(8) - 8).max(13);
    let part2 = cursor.bytes(part2_len.min(cursor.remaining()))?;
    let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
    scramble.extend_from_slice(part2);

    let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
        cursor.cstr().unwrap_or_default()
    } else {
        String::new()
    };

    Ok(Handshake {
        server_version,
        thread_id,
        scramble,
        capabilities,
        auth_plugin,
    })
}

/// Build the HandshakeResponse41 payload.
#[must_use]
pub fn build_handshake_response(
    user: &str,
    auth_response: &[u8],
    database: Option<&str>,
    auth_plugin: &str,
) -> Vec<u8> {
    let mut flags = DEFAULT_CLIENT_FLAGS;
    if database.is_some() {
        flags |= CLIENT_CONNECT_WITH_DB;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&(16 * 1024 * 1024u32).to_le_bytes()); // max packet
    out.push(CHARSET_UTF8MB4);
    out.extend_from_slice(&[0u8; 23]); // filler
    out.extend_from_slice(user.as_bytes());
    out.push(0);
    // CLIENT_SECURE_CONNECTION: 1-byte length, then the auth response.
    debug_assert!(flags & CLIENT_SECURE_CONNECTION != 0);
    out.push(auth_response.len() as u8);
    out.extend_from_slice(auth_response);
    if let Some(db) = database {
        out.extend_from_slice(db.as_bytes());
        out.push(0);
    }
    out.extend_from_slice(auth_plugin.as_bytes());
    out.push(0);
    out
}
