//! SCRAM-SHA-256 client-side authentication (RFC 7677).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use anymodel_core::{ConnectionErrorKind, Error, Result};

type HmacSha256 = Hmac<Sha256>;

fn auth_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Auth, message)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PBKDF2-HMAC-SHA-256 with one output block, the `Hi` function of RFC 5802.
fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut block = salt.to_vec();
    block.extend_from_slice(&1u32.to_be_bytes());
    let mut u = hmac_sha256(password.as_bytes(), &block);
    let mut out = u;
    for _ in 1..iterations {
        u = hmac_sha256(password.as_bytes(), &u);
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out
}

/// A client nonce from std's per-process random hasher state. Not a CSPRNG,
/// but the nonce only needs to be unpredictable enough to be unique per
/// exchange; the proof security comes from the password and server salt.
fn generate_nonce() -> String {
    use std::hash::{BuildHasher, Hasher};
    let mut raw = [0u8; 18];
    for chunk in raw.chunks_mut(8) {
        let word = std::collections::hash_map::RandomState::new()
            .build_hasher()
            .finish();
        let bytes = word.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    BASE64.encode(raw)
}

/// The client side of one SCRAM-SHA-256 exchange.
pub struct ScramClient {
    user: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    auth_message: String,
    salted: [u8; 32],
}

impl ScramClient {
    /// Start an exchange for the given credentials.
    #[must_use]
    pub fn new(user: &str, password: &str) -> Self {
        Self::with_nonce(user, password, generate_nonce())
    }

    /// Start an exchange with an explicit client nonce. Test hook.
    #[must_use]
    pub fn with_nonce(user: &str, password: &str, client_nonce: String) -> Self {
        // ',' and '=' must be escaped in the saslname.
        let escaped_user = user.replace('=', "=3D").replace(',', "=2C");
        let client_first_bare = format!("n={escaped_user},r={client_nonce}");
        Self {
            user: user.to_string(),
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            auth_message: String::new(),
            salted: [0; 32],
        }
    }

    /// The `client-first-message`, sent in `SASLInitialResponse`.
    #[must_use]
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consume the `server-first-message` and produce the
    /// `client-final-message`.
    pub fn process_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(data)
            .map_err(|_| auth_error("server-first message is not UTF-8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in text.split(',') {
            match part.split_once('=') {
                Some(("r", v)) => nonce = Some(v.to_string()),
                Some(("s", v)) => salt = Some(v.to_string()),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| auth_error("server-first message missing nonce"))?;
        let salt = salt.ok_or_else(|| auth_error("server-first message missing salt"))?;
        let iterations =
            iterations.ok_or_else(|| auth_error("server-first message missing iterations"))?;

        if !nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("server nonce does not extend the client nonce"));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|_| auth_error("server salt is not valid base64"))?;

        self.salted = salted_password(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&self.salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let client_final_bare = format!("c=biws,r={nonce}");
        self.auth_message = format!("{},{text},{client_final_bare}", self.client_first_bare);

        let signature = hmac_sha256(&stored_key, self.auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(signature.iter()) {
            *p ^= s;
        }

        tracing::trace!(user = %self.user, "computed SCRAM client proof");
        Ok(format!("{client_final_bare},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Verify the `server-final-message` signature.
    pub fn verify_server_final(&self, data: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(data)
            .map_err(|_| auth_error("server-final message is not UTF-8"))?;
        let verifier = text
            .strip_prefix("v=")
            .ok_or_else(|| auth_error("server-final message missing verifier"))?;
        let expected = BASE64
            .decode(verifier.trim_end())
            .map_err(|_| auth_error("server verifier is not valid base64"))?;

        let server_key = hmac_sha256(&self.salted, b"Server Key");
        let signature = hmac_sha256(&server_key, self.auth_message.as_bytes());
        if expected == signature {
            Ok(())
        } else {
            Err(auth_error("server signature verification failed"))
        }
    }
}
