//! Password scramble computation for the supported auth plugins.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// `mysql_native_password`:
/// `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`.
///
/// An empty password sends an empty response.
#[must_use]
pub fn scramble_native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut salted = Sha1::new();
    salted.update(seed);
    salted.update(stage2);
    let salted: [u8; 20] = salted.finalize().into();

    stage1
        .iter()
        .zip(salted.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// `caching_sha2_password` fast path:
/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)`.
#[must_use]
pub fn scramble_caching_sha2(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let stage2: [u8; 32] = Sha256::digest(stage1).into();

    let mut salted = Sha256::new();
    salted.update(stage2);
    salted.update(seed);
    let salted: [u8; 32] = salted.finalize().into();

    stage1
        .iter()
        .zip(salted.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}
