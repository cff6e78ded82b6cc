//! Encoding and small crypto helpers shared by every crate.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CommonError;

/// base64url without padding, the JOSE alphabet.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data.as_ref())
}

pub fn b64url_decode(data: &str) -> Result<Vec<u8>, CommonError> {
    URL_SAFE_NO_PAD
        .decode(data.as_bytes())
        .map_err(|e| CommonError::invalid_request(format!("invalid base64url input: {e}")))
}

pub fn b64_encode(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data.as_ref())
}

pub fn b64_decode(data: &str) -> Result<Vec<u8>, CommonError> {
    STANDARD
        .decode(data.as_bytes())
        .map_err(|e| CommonError::invalid_request(format!("invalid base64 input: {e}")))
}

pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}

pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let digest = sha256(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time byte equality. Used wherever a secret is compared.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64url_roundtrip() {
        let data = b"aegis \xff\x00 payload";
        let encoded = b64url_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"longer-secret"));
    }

    #[test]
    fn test_random_bytes_distinct() {
        let a = random_bytes::<32>();
        let b = random_bytes::<32>();
        assert_ne!(a, b);
    }
}
