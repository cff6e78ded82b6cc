//! JWE compact serialization (RFC 7516) over the algorithm subset this
//! server supports.
//!
//! Key management: RSA-OAEP-256, ECDH-ES, ECDH-ES+A128KW, ECDH-ES+A256KW.
//! Content encryption: A128GCM, A192GCM, A256GCM.

pub mod concat_kdf;
pub mod ecdh;
pub mod key_wrap;

use aes::cipher::consts::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, KeyInit, Nonce};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use shared::codec::{b64url_decode, b64url_encode};
use shared::error::CommonError;
use thiserror::Error;
use zeroize::Zeroizing;

pub use ecdh::{EcPrivateKey, EcPublicKey, EphemeralPublicKey};
pub use key_wrap::{aes_key_unwrap, aes_key_wrap};

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum JweError {
    #[error("JWE-1001: failed to decode JWE: {0}")]
    Decode(String),
    #[error("JWE-1002: failed to decrypt JWE: {0}")]
    Decrypt(String),
    #[error("JWE-1003: unsupported key management algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("JWE-1004: unsupported content encryption algorithm '{0}'")]
    UnsupportedEncryption(String),
}

impl JweError {
    pub fn code(&self) -> &'static str {
        match self {
            JweError::Decode(_) => "JWE-1001",
            JweError::Decrypt(_) => "JWE-1002",
            JweError::UnsupportedAlgorithm(_) => "JWE-1003",
            JweError::UnsupportedEncryption(_) => "JWE-1004",
        }
    }
}

impl From<JweError> for CommonError {
    fn from(err: JweError) -> Self {
        CommonError::invalid_request(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JweAlg {
    RsaOaep256,
    EcdhEs,
    EcdhEsA128Kw,
    EcdhEsA256Kw,
}

impl JweAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            JweAlg::RsaOaep256 => "RSA-OAEP-256",
            JweAlg::EcdhEs => "ECDH-ES",
            JweAlg::EcdhEsA128Kw => "ECDH-ES+A128KW",
            JweAlg::EcdhEsA256Kw => "ECDH-ES+A256KW",
        }
    }

    pub fn parse(value: &str) -> Result<Self, JweError> {
        match value {
            "RSA-OAEP-256" => Ok(JweAlg::RsaOaep256),
            "ECDH-ES" => Ok(JweAlg::EcdhEs),
            "ECDH-ES+A128KW" => Ok(JweAlg::EcdhEsA128Kw),
            "ECDH-ES+A256KW" => Ok(JweAlg::EcdhEsA256Kw),
            other => Err(JweError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// KEK length for the key-wrapping variants.
    fn kek_len(&self) -> Option<usize> {
        match self {
            JweAlg::EcdhEsA128Kw => Some(16),
            JweAlg::EcdhEsA256Kw => Some(32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JweEnc {
    A128Gcm,
    A192Gcm,
    A256Gcm,
}

impl JweEnc {
    pub fn as_str(&self) -> &'static str {
        match self {
            JweEnc::A128Gcm => "A128GCM",
            JweEnc::A192Gcm => "A192GCM",
            JweEnc::A256Gcm => "A256GCM",
        }
    }

    pub fn parse(value: &str) -> Result<Self, JweError> {
        match value {
            "A128GCM" => Ok(JweEnc::A128Gcm),
            "A192GCM" => Ok(JweEnc::A192Gcm),
            "A256GCM" => Ok(JweEnc::A256Gcm),
            other => Err(JweError::UnsupportedEncryption(other.to_string())),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            JweEnc::A128Gcm => 16,
            JweEnc::A192Gcm => 24,
            JweEnc::A256Gcm => 32,
        }
    }
}

/// Protected header of a compact JWE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JweHeader {
    pub alg: String,
    pub enc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk: Option<EphemeralPublicKey>,
}

/// Recipient key for encryption.
pub enum JweRecipientKey {
    Rsa(RsaPublicKey),
    Ec(EcPublicKey),
}

/// Process-side key for decryption.
pub enum JweDecryptionKey {
    Rsa(RsaPrivateKey),
    Ec(EcPrivateKey),
}

/// Encrypt `payload` into the five-part compact serialization.
pub fn encrypt_compact(
    payload: &[u8],
    alg: JweAlg,
    enc: JweEnc,
    recipient: &JweRecipientKey,
    kid: Option<&str>,
) -> Result<String, JweError> {
    let cek_len = enc.key_len();

    // Establish the CEK and the encrypted-key part; ECDH variants also
    // contribute the epk header member.
    let (cek, encrypted_key, epk): (Zeroizing<Vec<u8>>, Vec<u8>, Option<EphemeralPublicKey>) =
        match (alg, recipient) {
            (JweAlg::RsaOaep256, JweRecipientKey::Rsa(public_key)) => {
                let cek = random_key(cek_len);
                let padding = Oaep::new::<Sha256>();
                let encrypted = public_key
                    .encrypt(&mut rand::rngs::OsRng, padding, &cek)
                    .map_err(|e| JweError::Decrypt(format!("RSA key encryption failed: {e}")))?;
                (cek, encrypted, None)
            }
            (JweAlg::EcdhEs, JweRecipientKey::Ec(public_key)) => {
                let (z, epk) = ecdh::ephemeral_agreement(public_key)?;
                // The derived key replaces the CEK buffer entirely.
                let cek = Zeroizing::new(concat_kdf::concat_kdf_sha256(&z, enc.as_str(), cek_len));
                (cek, Vec::new(), Some(epk))
            }
            (JweAlg::EcdhEsA128Kw | JweAlg::EcdhEsA256Kw, JweRecipientKey::Ec(public_key)) => {
                let kek_len = alg.kek_len().unwrap();
                let (z, epk) = ecdh::ephemeral_agreement(public_key)?;
                let kek =
                    Zeroizing::new(concat_kdf::concat_kdf_sha256(&z, alg.as_str(), kek_len));
                let cek = random_key(cek_len);
                let wrapped = aes_key_wrap(&kek, &cek)?;
                (cek, wrapped, Some(epk))
            }
            (JweAlg::RsaOaep256, JweRecipientKey::Ec(_)) => {
                return Err(JweError::UnsupportedAlgorithm(
                    "RSA-OAEP-256 requires an RSA recipient key".to_string(),
                ));
            }
            (_, JweRecipientKey::Rsa(_)) => {
                return Err(JweError::UnsupportedAlgorithm(format!(
                    "{} requires an EC recipient key",
                    alg.as_str()
                )));
            }
        };

    let header = JweHeader {
        alg: alg.as_str().to_string(),
        enc: enc.as_str().to_string(),
        typ: Some("JWE".to_string()),
        kid: kid.map(str::to_string),
        epk,
    };
    let header_json = serde_json::to_vec(&header)
        .map_err(|e| JweError::Decode(format!("failed to serialize header: {e}")))?;
    let header_b64 = b64url_encode(header_json);

    let mut iv = [0u8; GCM_IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    // The base64url-encoded header is the AAD, per RFC 7516 §5.1 step 14.
    let sealed = seal(enc, &cek, &iv, header_b64.as_bytes(), payload)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - GCM_TAG_LEN);

    Ok(format!(
        "{}.{}.{}.{}.{}",
        header_b64,
        b64url_encode(encrypted_key),
        b64url_encode(iv),
        b64url_encode(ciphertext),
        b64url_encode(tag)
    ))
}

/// Decrypt a five-part compact serialization.
pub fn decrypt_compact(token: &str, key: &JweDecryptionKey) -> Result<Vec<u8>, JweError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return Err(JweError::Decode(format!(
            "expected 5 parts, found {}",
            parts.len()
        )));
    }

    let header_b64 = parts[0];
    let header_json = b64url_decode(header_b64)
        .map_err(|_| JweError::Decode("invalid header encoding".to_string()))?;
    let header: JweHeader = serde_json::from_slice(&header_json)
        .map_err(|e| JweError::Decode(format!("invalid header JSON: {e}")))?;

    let alg = JweAlg::parse(&header.alg)?;
    let enc = JweEnc::parse(&header.enc)?;

    let encrypted_key = b64url_decode(parts[1])
        .map_err(|_| JweError::Decode("invalid encrypted key encoding".to_string()))?;
    let iv =
        b64url_decode(parts[2]).map_err(|_| JweError::Decode("invalid iv encoding".to_string()))?;
    let ciphertext = b64url_decode(parts[3])
        .map_err(|_| JweError::Decode("invalid ciphertext encoding".to_string()))?;
    let tag =
        b64url_decode(parts[4]).map_err(|_| JweError::Decode("invalid tag encoding".to_string()))?;

    if iv.len() != GCM_IV_LEN {
        return Err(JweError::Decode(format!("invalid iv length {}", iv.len())));
    }
    if tag.len() != GCM_TAG_LEN {
        return Err(JweError::Decode(format!("invalid tag length {}", tag.len())));
    }

    let cek: Zeroizing<Vec<u8>> = match (alg, key) {
        (JweAlg::RsaOaep256, JweDecryptionKey::Rsa(private_key)) => {
            let padding = Oaep::new::<Sha256>();
            let cek = private_key
                .decrypt(padding, &encrypted_key)
                .map_err(|e| JweError::Decrypt(format!("RSA key decryption failed: {e}")))?;
            Zeroizing::new(cek)
        }
        (JweAlg::EcdhEs, JweDecryptionKey::Ec(private_key)) => {
            let epk = header
                .epk
                .as_ref()
                .ok_or_else(|| JweError::Decode("missing epk header".to_string()))?;
            if !encrypted_key.is_empty() {
                return Err(JweError::Decode(
                    "ECDH-ES carries no encrypted key".to_string(),
                ));
            }
            let z = ecdh::static_agreement(private_key, epk)?;
            Zeroizing::new(concat_kdf::concat_kdf_sha256(&z, enc.as_str(), enc.key_len()))
        }
        (JweAlg::EcdhEsA128Kw | JweAlg::EcdhEsA256Kw, JweDecryptionKey::Ec(private_key)) => {
            let epk = header
                .epk
                .as_ref()
                .ok_or_else(|| JweError::Decode("missing epk header".to_string()))?;
            let kek_len = alg.kek_len().unwrap();
            let z = ecdh::static_agreement(private_key, epk)?;
            let kek = Zeroizing::new(concat_kdf::concat_kdf_sha256(&z, alg.as_str(), kek_len));
            Zeroizing::new(aes_key_unwrap(&kek, &encrypted_key)?)
        }
        _ => {
            return Err(JweError::Decrypt(
                "decryption key type does not match the token algorithm".to_string(),
            ));
        }
    };

    if cek.len() != enc.key_len() {
        return Err(JweError::Decrypt(format!(
            "CEK length {} does not match {}",
            cek.len(),
            enc.as_str()
        )));
    }

    open(enc, &cek, &iv, header_b64.as_bytes(), &ciphertext, &tag)
}

fn random_key(len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn seal(
    enc: JweEnc,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, JweError> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let nonce = Nonce::from_slice(iv);
    let result = match enc {
        JweEnc::A128Gcm => Aes128Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .encrypt(nonce, payload),
        JweEnc::A192Gcm => Aes192Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .encrypt(nonce, payload),
        JweEnc::A256Gcm => Aes256Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .encrypt(nonce, payload),
    };
    result.map_err(|_| JweError::Decrypt("content encryption failed".to_string()))
}

fn open(
    enc: JweEnc,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, JweError> {
    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let payload = Payload {
        msg: &combined,
        aad,
    };
    let nonce = Nonce::from_slice(iv);
    let result = match enc {
        JweEnc::A128Gcm => Aes128Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .decrypt(nonce, payload),
        JweEnc::A192Gcm => Aes192Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .decrypt(nonce, payload),
        JweEnc::A256Gcm => Aes256Gcm::new_from_slice(cek)
            .map_err(|e| JweError::Decrypt(format!("invalid CEK: {e}")))?
            .decrypt(nonce, payload),
    };
    result.map_err(|_| JweError::Decrypt("authentication tag mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_pair() -> (JweRecipientKey, JweDecryptionKey) {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        (
            JweRecipientKey::Rsa(public),
            JweDecryptionKey::Rsa(private),
        )
    }

    fn p256_pair() -> (JweRecipientKey, JweDecryptionKey) {
        let private = p256::SecretKey::random(&mut rand::rngs::OsRng);
        (
            JweRecipientKey::Ec(EcPublicKey::P256(private.public_key())),
            JweDecryptionKey::Ec(EcPrivateKey::P256(private)),
        )
    }

    #[test]
    fn test_roundtrip_every_alg_enc_pair() {
        let encs = [JweEnc::A128Gcm, JweEnc::A192Gcm, JweEnc::A256Gcm];
        let payload = b"per-pair roundtrip payload";

        for enc in encs {
            let (public, private) = rsa_pair();
            let token =
                encrypt_compact(payload, JweAlg::RsaOaep256, enc, &public, Some("kid-1")).unwrap();
            assert_eq!(decrypt_compact(&token, &private).unwrap(), payload);

            for alg in [JweAlg::EcdhEs, JweAlg::EcdhEsA128Kw, JweAlg::EcdhEsA256Kw] {
                let (public, private) = p256_pair();
                let token = encrypt_compact(payload, alg, enc, &public, None).unwrap();
                assert_eq!(decrypt_compact(&token, &private).unwrap(), payload);
            }
        }
    }

    #[test]
    fn test_ecdh_es_a256kw_header_shape() {
        // Spec scenario: ECDH-ES+A256KW / A256GCM over "hello" with a P-256
        // recipient; the header must carry a populated epk.
        let (public, private) = p256_pair();
        let token = encrypt_compact(
            b"hello",
            JweAlg::EcdhEsA256Kw,
            JweEnc::A256Gcm,
            &public,
            None,
        )
        .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 5);
        assert!(!parts[1].is_empty(), "wrapped CEK must be present");

        let header: JweHeader =
            serde_json::from_slice(&b64url_decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header.alg, "ECDH-ES+A256KW");
        assert_eq!(header.enc, "A256GCM");
        let epk = header.epk.unwrap();
        assert_eq!(epk.crv, "P-256");
        assert!(!epk.x.is_empty() && !epk.y.is_empty());

        assert_eq!(decrypt_compact(&token, &private).unwrap(), b"hello");
    }

    #[test]
    fn test_ecdh_es_direct_has_empty_key_part() {
        let (public, private) = p256_pair();
        let token =
            encrypt_compact(b"direct", JweAlg::EcdhEs, JweEnc::A128Gcm, &public, None).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert!(parts[1].is_empty());
        assert_eq!(decrypt_compact(&token, &private).unwrap(), b"direct");
    }

    #[test]
    fn test_roundtrip_p384_and_p521() {
        let payload = b"other curves";

        let private = p384::SecretKey::random(&mut rand::rngs::OsRng);
        let public = JweRecipientKey::Ec(EcPublicKey::P384(private.public_key()));
        let token =
            encrypt_compact(payload, JweAlg::EcdhEsA128Kw, JweEnc::A128Gcm, &public, None).unwrap();
        let key = JweDecryptionKey::Ec(EcPrivateKey::P384(private));
        assert_eq!(decrypt_compact(&token, &key).unwrap(), payload);

        let private = p521::SecretKey::random(&mut rand::rngs::OsRng);
        let public = JweRecipientKey::Ec(EcPublicKey::P521(private.public_key()));
        let token = encrypt_compact(payload, JweAlg::EcdhEs, JweEnc::A256Gcm, &public, None).unwrap();
        let key = JweDecryptionKey::Ec(EcPrivateKey::P521(private));
        assert_eq!(decrypt_compact(&token, &key).unwrap(), payload);
    }

    #[test]
    fn test_tampered_ciphertext_fails_with_decrypt_code() {
        let (public, private) = rsa_pair();
        let token = encrypt_compact(
            b"integrity",
            JweAlg::RsaOaep256,
            JweEnc::A256Gcm,
            &public,
            None,
        )
        .unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut ct = b64url_decode(&parts[3]).unwrap();
        ct[0] ^= 0x01;
        parts[3] = b64url_encode(ct);
        let tampered = parts.join(".");

        let err = decrypt_compact(&tampered, &private).unwrap_err();
        assert_eq!(err.code(), "JWE-1002");
    }

    #[test]
    fn test_malformed_token_fails_with_decode_code() {
        let (_, private) = rsa_pair();
        let err = decrypt_compact("only.three.parts", &private).unwrap_err();
        assert_eq!(err.code(), "JWE-1001");
    }

    #[test]
    fn test_unsupported_alg_and_enc_codes() {
        assert_eq!(JweAlg::parse("RSA1_5").unwrap_err().code(), "JWE-1003");
        assert_eq!(JweEnc::parse("A128CBC-HS256").unwrap_err().code(), "JWE-1004");
    }

    #[test]
    fn test_key_type_mismatch_rejected() {
        let (public, _) = p256_pair();
        let err = encrypt_compact(b"x", JweAlg::RsaOaep256, JweEnc::A128Gcm, &public, None)
            .unwrap_err();
        assert_eq!(err.code(), "JWE-1003");

        let (rsa_public, _) = rsa_pair();
        let (_, ec_private) = p256_pair();
        let token =
            encrypt_compact(b"x", JweAlg::RsaOaep256, JweEnc::A128Gcm, &rsa_public, None).unwrap();
        let err = decrypt_compact(&token, &ec_private).unwrap_err();
        assert_eq!(err.code(), "JWE-1002");
    }
}
