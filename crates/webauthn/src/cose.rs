//! COSE public keys (RFC 8152 §13) and signature verification.
//!
//! Supported key types: EC2 on P-256 (ES256) and RSA (RS256). Everything
//! else is rejected.

use rsa::BigUint;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use sha2::Sha256;

use crate::WebAuthnError;
use crate::cbor::{CborValue, decode_first};

pub const COSE_KTY_EC2: i64 = 2;
pub const COSE_KTY_RSA: i64 = 3;
pub const COSE_ALG_ES256: i64 = -7;
pub const COSE_ALG_RS256: i64 = -257;
pub const COSE_CRV_P256: i64 = 1;

// COSE map labels.
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_EC_CRV: i64 = -1;
const LABEL_EC_X: i64 = -2;
const LABEL_EC_Y: i64 = -3;
const LABEL_RSA_N: i64 = -1;
const LABEL_RSA_E: i64 = -2;

#[derive(Debug, Clone, PartialEq)]
pub enum CosePublicKey {
    Ec2 { alg: i64, x: Vec<u8>, y: Vec<u8> },
    Rsa { alg: i64, n: Vec<u8>, e: Vec<u8> },
}

impl CosePublicKey {
    pub fn alg(&self) -> i64 {
        match self {
            CosePublicKey::Ec2 { alg, .. } => *alg,
            CosePublicKey::Rsa { alg, .. } => *alg,
        }
    }

    /// Verify `signature` over `data` according to the key's algorithm.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), WebAuthnError> {
        match self {
            CosePublicKey::Ec2 { alg, x, y } => {
                if *alg != COSE_ALG_ES256 {
                    return Err(WebAuthnError::UnsupportedKey(format!(
                        "unsupported EC2 algorithm {alg}"
                    )));
                }
                verify_es256(x, y, data, signature)
            }
            CosePublicKey::Rsa { alg, n, e } => {
                if *alg != COSE_ALG_RS256 {
                    return Err(WebAuthnError::UnsupportedKey(format!(
                        "unsupported RSA algorithm {alg}"
                    )));
                }
                verify_rs256(n, e, data, signature)
            }
        }
    }
}

/// Parse one COSE key from the front of `data`. The consumed length is
/// determined by a single CBOR item parse, which is how the attested
/// credential data delimits the key.
pub fn parse_cose_key(data: &[u8]) -> Result<(CosePublicKey, usize), WebAuthnError> {
    let (item, consumed) = decode_first(data)?;
    let map = match &item {
        CborValue::Map(_) => &item,
        _ => {
            return Err(WebAuthnError::InvalidRequest(
                "COSE key is not a CBOR map".to_string(),
            ));
        }
    };

    let kty = map
        .map_get_int(LABEL_KTY)
        .and_then(CborValue::as_int)
        .ok_or_else(|| WebAuthnError::InvalidRequest("COSE key missing kty".to_string()))?;
    let alg = map
        .map_get_int(LABEL_ALG)
        .and_then(CborValue::as_int)
        .ok_or_else(|| WebAuthnError::InvalidRequest("COSE key missing alg".to_string()))?;

    let key = match kty {
        COSE_KTY_EC2 => {
            let crv = map
                .map_get_int(LABEL_EC_CRV)
                .and_then(CborValue::as_int)
                .ok_or_else(|| {
                    WebAuthnError::InvalidRequest("EC2 key missing crv".to_string())
                })?;
            if crv != COSE_CRV_P256 {
                return Err(WebAuthnError::UnsupportedKey(format!(
                    "unsupported EC2 curve {crv}"
                )));
            }
            let x = map
                .map_get_int(LABEL_EC_X)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| WebAuthnError::InvalidRequest("EC2 key missing x".to_string()))?;
            let y = map
                .map_get_int(LABEL_EC_Y)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| WebAuthnError::InvalidRequest("EC2 key missing y".to_string()))?;
            CosePublicKey::Ec2 {
                alg,
                x: x.to_vec(),
                y: y.to_vec(),
            }
        }
        COSE_KTY_RSA => {
            let n = map
                .map_get_int(LABEL_RSA_N)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| WebAuthnError::InvalidRequest("RSA key missing n".to_string()))?;
            let e = map
                .map_get_int(LABEL_RSA_E)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| WebAuthnError::InvalidRequest("RSA key missing e".to_string()))?;
            CosePublicKey::Rsa {
                alg,
                n: n.to_vec(),
                e: e.to_vec(),
            }
        }
        other => {
            return Err(WebAuthnError::UnsupportedKey(format!(
                "unsupported COSE key type {other}"
            )));
        }
    };

    Ok((key, consumed))
}

fn verify_es256(x: &[u8], y: &[u8], data: &[u8], signature: &[u8]) -> Result<(), WebAuthnError> {
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    if x.len() != 32 || y.len() != 32 {
        return Err(WebAuthnError::InvalidRequest(
            "EC2 coordinates must be 32 bytes".to_string(),
        ));
    }

    let point = p256::EncodedPoint::from_affine_coordinates(x.into(), y.into(), false);
    let verifying_key = VerifyingKey::from_encoded_point(&point).map_err(|_| {
        WebAuthnError::InvalidRequest("EC2 key is not a valid curve point".to_string())
    })?;

    // WebAuthn ES256 signatures are ASN.1 DER encoded.
    let signature = Signature::from_der(signature)
        .map_err(|_| WebAuthnError::Verification("malformed ECDSA signature".to_string()))?;

    verifying_key
        .verify(data, &signature)
        .map_err(|_| WebAuthnError::Verification("assertion signature mismatch".to_string()))
}

fn verify_rs256(n: &[u8], e: &[u8], data: &[u8], signature: &[u8]) -> Result<(), WebAuthnError> {
    use rsa::signature::Verifier;

    let public_key = rsa::RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .map_err(|_| WebAuthnError::InvalidRequest("invalid RSA public key".to_string()))?;
    let verifying_key = RsaVerifyingKey::<Sha256>::new(public_key);

    let signature = RsaSignature::try_from(signature)
        .map_err(|_| WebAuthnError::Verification("malformed RSA signature".to_string()))?;

    verifying_key
        .verify(data, &signature)
        .map_err(|_| WebAuthnError::Verification("assertion signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cose_ec2_key, cose_rsa_key};

    #[test]
    fn test_parse_ec2_key() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let encoded = cose_ec2_key(signing_key.verifying_key());
        let (key, consumed) = parse_cose_key(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(key.alg(), COSE_ALG_ES256);
        assert!(matches!(key, CosePublicKey::Ec2 { .. }));
    }

    #[test]
    fn test_parse_consumes_one_item_only() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut encoded = cose_ec2_key(signing_key.verifying_key());
        let key_len = encoded.len();
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let (_, consumed) = parse_cose_key(&encoded).unwrap();
        assert_eq!(consumed, key_len);
    }

    #[test]
    fn test_es256_verify_roundtrip() {
        use p256::ecdsa::signature::Signer;

        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let encoded = cose_ec2_key(signing_key.verifying_key());
        let (key, _) = parse_cose_key(&encoded).unwrap();

        let data = b"signed data";
        let signature: p256::ecdsa::Signature = signing_key.sign(data);
        key.verify(data, signature.to_der().as_bytes()).unwrap();

        let err = key
            .verify(b"other data", signature.to_der().as_bytes())
            .unwrap_err();
        assert!(matches!(err, WebAuthnError::Verification(_)));
    }

    #[test]
    fn test_rs256_verify_roundtrip() {
        use rsa::signature::{SignatureEncoding, Signer};

        let private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());
        let encoded = cose_rsa_key(&rsa::RsaPublicKey::from(&private_key));
        let (key, _) = parse_cose_key(&encoded).unwrap();

        let data = b"signed data";
        let signature = signing_key.sign(data);
        key.verify(data, &signature.to_bytes()).unwrap();
        assert!(key.verify(b"other", &signature.to_bytes()).is_err());
    }

    #[test]
    fn test_rejects_unknown_key_type() {
        // {1: 4 (symmetric), 3: -7}
        let data = [0xa2, 0x01, 0x04, 0x03, 0x26];
        let err = parse_cose_key(&data).unwrap_err();
        assert!(matches!(err, WebAuthnError::UnsupportedKey(_)));
    }

    #[test]
    fn test_rejects_unknown_curve() {
        // {1: 2, 3: -7, -1: 2 (P-384)}
        let data = [0xa3, 0x01, 0x02, 0x03, 0x26, 0x20, 0x02];
        let err = parse_cose_key(&data).unwrap_err();
        assert!(matches!(err, WebAuthnError::UnsupportedKey(_)));
    }
}
