//! Ephemeral-static ECDH over the NIST curves used by the JWE service.

use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use serde::{Deserialize, Serialize};
use shared::codec::{b64url_decode, b64url_encode};
use zeroize::Zeroizing;

use super::JweError;

/// The `epk` header member: the ephemeral public key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralPublicKey {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

#[derive(Clone)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

#[derive(Clone)]
pub enum EcPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl EcPrivateKey {
    pub fn public_key(&self) -> EcPublicKey {
        match self {
            EcPrivateKey::P256(sk) => EcPublicKey::P256(sk.public_key()),
            EcPrivateKey::P384(sk) => EcPublicKey::P384(sk.public_key()),
            EcPrivateKey::P521(sk) => EcPublicKey::P521(sk.public_key()),
        }
    }

    fn curve_name(&self) -> &'static str {
        match self {
            EcPrivateKey::P256(_) => "P-256",
            EcPrivateKey::P384(_) => "P-384",
            EcPrivateKey::P521(_) => "P-521",
        }
    }
}

/// Generate an ephemeral key on the recipient's curve and agree on a shared
/// secret Z. Returns Z and the `epk` header value.
pub fn ephemeral_agreement(
    recipient: &EcPublicKey,
) -> Result<(Zeroizing<Vec<u8>>, EphemeralPublicKey), JweError> {
    match recipient {
        EcPublicKey::P256(pk) => {
            let ephemeral = p256::ecdh::EphemeralSecret::random(&mut rand::rngs::OsRng);
            let epk = encode_point::<p256::NistP256>("P-256", &ephemeral.public_key().to_encoded_point(false))?;
            let z = Zeroizing::new(ephemeral.diffie_hellman(pk).raw_secret_bytes().to_vec());
            Ok((z, epk))
        }
        EcPublicKey::P384(pk) => {
            let ephemeral = p384::ecdh::EphemeralSecret::random(&mut rand::rngs::OsRng);
            let epk = encode_point::<p384::NistP384>("P-384", &ephemeral.public_key().to_encoded_point(false))?;
            let z = Zeroizing::new(ephemeral.diffie_hellman(pk).raw_secret_bytes().to_vec());
            Ok((z, epk))
        }
        EcPublicKey::P521(pk) => {
            let ephemeral = p521::ecdh::EphemeralSecret::random(&mut rand::rngs::OsRng);
            let epk = encode_point::<p521::NistP521>("P-521", &ephemeral.public_key().to_encoded_point(false))?;
            let z = Zeroizing::new(ephemeral.diffie_hellman(pk).raw_secret_bytes().to_vec());
            Ok((z, epk))
        }
    }
}

/// Recompute Z on the recipient side from the `epk` header value.
pub fn static_agreement(
    private_key: &EcPrivateKey,
    epk: &EphemeralPublicKey,
) -> Result<Zeroizing<Vec<u8>>, JweError> {
    if epk.kty != "EC" {
        return Err(JweError::Decode(format!(
            "unsupported epk key type '{}'",
            epk.kty
        )));
    }
    if epk.crv != private_key.curve_name() {
        return Err(JweError::Decrypt(format!(
            "epk curve '{}' does not match the decryption key",
            epk.crv
        )));
    }

    let x = b64url_decode(&epk.x).map_err(|_| JweError::Decode("invalid epk.x".to_string()))?;
    let y = b64url_decode(&epk.y).map_err(|_| JweError::Decode("invalid epk.y".to_string()))?;

    match private_key {
        EcPrivateKey::P256(sk) => {
            let pk = decode_point::<p256::NistP256>(&x, &y, 32)?;
            let shared =
                elliptic_curve::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        EcPrivateKey::P384(sk) => {
            let pk = decode_point::<p384::NistP384>(&x, &y, 48)?;
            let shared =
                elliptic_curve::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        EcPrivateKey::P521(sk) => {
            let pk = decode_point::<p521::NistP521>(&x, &y, 66)?;
            let shared =
                elliptic_curve::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
    }
}

fn encode_point<C>(
    crv: &str,
    point: &elliptic_curve::sec1::EncodedPoint<C>,
) -> Result<EphemeralPublicKey, JweError>
where
    C: elliptic_curve::Curve,
    elliptic_curve::FieldBytesSize<C>: elliptic_curve::sec1::ModulusSize,
{
    let x = point
        .x()
        .ok_or_else(|| JweError::Decrypt("ephemeral key is the identity point".to_string()))?;
    let y = point
        .y()
        .ok_or_else(|| JweError::Decrypt("ephemeral key is compressed".to_string()))?;
    Ok(EphemeralPublicKey {
        kty: "EC".to_string(),
        crv: crv.to_string(),
        x: b64url_encode(x),
        y: b64url_encode(y),
    })
}

fn decode_point<C>(x: &[u8], y: &[u8], field_size: usize) -> Result<elliptic_curve::PublicKey<C>, JweError>
where
    C: elliptic_curve::CurveArithmetic,
    elliptic_curve::FieldBytesSize<C>: elliptic_curve::sec1::ModulusSize,
    C::AffinePoint: elliptic_curve::sec1::FromEncodedPoint<C> + elliptic_curve::sec1::ToEncodedPoint<C>,
{
    let x = left_pad(x, field_size)?;
    let y = left_pad(y, field_size)?;
    let point = elliptic_curve::sec1::EncodedPoint::<C>::from_affine_coordinates(
        elliptic_curve::generic_array::GenericArray::from_slice(&x),
        elliptic_curve::generic_array::GenericArray::from_slice(&y),
        false,
    );
    Option::from(elliptic_curve::PublicKey::<C>::from_encoded_point(&point))
        .ok_or_else(|| JweError::Decode("epk is not a valid curve point".to_string()))
}

/// Coordinates may arrive with leading zero bytes stripped.
fn left_pad(bytes: &[u8], size: usize) -> Result<Vec<u8>, JweError> {
    if bytes.len() > size {
        return Err(JweError::Decode(format!(
            "coordinate length {} exceeds field size {size}",
            bytes.len()
        )));
    }
    let mut out = vec![0u8; size];
    out[size - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}
