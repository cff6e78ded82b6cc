//! Hand-rolled authenticator fixtures for ceremony tests: a tiny CBOR
//! encoder plus builders for COSE keys, authenticator data and attestation
//! objects.

use rsa::traits::PublicKeyParts;

pub fn cbor_uint(value: u64, out: &mut Vec<u8>) {
    encode_head(0, value, out);
}

pub fn cbor_neg(value: i64, out: &mut Vec<u8>) {
    debug_assert!(value < 0);
    encode_head(1, (-1 - value) as u64, out);
}

pub fn cbor_int(value: i64, out: &mut Vec<u8>) {
    if value < 0 {
        cbor_neg(value, out);
    } else {
        cbor_uint(value as u64, out);
    }
}

pub fn cbor_bytes(data: &[u8], out: &mut Vec<u8>) {
    encode_head(2, data.len() as u64, out);
    out.extend_from_slice(data);
}

pub fn cbor_text(text: &str, out: &mut Vec<u8>) {
    encode_head(3, text.len() as u64, out);
    out.extend_from_slice(text.as_bytes());
}

pub fn cbor_map_head(entries: u64, out: &mut Vec<u8>) {
    encode_head(5, entries, out);
}

fn encode_head(major: u8, value: u64, out: &mut Vec<u8>) {
    let major = major << 5;
    if value < 24 {
        out.push(major | value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(major | 24);
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(major | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(major | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// COSE EC2/P-256 key for an ECDSA verifying key.
pub fn cose_ec2_key(verifying_key: &p256::ecdsa::VerifyingKey) -> Vec<u8> {
    let point = verifying_key.to_encoded_point(false);
    let mut out = Vec::new();
    cbor_map_head(5, &mut out);
    cbor_int(1, &mut out); // kty
    cbor_int(2, &mut out); // EC2
    cbor_int(3, &mut out); // alg
    cbor_int(-7, &mut out); // ES256
    cbor_int(-1, &mut out); // crv
    cbor_int(1, &mut out); // P-256
    cbor_int(-2, &mut out); // x
    cbor_bytes(point.x().unwrap(), &mut out);
    cbor_int(-3, &mut out); // y
    cbor_bytes(point.y().unwrap(), &mut out);
    out
}

/// COSE RSA key.
pub fn cose_rsa_key(public_key: &rsa::RsaPublicKey) -> Vec<u8> {
    let mut out = Vec::new();
    cbor_map_head(4, &mut out);
    cbor_int(1, &mut out); // kty
    cbor_int(3, &mut out); // RSA
    cbor_int(3, &mut out); // alg
    cbor_int(-257, &mut out); // RS256
    cbor_int(-1, &mut out); // n
    cbor_bytes(&public_key.n().to_bytes_be(), &mut out);
    cbor_int(-2, &mut out); // e
    cbor_bytes(&public_key.e().to_bytes_be(), &mut out);
    out
}

/// Raw authenticator data with optional attested credential data
/// (aaguid, credential id, COSE key).
pub fn authenticator_data_bytes(
    rp_id_hash: &[u8; 32],
    flags: u8,
    sign_count: u32,
    attested: Option<(&[u8; 16], &[u8], &[u8])>,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(rp_id_hash);
    out.push(flags);
    out.extend_from_slice(&sign_count.to_be_bytes());
    if let Some((aaguid, credential_id, cose_key)) = attested {
        out.extend_from_slice(aaguid);
        out.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
        out.extend_from_slice(credential_id);
        out.extend_from_slice(cose_key);
    }
    out
}

/// A "none"-format attestation object around the given authenticator data.
pub fn attestation_object(auth_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    cbor_map_head(3, &mut out);
    cbor_text("fmt", &mut out);
    cbor_text("none", &mut out);
    cbor_text("attStmt", &mut out);
    cbor_map_head(0, &mut out);
    cbor_text("authData", &mut out);
    cbor_bytes(auth_data, &mut out);
    out
}

/// clientDataJSON for a ceremony step.
pub fn client_data_json(type_: &str, challenge: &str, origin: &str) -> Vec<u8> {
    serde_json::json!({
        "type": type_,
        "challenge": challenge,
        "origin": origin,
    })
    .to_string()
    .into_bytes()
}
