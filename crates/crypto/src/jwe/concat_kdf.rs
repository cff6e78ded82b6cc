//! Concat-KDF (NIST SP 800-56A §5.8.1) as profiled by RFC 7518 §4.6.2.
//!
//! PartyUInfo and PartyVInfo are always empty; SuppPubInfo is the derived
//! key length in bits.

use sha2::{Digest, Sha256};

/// Derive `key_len` bytes from the ECDH shared secret `z`.
///
/// `algorithm_id` is the `enc` value for direct key agreement and the `alg`
/// value for the key-wrapping variants.
pub fn concat_kdf_sha256(z: &[u8], algorithm_id: &str, key_len: usize) -> Vec<u8> {
    let mut other_info = Vec::with_capacity(algorithm_id.len() + 16);
    other_info.extend_from_slice(&(algorithm_id.len() as u32).to_be_bytes());
    other_info.extend_from_slice(algorithm_id.as_bytes());
    other_info.extend_from_slice(&0u32.to_be_bytes()); // PartyUInfo
    other_info.extend_from_slice(&0u32.to_be_bytes()); // PartyVInfo
    other_info.extend_from_slice(&((key_len as u32) * 8).to_be_bytes()); // SuppPubInfo

    let reps = key_len.div_ceil(32);
    let mut derived = Vec::with_capacity(reps * 32);
    for counter in 1..=reps as u32 {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(&other_info);
        derived.extend_from_slice(&hasher.finalize());
    }
    derived.truncate(key_len);
    derived
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_length() {
        let z = [0x42u8; 32];
        assert_eq!(concat_kdf_sha256(&z, "A128GCM", 16).len(), 16);
        assert_eq!(concat_kdf_sha256(&z, "A192GCM", 24).len(), 24);
        assert_eq!(concat_kdf_sha256(&z, "A256GCM", 32).len(), 32);
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let z = [0x42u8; 32];
        assert_eq!(
            concat_kdf_sha256(&z, "A256GCM", 32),
            concat_kdf_sha256(&z, "A256GCM", 32)
        );
    }

    #[test]
    fn test_algorithm_id_changes_output() {
        let z = [0x42u8; 32];
        assert_ne!(
            concat_kdf_sha256(&z, "A128GCM", 16),
            concat_kdf_sha256(&z, "ECDH-ES+A128KW", 16)
        );
    }

    #[test]
    fn test_key_length_is_bound_into_derivation() {
        let z = [0x42u8; 32];
        let short = concat_kdf_sha256(&z, "A128GCM", 16);
        let long = concat_kdf_sha256(&z, "A128GCM", 32);
        // Different SuppPubInfo, so the long key is not an extension of the
        // short one.
        assert_ne!(&long[..16], &short[..]);
    }
}
