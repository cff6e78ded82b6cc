//! AES Key Wrap (RFC 3394) with the default IV sentinel.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use shared::codec::constant_time_eq;

use super::JweError;

/// RFC 3394 §2.2.3.1 default initial value.
const DEFAULT_IV: [u8; 8] = [0xA6; 8];

enum Kek {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl Kek {
    fn new(kek: &[u8]) -> Result<Self, JweError> {
        match kek.len() {
            16 => Ok(Kek::Aes128(Aes128::new(GenericArray::from_slice(kek)))),
            24 => Ok(Kek::Aes192(Aes192::new(GenericArray::from_slice(kek)))),
            32 => Ok(Kek::Aes256(Aes256::new(GenericArray::from_slice(kek)))),
            n => Err(JweError::Decrypt(format!("invalid KEK length {n}"))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.encrypt_block(block),
            Kek::Aes192(c) => c.encrypt_block(block),
            Kek::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; 16]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Kek::Aes128(c) => c.decrypt_block(block),
            Kek::Aes192(c) => c.decrypt_block(block),
            Kek::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Wrap `plaintext` (a CEK, multiple of 8 bytes, at least 16) under `kek`.
pub fn aes_key_wrap(kek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, JweError> {
    if plaintext.len() < 16 || plaintext.len() % 8 != 0 {
        return Err(JweError::Decrypt(format!(
            "invalid key length {} for wrapping",
            plaintext.len()
        )));
    }
    let kek = Kek::new(kek)?;

    let n = plaintext.len() / 8;
    let mut a = DEFAULT_IV;
    let mut r: Vec<[u8; 8]> = plaintext
        .chunks_exact(8)
        .map(|c| c.try_into().unwrap())
        .collect();

    let mut block = [0u8; 16];
    for j in 0..6u64 {
        for (i, ri) in r.iter_mut().enumerate() {
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(ri);
            kek.encrypt_block(&mut block);

            let t = (n as u64) * j + (i as u64) + 1;
            a.copy_from_slice(&block[..8]);
            for (ab, tb) in a.iter_mut().zip(t.to_be_bytes()) {
                *ab ^= tb;
            }
            ri.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(8 + plaintext.len());
    out.extend_from_slice(&a);
    for ri in &r {
        out.extend_from_slice(ri);
    }
    Ok(out)
}

/// Unwrap a wrapped key, verifying the RFC 3394 IV sentinel.
pub fn aes_key_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, JweError> {
    if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
        return Err(JweError::Decrypt(format!(
            "invalid wrapped key length {}",
            wrapped.len()
        )));
    }
    let kek = Kek::new(kek)?;

    let n = wrapped.len() / 8 - 1;
    let mut a: [u8; 8] = wrapped[..8].try_into().unwrap();
    let mut r: Vec<[u8; 8]> = wrapped[8..]
        .chunks_exact(8)
        .map(|c| c.try_into().unwrap())
        .collect();

    let mut block = [0u8; 16];
    for j in (0..6u64).rev() {
        for i in (0..n).rev() {
            let t = (n as u64) * j + (i as u64) + 1;
            block[..8].copy_from_slice(&a);
            for (bb, tb) in block[..8].iter_mut().zip(t.to_be_bytes()) {
                *bb ^= tb;
            }
            block[8..].copy_from_slice(&r[i]);
            kek.decrypt_block(&mut block);

            a.copy_from_slice(&block[..8]);
            r[i].copy_from_slice(&block[8..]);
        }
    }

    if !constant_time_eq(&a, &DEFAULT_IV) {
        return Err(JweError::Decrypt(
            "key unwrap integrity check failed".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(n * 8);
    for ri in &r {
        out.extend_from_slice(ri);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 3394 §4.1: wrap 128 bits of key data with a 128-bit KEK.
    #[test]
    fn test_rfc3394_vector_128_128() {
        let kek: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F,
        ];
        let key_data: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        let expected: [u8; 24] = [
            0x1F, 0xA6, 0x8B, 0x0A, 0x81, 0x12, 0xB4, 0x47, 0xAE, 0xF3, 0x4B, 0xD8, 0xFB, 0x5A,
            0x7B, 0x82, 0x9D, 0x3E, 0x86, 0x23, 0x71, 0xD2, 0xCF, 0xE5,
        ];

        let wrapped = aes_key_wrap(&kek, &key_data).unwrap();
        assert_eq!(wrapped, expected);
        assert_eq!(aes_key_unwrap(&kek, &wrapped).unwrap(), key_data);
    }

    // RFC 3394 §4.6: wrap 256 bits of key data with a 256-bit KEK.
    #[test]
    fn test_rfc3394_vector_256_256() {
        let kek: [u8; 32] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B,
            0x1C, 0x1D, 0x1E, 0x1F,
        ];
        let key_data: [u8; 32] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B,
            0x0C, 0x0D, 0x0E, 0x0F,
        ];
        let expected: [u8; 40] = [
            0x28, 0xC9, 0xF4, 0x04, 0xC4, 0xB8, 0x10, 0xF4, 0xCB, 0xCC, 0xB3, 0x5C, 0xFB, 0x87,
            0xF8, 0x26, 0x3F, 0x57, 0x86, 0xE2, 0xD8, 0x0E, 0xD3, 0x26, 0xCB, 0xC7, 0xF0, 0xE7,
            0x1A, 0x99, 0xF4, 0x3B, 0xFB, 0x98, 0x8B, 0x9B, 0x7A, 0x02, 0xDD, 0x21,
        ];

        let wrapped = aes_key_wrap(&kek, &key_data).unwrap();
        assert_eq!(wrapped, expected);
        assert_eq!(aes_key_unwrap(&kek, &wrapped).unwrap(), key_data);
    }

    #[test]
    fn test_unwrap_detects_tampering() {
        let kek = [7u8; 16];
        let key_data = [9u8; 16];
        let mut wrapped = aes_key_wrap(&kek, &key_data).unwrap();
        wrapped[3] ^= 0x01;
        let err = aes_key_unwrap(&kek, &wrapped).unwrap_err();
        assert!(matches!(err, JweError::Decrypt(_)));
    }

    #[test]
    fn test_unwrap_rejects_wrong_kek() {
        let key_data = [9u8; 16];
        let wrapped = aes_key_wrap(&[7u8; 16], &key_data).unwrap();
        assert!(aes_key_unwrap(&[8u8; 16], &wrapped).is_err());
    }
}
