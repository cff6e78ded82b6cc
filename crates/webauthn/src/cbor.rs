//! Minimal CBOR item decoder for authenticator payloads.
//!
//! Recognizes major types 0–7. Definite lengths only; array and map sizes
//! are capped at 65536 entries. This is intentionally not a general CBOR
//! library: it decodes exactly what attestation objects and COSE keys need.

use super::WebAuthnError;

/// Upper bound on array/map entry counts.
const MAX_CONTAINER_LEN: u64 = 65536;

#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Unsigned(u64),
    /// Negative integers as their final value (-1 - n).
    Negative(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(Vec<(CborValue, CborValue)>),
    Tag(u64, Box<CborValue>),
    Bool(bool),
    Null,
    Undefined,
    Simple(u8),
    Float(f64),
}

impl CborValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CborValue::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CborValue::Unsigned(n) => i64::try_from(*n).ok(),
            CborValue::Negative(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a map entry by integer label (the COSE convention).
    pub fn map_get_int(&self, label: i64) -> Option<&CborValue> {
        match self {
            CborValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_int() == Some(label))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a map entry by text label.
    pub fn map_get_text(&self, label: &str) -> Option<&CborValue> {
        match self {
            CborValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_text() == Some(label))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Decode the first CBOR item in `data`, returning it and the number of
/// bytes consumed.
pub fn decode_first(data: &[u8]) -> Result<(CborValue, usize), WebAuthnError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.decode_item(0)?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Nesting bound; authenticator payloads are shallow.
const MAX_DEPTH: usize = 16;

impl Decoder<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WebAuthnError> {
        if self.pos + n > self.data.len() {
            return Err(WebAuthnError::InvalidRequest(
                "truncated CBOR item".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WebAuthnError> {
        Ok(self.take(1)?[0])
    }

    /// Read the argument for an initial byte (additional info 0..=27).
    fn read_argument(&mut self, additional: u8) -> Result<u64, WebAuthnError> {
        match additional {
            0..=23 => Ok(additional as u64),
            24 => Ok(self.read_u8()? as u64),
            25 => {
                let b = self.take(2)?;
                Ok(u16::from_be_bytes([b[0], b[1]]) as u64)
            }
            26 => {
                let b = self.take(4)?;
                Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64)
            }
            27 => {
                let b = self.take(8)?;
                Ok(u64::from_be_bytes(b.try_into().unwrap()))
            }
            31 => Err(WebAuthnError::InvalidRequest(
                "indefinite-length CBOR items are not supported".to_string(),
            )),
            _ => Err(WebAuthnError::InvalidRequest(format!(
                "reserved CBOR additional info {additional}"
            ))),
        }
    }

    fn decode_item(&mut self, depth: usize) -> Result<CborValue, WebAuthnError> {
        if depth > MAX_DEPTH {
            return Err(WebAuthnError::InvalidRequest(
                "CBOR nesting too deep".to_string(),
            ));
        }

        let initial = self.read_u8()?;
        let major = initial >> 5;
        let additional = initial & 0x1f;

        match major {
            0 => Ok(CborValue::Unsigned(self.read_argument(additional)?)),
            1 => {
                let n = self.read_argument(additional)?;
                let value = i64::try_from(n)
                    .ok()
                    .and_then(|n| (-1i64).checked_sub(n))
                    .ok_or_else(|| {
                        WebAuthnError::InvalidRequest(
                            "negative integer out of range".to_string(),
                        )
                    })?;
                Ok(CborValue::Negative(value))
            }
            2 => {
                let len = self.read_argument(additional)?;
                let len = usize::try_from(len).map_err(|_| {
                    WebAuthnError::InvalidRequest("byte string too long".to_string())
                })?;
                Ok(CborValue::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = self.read_argument(additional)?;
                let len = usize::try_from(len).map_err(|_| {
                    WebAuthnError::InvalidRequest("text string too long".to_string())
                })?;
                let bytes = self.take(len)?;
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    WebAuthnError::InvalidRequest("invalid UTF-8 in text string".to_string())
                })?;
                Ok(CborValue::Text(text.to_string()))
            }
            4 => {
                let len = self.read_argument(additional)?;
                if len > MAX_CONTAINER_LEN {
                    return Err(WebAuthnError::InvalidRequest(format!(
                        "CBOR array length {len} exceeds cap"
                    )));
                }
                let mut items = Vec::with_capacity(len.min(64) as usize);
                for _ in 0..len {
                    items.push(self.decode_item(depth + 1)?);
                }
                Ok(CborValue::Array(items))
            }
            5 => {
                let len = self.read_argument(additional)?;
                if len > MAX_CONTAINER_LEN {
                    return Err(WebAuthnError::InvalidRequest(format!(
                        "CBOR map length {len} exceeds cap"
                    )));
                }
                let mut entries = Vec::with_capacity(len.min(64) as usize);
                for _ in 0..len {
                    let key = self.decode_item(depth + 1)?;
                    let value = self.decode_item(depth + 1)?;
                    entries.push((key, value));
                }
                Ok(CborValue::Map(entries))
            }
            6 => {
                let tag = self.read_argument(additional)?;
                let inner = self.decode_item(depth + 1)?;
                Ok(CborValue::Tag(tag, Box::new(inner)))
            }
            7 => match additional {
                20 => Ok(CborValue::Bool(false)),
                21 => Ok(CborValue::Bool(true)),
                22 => Ok(CborValue::Null),
                23 => Ok(CborValue::Undefined),
                24 => Ok(CborValue::Simple(self.read_u8()?)),
                25 => {
                    let b = self.take(2)?;
                    Ok(CborValue::Float(half_to_f64(u16::from_be_bytes([
                        b[0], b[1],
                    ]))))
                }
                26 => {
                    let b = self.take(4)?;
                    Ok(CborValue::Float(
                        f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
                    ))
                }
                27 => {
                    let b = self.take(8)?;
                    Ok(CborValue::Float(f64::from_be_bytes(b.try_into().unwrap())))
                }
                0..=19 => Ok(CborValue::Simple(additional)),
                _ => Err(WebAuthnError::InvalidRequest(format!(
                    "unsupported simple value encoding {additional}"
                ))),
            },
            _ => unreachable!("major type is three bits"),
        }
    }
}

/// IEEE 754 half-precision to f64.
fn half_to_f64(half: u16) -> f64 {
    let sign = if half >> 15 == 1 { -1.0 } else { 1.0 };
    let exponent = ((half >> 10) & 0x1f) as i32;
    let mantissa = (half & 0x3ff) as f64;
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        31 => {
            if mantissa == 0.0 {
                sign * f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unsigned_forms() {
        assert_eq!(decode_first(&[0x0a]).unwrap().0, CborValue::Unsigned(10));
        assert_eq!(
            decode_first(&[0x18, 0x64]).unwrap().0,
            CborValue::Unsigned(100)
        );
        assert_eq!(
            decode_first(&[0x19, 0x03, 0xe8]).unwrap().0,
            CborValue::Unsigned(1000)
        );
    }

    #[test]
    fn test_decode_negative() {
        // -7 is 0x26 (major 1, value 6)
        assert_eq!(decode_first(&[0x26]).unwrap().0, CborValue::Negative(-7));
        // -257 is major 1 with argument 256
        assert_eq!(
            decode_first(&[0x39, 0x01, 0x00]).unwrap().0,
            CborValue::Negative(-257)
        );
    }

    #[test]
    fn test_decode_bytes_and_text() {
        assert_eq!(
            decode_first(&[0x43, 1, 2, 3]).unwrap().0,
            CborValue::Bytes(vec![1, 2, 3])
        );
        assert_eq!(
            decode_first(&[0x63, b'f', b'm', b't']).unwrap().0,
            CborValue::Text("fmt".to_string())
        );
    }

    #[test]
    fn test_decode_consumed_length() {
        // Item followed by trailing garbage: only the item is consumed.
        let (value, consumed) = decode_first(&[0x43, 1, 2, 3, 0xff, 0xff]).unwrap();
        assert_eq!(value, CborValue::Bytes(vec![1, 2, 3]));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_decode_map_with_int_labels() {
        // {1: 2, -1: 1}
        let data = [0xa2, 0x01, 0x02, 0x20, 0x01];
        let (value, _) = decode_first(&data).unwrap();
        assert_eq!(value.map_get_int(1).unwrap().as_int(), Some(2));
        assert_eq!(value.map_get_int(-1).unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_decode_simple_values() {
        assert_eq!(decode_first(&[0xf4]).unwrap().0, CborValue::Bool(false));
        assert_eq!(decode_first(&[0xf5]).unwrap().0, CborValue::Bool(true));
        assert_eq!(decode_first(&[0xf6]).unwrap().0, CborValue::Null);
        assert_eq!(decode_first(&[0xf7]).unwrap().0, CborValue::Undefined);
    }

    #[test]
    fn test_decode_tag() {
        // 1(1363896240)
        let data = [0xc1, 0x1a, 0x51, 0x4b, 0x67, 0xb0];
        let (value, _) = decode_first(&data).unwrap();
        assert!(matches!(value, CborValue::Tag(1, _)));
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(decode_first(&[0x58, 0x20, 0x01]).is_err());
        assert!(decode_first(&[]).is_err());
    }

    #[test]
    fn test_rejects_indefinite_length() {
        assert!(decode_first(&[0x5f]).is_err());
        assert!(decode_first(&[0x9f]).is_err());
    }

    #[test]
    fn test_rejects_oversized_container() {
        // Array claiming 70000 entries.
        let data = [0x9a, 0x00, 0x01, 0x11, 0x70];
        assert!(decode_first(&data).is_err());
    }

    #[test]
    fn test_float_decoding() {
        // 1.5 as half-precision
        let (value, _) = decode_first(&[0xf9, 0x3e, 0x00]).unwrap();
        assert_eq!(value, CborValue::Float(1.5));
    }
}
