//! Hex text for varbinary columns: the `tuple` JSON fields and messages.

use std::fmt::Write as _;

use xdcr_error::{Result, SelfCheckError};

/// Lower-case hex rendering.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Decode a hex string, either case.
pub fn decode_hex(encoded: &str) -> Result<Vec<u8>> {
    let bytes = encoded.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(SelfCheckError::ResultShape {
            detail: format!("odd-length hex string '{encoded}'"),
        });
    }
    bytes
        .chunks_exact(2)
        .map(|pair| match (hex_digit(pair[0]), hex_digit(pair[1])) {
            (Some(high), Some(low)) => Ok((high << 4) | low),
            _ => Err(SelfCheckError::ResultShape {
                detail: format!("invalid hex string '{encoded}'"),
            }),
        })
        .collect()
}

const fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_lower_case() {
        assert_eq!(hex(&[0x0F, 0xA0]), "0fa0");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn decodes_either_case_and_rejects_garbage() {
        assert_eq!(decode_hex("aBcD").expect("hex"), vec![0xAB, 0xCD]);
        assert_eq!(decode_hex(&hex(&[0, 0x7F, 0xFF])).expect("hex"), vec![0, 0x7F, 0xFF]);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }
}
