//! Random row payloads and the self-verifying stored value format.
//!
//! The stored value is `len (u32, big-endian) || value || sha256(value)[..8]`,
//! so any row read back from either cluster can be checked for corruption
//! independently of the scenario that wrote it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::hex::hex;

use crate::config::PayloadConfig;

/// Bytes of the value digest appended to the stored value.
pub const CHECKSUM_LEN: usize = 8;

const LEN_PREFIX: usize = 4;
const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A row's key and raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Payload {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The value column as written to the table.
    pub fn store_value(&self) -> Vec<u8> {
        let len = u32::try_from(self.value.len()).unwrap_or(u32::MAX);
        let mut stored = Vec::with_capacity(LEN_PREFIX + self.value.len() + CHECKSUM_LEN);
        stored.extend_from_slice(&len.to_be_bytes());
        stored.extend_from_slice(&self.value);
        stored.extend_from_slice(&checksum(&self.value));
        stored
    }

    /// Short printable form for logs and reports.
    pub fn describe(&self) -> String {
        format!("key={} value_len={}", hex(&self.key), self.value.len())
    }
}

fn checksum(value: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(value);
    let mut out = [0_u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Check a stored value's length prefix and digest; returns the raw value.
pub fn verify_store_value(stored: &[u8]) -> Result<&[u8]> {
    let corrupt =
        |why: &str| SelfCheckError::mismatch(format!("stored value {why}: {}", hex(stored)));
    let Some((prefix, rest)) = stored.split_first_chunk::<LEN_PREFIX>() else {
        return Err(corrupt("is shorter than its length prefix"));
    };
    let len =
        usize::try_from(u32::from_be_bytes(*prefix)).map_err(|_| corrupt("length overflows"))?;
    if rest.len() != len + CHECKSUM_LEN {
        return Err(corrupt("length does not match its prefix"));
    }
    let (value, digest) = rest.split_at(len);
    if digest != checksum(value) {
        return Err(corrupt("fails its checksum"));
    }
    Ok(value)
}

/// Deterministic payload source.
#[derive(Debug)]
pub struct PayloadGenerator {
    rng: StdRng,
    config: PayloadConfig,
}

impl PayloadGenerator {
    pub fn new(seed: u64, config: PayloadConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    pub fn next_payload(&mut self) -> Payload {
        let key = (0..self.config.key_len)
            .map(|_| KEY_ALPHABET[self.rng.gen_range(0..KEY_ALPHABET.len())])
            .collect();
        let len = self
            .rng
            .gen_range(self.config.min_value_len..=self.config.max_value_len);
        let mut value = vec![0_u8; len];
        self.rng.fill(value.as_mut_slice());
        Payload::new(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64) -> PayloadGenerator {
        PayloadGenerator::new(seed, PayloadConfig::default())
    }

    #[test]
    fn stored_value_verifies() {
        let payload = generator(7).next_payload();
        let stored = payload.store_value();
        assert_eq!(verify_store_value(&stored).expect("valid"), payload.value());
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut stored = generator(7).next_payload().store_value();
        stored[LEN_PREFIX] ^= 0x01;
        let err = verify_store_value(&stored).expect_err("corrupt");
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn truncation_is_detected() {
        let stored = generator(7).next_payload().store_value();
        assert!(verify_store_value(&stored[..stored.len() - 1]).is_err());
        assert!(verify_store_value(&stored[..2]).is_err());
    }

    #[test]
    fn same_seed_same_payloads() {
        let mut a = generator(42);
        let mut b = generator(42);
        for _ in 0..8 {
            assert_eq!(a.next_payload(), b.next_payload());
        }
    }

    #[test]
    fn respects_configured_lengths() {
        let config = PayloadConfig {
            key_len: 5,
            min_value_len: 3,
            max_value_len: 3,
        };
        let payload = PayloadGenerator::new(1, config).next_payload();
        assert_eq!(payload.key().len(), 5);
        assert_eq!(payload.value().len(), 3);
        assert!(payload.key().iter().all(u8::is_ascii_alphanumeric));
    }
}
