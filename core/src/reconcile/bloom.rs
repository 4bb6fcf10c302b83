//! Classical Bloom filter over byte strings
//!
//! Bit `i` lives in byte `ByteLen - 1 - i / 8` at position `i % 8`: bits are
//! little-endian within a byte and big-endian across bytes, so a hex dump
//! shows the low bits at the high-address end. Peers must agree on this
//! layout bit for bit.

use super::hash::k_hash;
use super::hash::MAX_HASH_WORDS;
use super::ReconcileError;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Bloom filter sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Filter length in bytes (bit length / 8)
    pub byte_len: u32,
    /// Number of virtual hash functions (k)
    pub bits: u32,
}

impl BloomConfig {
    /// Config with `2^log2_bits` bits and `bits` hash functions
    pub fn new(log2_bits: u32, bits: u32) -> Self {
        Self {
            byte_len: 1 << log2_bits.max(3).saturating_sub(3).min(31),
            bits,
        }
    }

    /// Config for `count` elements: `2^bitlen(30 * count)` bits, k = 4
    pub fn derive(count: usize) -> Self {
        let scaled = (count as u64).saturating_mul(30);
        let log2_bits = u64::BITS - scaled.leading_zeros();
        Self::new(log2_bits, 4)
    }

    pub fn bit_len(&self) -> u64 {
        self.byte_len as u64 * 8
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.byte_len == 0 || !self.byte_len.is_power_of_two() {
            return Err(ReconcileError::InvalidConfig(format!(
                "bloom byte length {} is not a power of two",
                self.byte_len
            )));
        }
        if self.bits == 0 || self.bits as usize > MAX_HASH_WORDS {
            return Err(ReconcileError::InvalidConfig(format!(
                "bloom hash count {} outside 1..={}",
                self.bits, MAX_HASH_WORDS
            )));
        }
        Ok(())
    }
}

/// Bloom filter of `config.byte_len` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bloom {
    bytes: Vec<u8>,
    config: BloomConfig,
}

impl Bloom {
    pub fn new(config: BloomConfig) -> Self {
        Self {
            bytes: vec![0u8; config.byte_len as usize],
            config,
        }
    }

    pub(crate) fn from_parts(bytes: Vec<u8>, config: BloomConfig) -> Self {
        Self { bytes, config }
    }

    pub fn config(&self) -> BloomConfig {
        self.config
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Right-align `d` into the filter, keeping its trailing bytes when it
    /// is longer than the filter.
    pub fn set_bytes(&mut self, d: &[u8]) {
        let len = self.bytes.len();
        let d = if d.len() > len { &d[d.len() - len..] } else { d };
        self.bytes[len - d.len()..].copy_from_slice(d);
    }

    /// Compare filter bits only
    pub fn is_equal(&self, other: &Bloom) -> bool {
        self.bytes == other.bytes
    }

    /// Bytewise OR of `other` into self
    pub fn or(&mut self, other: &Bloom) -> &mut Self {
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= b;
        }
        self
    }

    /// New filter holding `x | y`
    pub fn union(x: &Bloom, y: &Bloom) -> Bloom {
        let mut res = x.clone();
        res.or(y);
        res
    }

    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }

    /// Filter bytes as an unsigned big-endian integer
    pub fn big(&self) -> BigUint {
        BigUint::from_bytes_be(&self.bytes)
    }

    /// Set the k bits selected by `k`
    pub fn digest(&mut self, k: &[u8]) -> &mut Self {
        let mask = self.index_mask();
        for hash in k_hash(k, self.config.bits as usize) {
            self.set_at(hash & mask);
        }
        self
    }

    /// Whether all k bits for `k` are set; false positives possible
    pub fn look_up(&self, k: &[u8]) -> bool {
        let mask = self.index_mask();
        k_hash(k, self.config.bits as usize)
            .into_iter()
            .all(|hash| self.look_at(hash & mask))
    }

    /// Set bit `idx`; out-of-range indexes are ignored
    pub fn set_at(&mut self, idx: u32) {
        if let Some((byte_idx, mask)) = self.locate(idx) {
            self.bytes[byte_idx] |= mask;
        }
    }

    /// Read bit `idx`; out-of-range indexes read as unset
    pub fn look_at(&self, idx: u32) -> bool {
        self.locate(idx)
            .is_some_and(|(byte_idx, mask)| self.bytes[byte_idx] & mask == mask)
    }

    /// Number of set bits
    pub fn ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    fn locate(&self, idx: u32) -> Option<(usize, u8)> {
        let len = self.bytes.len();
        if (idx as u64) >= len as u64 * 8 {
            return None;
        }
        let byte_idx = len - (idx as usize / 8) - 1;
        Some((byte_idx, 1u8 << (idx % 8)))
    }

    fn index_mask(&self) -> u32 {
        (self.config.bit_len().saturating_sub(1)).min(u32::MAX as u64) as u32
    }
}
