//! MinHash (k smallest values) similarity estimator

use super::data::{Data, DataHash};
use super::hash::HASH_LENGTH;
use super::ReconcileError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPoolConfig {
    /// Stored hash width in bytes
    pub hash_len: u32,
    /// Number of smallest hashes compared
    pub k: u32,
}

impl HashPoolConfig {
    pub fn new(hash_len: u32, k: u32) -> Self {
        Self { hash_len, k }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.hash_len == 0 || self.hash_len as usize > HASH_LENGTH {
            return Err(ReconcileError::InvalidConfig(format!(
                "min-hash length {} outside 1..={}",
                self.hash_len, HASH_LENGTH
            )));
        }
        if self.k == 0 {
            return Err(ReconcileError::InvalidConfig(
                "min-hash k is zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPool {
    hashes: Vec<DataHash>,
    config: HashPoolConfig,
}

impl HashPool {
    pub fn new(config: HashPoolConfig) -> Self {
        Self {
            hashes: Vec::new(),
            config,
        }
    }

    pub(crate) fn from_parts(hashes: Vec<DataHash>, config: HashPoolConfig) -> Self {
        Self { hashes, config }
    }

    pub fn config(&self) -> HashPoolConfig {
        self.config
    }

    pub fn hashes(&self) -> &[DataHash] {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn encode(&mut self, d: &Data) {
        self.hashes
            .push(DataHash::from_digest(&d.hash(), self.config.hash_len as usize));
    }

    /// The `k` smallest hashes in ascending order (all of them if fewer)
    pub fn min_hash(&self, k: usize) -> Vec<DataHash> {
        let mut sorted = self.hashes.clone();
        sorted.sort();
        sorted.truncate(k);
        sorted
    }

    /// Size of this pool's min-hash sample
    pub fn get_k(&self) -> usize {
        (self.config.k as usize).min(self.hashes.len())
    }

    /// Hashes shared by the two min-hash samples
    pub fn comp(&self, other: &HashPool) -> usize {
        let k = self.config.k as usize;
        let a = self.min_hash(k);
        let b = other.min_hash(k);
        a.iter()
            .map(|x| b.iter().filter(|y| x.is_equal(y)).count())
            .sum()
    }

    /// Estimated Jaccard similarity `m / (ka + kb - m)`
    pub fn similarity(&self, other: &HashPool) -> f32 {
        let m = self.comp(other);
        if m == 0 {
            return 0.0;
        }
        let denom = (self.get_k() + other.get_k()).saturating_sub(m);
        if denom == 0 {
            return 1.0;
        }
        m as f32 / denom as f32
    }

    /// Estimated symmetric difference `(1 - r) / (1 + r) * (|a| + |b|)`
    pub fn decode(&self, other: &HashPool) -> u64 {
        let r = self.similarity(other);
        let total = (self.hashes.len() + other.hashes.len()) as f32;
        ((1.0 - r) / (1.0 + r) * total) as u64
    }
}
