//! Hybrid difference estimator
//!
//! A strata estimator handles the low strata where most elements land; the
//! rare elements whose hash has `StrataNum` or more leading zero bits go to a
//! MinHash pool instead. Decoding combines both and clamps the result, and
//! [`HybridEstimator::derive_config`] turns the estimate into an IBLT size.

use super::data::Data;
use super::iblt::InvBloomConfig;
use super::minhash::{HashPool, HashPoolConfig};
use super::strata::{EstimatorConfig, StrataEstimator};
use super::ReconcileError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_STRATA_NUM: u32 = 7;
/// Payload width of a stratum IBLT
pub const STRATA_DATA_LEN: u32 = 16;
pub const MIN_HASH_LEN: u32 = 8;
pub const MIN_HASH_K: u32 = 500;

/// IBLT buckets per estimated difference in [`HybridEstimator::derive_config`]
pub const DEFAULT_SIZE_FACTOR: f64 = 10.0;
/// Cells touched per insert in a derived IBLT
pub const DERIVED_HASH_FUNCTIONS: u32 = 4;

/// Estimates below this are raised to it
pub const MIN_ESTIMATE: u64 = 20;
/// Strata results above this are scaled by [`STRATA_SCALE`]
pub const STRATA_SCALE_THRESHOLD: u64 = 100;
pub const STRATA_SCALE: f32 = 1.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridEstimatorConfig {
    pub strata_config: EstimatorConfig,
    pub min_wise_config: HashPoolConfig,
}

impl HybridEstimatorConfig {
    /// 7 strata of 16-byte payloads, MinHash of 8-byte hashes with K = 500
    pub fn new() -> Self {
        Self::with_params(DEFAULT_STRATA_NUM, MIN_HASH_LEN, MIN_HASH_K)
    }

    pub fn with_params(strata_num: u32, min_hash_len: u32, min_hash_k: u32) -> Self {
        let mut strata_config = EstimatorConfig::new(strata_num);
        let base = strata_config.iblt_config;
        // shrink the value segment so the stratum payload is 16 bytes wide
        strata_config.iblt_config = InvBloomConfig::with_layout(
            base.bucket_num,
            base.bucket_used,
            base.key_len,
            STRATA_DATA_LEN - base.key_len - base.ser_num_len,
            base.bkt_config.hash_len,
        );
        Self {
            strata_config,
            min_wise_config: HashPoolConfig::new(min_hash_len, min_hash_k),
        }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        self.strata_config.validate()?;
        self.min_wise_config.validate()
    }
}

impl Default for HybridEstimatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridEstimator {
    strata: StrataEstimator,
    min_wise: HashPool,
}

impl HybridEstimator {
    pub fn new(config: HybridEstimatorConfig) -> Self {
        Self {
            strata: StrataEstimator::new(config.strata_config),
            min_wise: HashPool::new(config.min_wise_config),
        }
    }

    pub(crate) fn from_parts(strata: StrataEstimator, min_wise: HashPool) -> Self {
        Self { strata, min_wise }
    }

    pub fn config(&self) -> HybridEstimatorConfig {
        HybridEstimatorConfig {
            strata_config: self.strata.config(),
            min_wise_config: self.min_wise.config(),
        }
    }

    pub fn strata(&self) -> &StrataEstimator {
        &self.strata
    }

    pub fn min_wise(&self) -> &HashPool {
        &self.min_wise
    }

    /// Elements encoded on both sides of the estimator
    pub fn count(&self) -> u64 {
        self.strata.count() + self.min_wise.len() as u64
    }

    /// Zero-filled payload of the stratum width
    pub fn new_data(&self) -> Data {
        self.strata.new_data()
    }

    pub fn encode(&mut self, d: &Data) {
        self.encode_bytes(d.bytes());
    }

    /// Encode raw bytes, truncated or zero-padded to the stratum width
    pub fn encode_bytes(&mut self, b: &[u8]) {
        let mut data = self.new_data();
        data.set_bytes(b);

        let zeros = self.strata.trailing_zeros(&data);
        if zeros < self.strata.config().strata_num {
            self.strata.insert_at(zeros, &data);
        } else {
            self.min_wise.encode(&data);
        }
    }

    /// Estimated size of the symmetric difference with `r`, clamped to
    /// `[20, total elements on both sides]` (the lower bound wins)
    pub fn decode(&self, r: &HybridEstimator) -> Result<u64, ReconcileError> {
        let count = self.count() + r.count();

        let mut s = self.strata.decode_data(&r.strata)?;
        if s > STRATA_SCALE_THRESHOLD {
            s = (s as f32 * STRATA_SCALE) as u64;
        }

        let d = if s == 0 {
            let sim = self.min_wise.similarity(&r.min_wise);
            ((1.0 - sim) / (1.0 + sim) * count as f32) as u64
        } else {
            self.min_wise.decode(&r.min_wise)
        };

        let res = (s + d).min(count).max(MIN_ESTIMATE);
        debug!(
            "set difference estimated at {} (strata {}, min-hash {}, {} elements)",
            res, s, d, count
        );
        Ok(res)
    }

    /// IBLT layout for the reconciliation round: `estimate * 10` buckets, k = 4
    pub fn derive_config(&self, r: &HybridEstimator) -> Result<InvBloomConfig, ReconcileError> {
        self.derive_config_with_factor(r, DEFAULT_SIZE_FACTOR)
    }

    /// IBLT layout with `estimate * factor` buckets, k = 4
    pub fn derive_config_with_factor(
        &self,
        r: &HybridEstimator,
        factor: f64,
    ) -> Result<InvBloomConfig, ReconcileError> {
        let diff = self.decode(r)?;
        Ok(InvBloomConfig::new(
            bucket_count(diff, factor),
            DERIVED_HASH_FUNCTIONS,
        ))
    }
}

/// `diff * factor` buckets, kept within what an IBLT with
/// [`DERIVED_HASH_FUNCTIONS`] cells per insert can use
pub fn bucket_count(diff: u64, factor: f64) -> u32 {
    let scaled = (diff as f64 * factor.max(0.0)).floor();
    let floor = (2 * DERIVED_HASH_FUNCTIONS) as f64;
    scaled.max(floor).min(u32::MAX as f64) as u32
}
