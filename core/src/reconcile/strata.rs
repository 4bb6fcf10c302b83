//! Strata estimator for the size of a symmetric difference
//!
//! Elements are spread over `StrataNum` small IBLTs by the number of leading
//! zero bits of their hash, so stratum `i` sees roughly `1 / 2^(i+1)` of the
//! set. Subtracting two estimators and decoding from the sparsest stratum
//! downwards gives an exact count until the first stratum that is too full
//! to peel; the count so far is then scaled up by the sampling rate.

use super::data::{Data, DataHash};
use super::iblt::{InvBloom, InvBloomConfig};
use super::ReconcileError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Buckets per stratum IBLT
pub const STRATUM_BUCKETS: u32 = 80;
/// Cells touched per insert in a stratum IBLT
pub const STRATUM_HASH_FUNCTIONS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Number of strata
    pub strata_num: u32,
    /// Layout shared by every stratum
    pub iblt_config: InvBloomConfig,
}

impl EstimatorConfig {
    /// `strata_num` strata of 80 buckets, k = 4
    pub fn new(strata_num: u32) -> Self {
        Self {
            strata_num,
            iblt_config: InvBloomConfig::new(STRATUM_BUCKETS, STRATUM_HASH_FUNCTIONS),
        }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.strata_num == 0 || self.strata_num > 64 {
            return Err(ReconcileError::InvalidConfig(format!(
                "strata count {} outside 1..=64",
                self.strata_num
            )));
        }
        self.iblt_config.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrataEstimator {
    count: u64,
    strata: Vec<InvBloom>,
    config: EstimatorConfig,
}

impl StrataEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let strata = (0..config.strata_num)
            .map(|_| InvBloom::new(config.iblt_config))
            .collect();
        Self {
            count: 0,
            strata,
            config,
        }
    }

    pub(crate) fn from_parts(count: u64, strata: Vec<InvBloom>, config: EstimatorConfig) -> Self {
        Self {
            count,
            strata,
            config,
        }
    }

    pub fn config(&self) -> EstimatorConfig {
        self.config
    }

    /// Elements encoded so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn strata(&self) -> &[InvBloom] {
        &self.strata
    }

    /// Zero-filled payload of the stratum width
    pub fn new_data(&self) -> Data {
        Data::new(self.config.iblt_config.data_len())
    }

    /// Leading zero bits of `d`'s hash truncated to the stratum hash width
    pub fn trailing_zeros(&self, d: &Data) -> u32 {
        DataHash::from_digest(&d.hash(), self.config.iblt_config.hash_len()).trailing_zeros()
    }

    /// Stratum that `d` lands in
    pub fn level(&self, d: &Data) -> usize {
        self.clamp_level(self.trailing_zeros(d))
    }

    fn clamp_level(&self, zeros: u32) -> usize {
        zeros.min(self.config.strata_num.saturating_sub(1)) as usize
    }

    /// Encode a payload; it is resized to the stratum width first
    pub fn encode_data(&mut self, d: &Data) {
        let data = self.fit(d);
        let zeros = self.trailing_zeros(&data);
        self.insert_at(zeros, &data);
    }

    pub fn encode_bytes(&mut self, b: &[u8]) {
        let mut data = self.new_data();
        data.set_bytes(b);
        self.encode_data(&data);
    }

    /// Insert a payload already sized to the stratum width whose zero count
    /// is known
    pub(crate) fn insert_at(&mut self, zeros: u32, data: &Data) {
        let level = self.clamp_level(zeros);
        self.count += 1;
        if let Some(stratum) = self.strata.get_mut(level) {
            stratum.insert(data);
        }
    }

    fn fit(&self, d: &Data) -> Data {
        if d.len() == self.config.iblt_config.data_len() {
            return d.clone();
        }
        let mut data = self.new_data();
        data.set_bytes(d.bytes());
        data
    }

    /// Estimated size of the symmetric difference with `r`
    pub fn decode_data(&self, r: &StrataEstimator) -> Result<u64, ReconcileError> {
        if self.strata.len() != r.strata.len() {
            return Err(ReconcileError::ConfigMismatch {
                what: "strata count",
                expected: self.strata.len() as u64,
                got: r.strata.len() as u64,
            });
        }

        let mut count = 0u64;
        for i in (0..self.strata.len()).rev() {
            let t = self.strata[i].subtract(&r.strata[i])?;
            let (a, b) = match t.decode() {
                Ok(sides) => sides,
                Err(e) if e.is_decode_failure() => {
                    let estimate = count.saturating_mul(1u64 << (i + 1).min(63));
                    debug!(
                        "stratum {} did not decode, estimating {} from {} decoded",
                        i, estimate, count
                    );
                    return Ok(estimate);
                }
                Err(e) => return Err(e),
            };
            count += (a.len() + b.len()) as u64;
        }
        Ok(count)
    }
}
